//! An explicit registry of store client constructors.
//!
//! Built at process start by whoever owns `main`; nothing registers itself
//! as a module-load side effect. Clients are addressed by URI scheme, e.g.
//! `mem://`.

use crate::client::StoreClient;
use crate::mem::MemStore;
use ahash::AHashMap as HashMap;
use anyhow::{anyhow, Result};
use std::sync::Arc;

pub type Constructor = fn(&str) -> Result<Arc<dyn StoreClient>>;

#[derive(Default)]
pub struct Registry {
    constructors: HashMap<String, Constructor>,
}

// === impl Registry ===

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in clients registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("mem", |_| Ok(Arc::new(MemStore::new())));
        registry
    }

    pub fn register(&mut self, scheme: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(scheme.into(), constructor);
    }

    /// Constructs a client for a `scheme://rest` URI.
    pub fn open(&self, uri: &str) -> Result<Arc<dyn StoreClient>> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| anyhow!("store URI {:?} has no scheme", uri))?;
        let constructor = self
            .constructors
            .get(scheme)
            .ok_or_else(|| anyhow!("no store client registered for scheme {:?}", scheme))?;
        constructor(rest)
    }
}
