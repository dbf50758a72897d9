//! Fans parsed updates out to listeners by key kind.
//!
//! The dispatcher runs synchronously on the control-plane task: every
//! listener for an update completes before the next update is parsed.
//! Listeners may replace the parsed value (the active-selector calculator
//! substitutes selector UIDs into rule bodies); the dispatcher then
//! re-serialises so the forwarded raw update carries the rewritten form.

use ahash::AHashMap as HashMap;
use policy_driver_core::{Key, KeyKind, Value, ValueParseError};
use tracing::{debug, warn};

/// A raw update, parsed. `value: None` with no error is a deletion; `value:
/// None` with an error is an update whose body failed to parse, which
/// listeners must treat as a deletion to preserve convergence.
pub struct ParsedUpdate {
    pub key: Key,
    pub value: Option<Value>,
    pub parse_err: Option<ValueParseError>,
    value_replaced: bool,
}

// === impl ParsedUpdate ===

impl ParsedUpdate {
    /// Replaces the parsed value; the dispatcher will forward the
    /// re-serialised form downstream instead of the original raw bytes.
    pub fn replace_value(&mut self, value: Value) {
        self.value = Some(value);
        self.value_replaced = true;
    }
}

pub type Handler = Box<dyn FnMut(&mut ParsedUpdate) + Send>;

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<KeyKind, Vec<Handler>>,
}

// === impl Dispatcher ===

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for one key kind. Listeners run in registration
    /// order and must not block.
    pub fn register(&mut self, kind: KeyKind, handler: impl FnMut(&mut ParsedUpdate) + Send + 'static) {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Parses and dispatches one raw update, returning the value the raw
    /// update should carry downstream (rewritten if a listener replaced it,
    /// untouched otherwise).
    pub fn dispatch(&mut self, raw_key: &str, value: Option<String>) -> Option<String> {
        let Some(key) = Key::parse(raw_key) else {
            debug!(key = raw_key, "ignoring unknown key");
            return value;
        };

        let (parsed, parse_err) = match value.as_deref() {
            Some(raw) => match Value::parse(&key, raw) {
                Ok(parsed) => (Some(parsed), None),
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to parse value, treating as deletion");
                    (None, Some(e))
                }
            },
            None => (None, None),
        };

        let mut update = ParsedUpdate {
            key,
            value: parsed,
            parse_err,
            value_replaced: false,
        };
        if let Some(handlers) = self.handlers.get_mut(&update.key.kind()) {
            for handler in handlers.iter_mut() {
                handler(&mut update);
            }
        }

        if update.value_replaced {
            match update.value.as_ref().map(Value::to_json) {
                Some(Ok(json)) => Some(json),
                Some(Err(e)) => {
                    warn!(key = %update.key, error = %e, "failed to re-serialise rewritten value");
                    None
                }
                None => None,
            }
        } else {
            value
        }
    }
}
