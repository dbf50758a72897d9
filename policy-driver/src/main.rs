#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use policy_driver::DriverConfig;
use policy_driver_core::DriverEvent;
use policy_driver_store::Registry;
use std::path::PathBuf;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        unix::{OwnedReadHalf, OwnedWriteHalf},
        UnixStream,
    },
    sync::mpsc,
};
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(name = "policy-driver", about = "Datastore driver for the policy dataplane")]
struct Args {
    #[clap(
        long,
        default_value = "policy_driver=info,warn",
        env = "POLICY_DRIVER_LOG"
    )]
    log_level: String,

    /// Store URI, resolved through the client registry (e.g. mem://).
    #[clap(long, default_value = "mem://")]
    store: String,

    /// Global config key=value pairs reported in config_loaded.
    #[clap(long = "global-config")]
    global_config: Vec<KeyValue>,

    /// Per-host config key=value pairs reported in config_loaded.
    #[clap(long = "host-config")]
    host_config: Vec<KeyValue>,

    /// Path of the dataplane's unix socket.
    dataplane_socket: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_level))
        .init();

    let registry = Registry::with_defaults();
    let client = registry.open(&args.store)?;

    let socket = UnixStream::connect(&args.dataplane_socket)
        .await
        .with_context(|| format!("connecting to the dataplane at {:?}", args.dataplane_socket))?;
    let (read_half, write_half) = socket.into_split();

    // The dataplane speaks first: wait for its init message before starting
    // the resync engine, so config_loaded is a reply.
    let mut reader = BufReader::new(read_half);
    await_init(&mut reader).await?;
    info!("dataplane initialised, starting driver");
    tokio::spawn(drain_dataplane(reader).instrument(info_span!("dataplane-reader")));

    let config = DriverConfig {
        global_config: args.global_config.into_iter().map(KeyValue::into_pair).collect(),
        host_config: args.host_config.into_iter().map(KeyValue::into_pair).collect(),
    };
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (signal, shutdown) = drain::channel();
    let driver = tokio::spawn(
        policy_driver::run(client, config, events_tx, shutdown).instrument(info_span!("driver")),
    );
    let writer = tokio::spawn(write_events(write_half, events_rx).instrument(info_span!("writer")));

    let res = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
        res = driver => res.context("driver panicked")?,
        res = writer => res.context("writer panicked")?,
    };
    signal.drain().await;
    res
}

async fn await_init(reader: &mut BufReader<OwnedReadHalf>) -> Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .context("reading from the dataplane")?;
        if n == 0 {
            return Err(anyhow!("dataplane closed the socket before init"));
        }
        match serde_json::from_str::<serde_json::Value>(line.trim_end()) {
            Ok(msg) if msg["type"] == "init" => return Ok(()),
            Ok(msg) => warn!(%msg, "unexpected message from the dataplane before init"),
            Err(error) => warn!(%error, "undecodable message from the dataplane"),
        }
    }
}

/// Keeps the read side drained after init; the dataplane sends nothing else
/// we act on today.
async fn drain_dataplane(mut reader: BufReader<OwnedReadHalf>) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => warn!(msg = line.trim_end(), "ignoring message from the dataplane"),
        }
    }
}

/// Writes driver events to the dataplane as JSON lines. Any write error is
/// fatal to the driver.
async fn write_events(
    mut socket: OwnedWriteHalf,
    mut events_rx: mpsc::UnboundedReceiver<DriverEvent>,
) -> Result<()> {
    while let Some(event) = events_rx.recv().await {
        let mut line = serde_json::to_vec(&event).context("encoding event")?;
        line.push(b'\n');
        socket
            .write_all(&line)
            .await
            .context("writing to the dataplane")?;
    }
    Ok(())
}

#[derive(Clone, Debug)]
struct KeyValue(String, String);

impl KeyValue {
    fn into_pair(self) -> (String, String) {
        (self.0, self.1)
    }
}

impl std::str::FromStr for KeyValue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, got {:?}", s))?;
        Ok(Self(key.to_string(), value.to_string()))
    }
}
