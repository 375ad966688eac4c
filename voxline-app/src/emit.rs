//! NDJSON output on stdout. Logs go to stderr, so stdout stays machine-readable.

use std::io::Write;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Write one value as a single JSON line and flush.
pub fn emit_line<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let line = serde_json::to_string(value)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

/// Print every event from `rx` until its sender side is gone.
pub fn forward<T>(mut rx: broadcast::Receiver<T>, label: &'static str) -> JoinHandle<()>
where
    T: Serialize + Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = emit_line(&event) {
                        tracing::warn!("emit {label}: {e}");
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("{label} receiver lagged by {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
