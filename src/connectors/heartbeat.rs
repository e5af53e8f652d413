//! Device connector that emits a liveness beat on a fixed interval

use crate::connector::{ConnectorContext, ConnectorDriver};
use crate::error::GatewayError;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

pub const TYPE_NAME: &str = "heartbeat";

pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Emits `{ source, seq, uptimeMs }` every `intervalMs`
#[derive(Default)]
pub struct HeartbeatDriver {
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

fn beat_interval(ctx: &ConnectorContext) -> Result<Duration> {
    let millis = match ctx.config().get("intervalMs") {
        None => DEFAULT_INTERVAL_MS,
        Some(value) => match value.as_u64() {
            Some(ms) if ms > 0 => ms,
            _ => {
                return Err(GatewayError::Validation(
                    "intervalMs must be a positive integer".into(),
                )
                .into())
            }
        },
    };
    Ok(Duration::from_millis(millis))
}

#[async_trait]
impl ConnectorDriver for HeartbeatDriver {
    async fn configure(&self, ctx: &ConnectorContext) -> Result<()> {
        beat_interval(ctx)?;
        Ok(())
    }

    async fn start(&self, ctx: &ConnectorContext) -> Result<()> {
        let period = beat_interval(ctx)?;
        let ctx = ctx.clone();

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = interval(period);
            let mut seq: u64 = 0;
            loop {
                ticker.tick().await;
                seq += 1;
                ctx.emit(json!({
                    "source": ctx.id(),
                    "seq": seq,
                    "uptimeMs": started.elapsed().as_millis() as u64,
                }));
            }
        });
        *self.ticker.lock() = Some(task);

        debug!(period_ms = period.as_millis() as u64, "Heartbeat started");
        Ok(())
    }

    async fn stop(&self, _ctx: &ConnectorContext) -> Result<()> {
        if let Some(task) = self.ticker.lock().take() {
            task.abort();
        }
        Ok(())
    }
}
