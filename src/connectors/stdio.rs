//! Newline-delimited JSON connector over a byte stream (stdin/stdout by default)

use crate::connector::{ConnectorContext, ConnectorDriver};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const TYPE_NAME: &str = "stdio";

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Emits every JSON object read as one line; writes every outbound message as one line
pub struct JsonLinesDriver {
    io: Mutex<Option<(BoxedReader, BoxedWriter)>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JsonLinesDriver {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            io: Mutex::new(Some((Box::new(reader), Box::new(writer)))),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl ConnectorDriver for JsonLinesDriver {
    async fn configure(&self, _ctx: &ConnectorContext) -> Result<()> {
        if self.io.lock().is_none() {
            bail!("stream already consumed by an earlier start");
        }
        Ok(())
    }

    async fn start(&self, ctx: &ConnectorContext) -> Result<()> {
        let (reader, writer) = self
            .io
            .lock()
            .take()
            .ok_or_else(|| anyhow!("stream already consumed by an earlier start"))?;

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(read_lines(ctx.clone(), reader)));
        if let Some(outbound) = ctx.outbound().cloned() {
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                let mut writer = writer;
                loop {
                    let message = outbound.next().await;
                    if let Err(e) = write_line(&mut writer, &message).await {
                        ctx.report_error(e.context("Failed to write outbound message"));
                        break;
                    }
                }
            }));
        }

        info!(connector = %ctx.id(), "JSON lines connector started");
        Ok(())
    }

    async fn stop(&self, ctx: &ConnectorContext) -> Result<()> {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        debug!(connector = %ctx.id(), "JSON lines connector stopped");
        Ok(())
    }
}

async fn read_lines(ctx: ConnectorContext, reader: BoxedReader) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(payload @ Value::Object(_)) => ctx.emit(payload),
                    Ok(_) => ctx.report_error(anyhow!("Expected a JSON object, got: {}", line)),
                    Err(e) => ctx.report_error(anyhow!("Invalid JSON line: {}", e)),
                }
            }
            Ok(None) => {
                info!(connector = %ctx.id(), "Input closed");
                break;
            }
            Err(e) => {
                ctx.report_error(anyhow!("Read error: {}", e));
                break;
            }
        }
    }
}

async fn write_line(writer: &mut BoxedWriter, message: &Value) -> Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
