//! Cloud CnC connector backed by a device shadow
//!
//! Commands arrive as `desired.command` in the watched thing's shadow; each
//! command id is emitted once. Replies are reported back under
//! `reported.command`.

use crate::connector::{ConnectorContext, ConnectorDriver};
use crate::error::GatewayError;
use crate::shadow::{ShadowAction, ShadowCallback, ShadowManager, ShadowTransport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const TYPE_NAME: &str = "shadow-cnc";

pub struct ShadowCncDriver {
    shadows: ShadowManager,
    thing: Mutex<Option<String>>,
    reporter: Mutex<Option<JoinHandle<()>>>,
}

impl ShadowCncDriver {
    pub fn new(transport: Arc<dyn ShadowTransport>) -> Self {
        Self {
            shadows: ShadowManager::new(transport),
            thing: Mutex::new(None),
            reporter: Mutex::new(None),
        }
    }

    fn thing(&self) -> Result<String> {
        self.thing
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("shadow connector was not configured"))
    }
}

/// The pending command in a shadow document, if any
fn desired_command(document: &Value) -> Option<&Value> {
    document
        .pointer("/state/desired/command")
        .or_else(|| document.pointer("/desired/command"))
        .filter(|command| command.is_object())
}

/// Emit commands from fetched shadows, skipping ids already seen
fn command_listener(ctx: ConnectorContext, thing: String) -> ShadowCallback {
    let last_id: Mutex<Option<String>> = Mutex::new(None);

    Arc::new(move |result| match result {
        Ok(response) if response.action == ShadowAction::GetShadow => {
            let Some(command) = desired_command(&response.state) else {
                return;
            };
            let id = command.get("id").and_then(Value::as_str).map(str::to_string);
            {
                let mut last = last_id.lock();
                if id.is_some() && *last == id {
                    return;
                }
                *last = id;
            }
            ctx.emit(command.clone());
        }
        Ok(_) => {}
        Err(failure) => ctx.report_error(anyhow!("Shadow request for {} {}", thing, failure)),
    })
}

#[async_trait]
impl ConnectorDriver for ShadowCncDriver {
    async fn configure(&self, ctx: &ConnectorContext) -> Result<()> {
        let thing = ctx
            .config_str("thingName")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| GatewayError::Validation("thingName is required".into()))?;
        *self.thing.lock() = Some(thing.to_string());
        Ok(())
    }

    async fn start(&self, ctx: &ConnectorContext) -> Result<()> {
        let thing = self.thing()?;

        self.shadows.start().await?;
        if let Err(e) = self
            .shadows
            .watch_shadow(&thing, command_listener(ctx.clone(), thing.clone()))
        {
            if let Err(stop_err) = self.shadows.stop().await {
                warn!(connector = %ctx.id(), "Failed to close shadow transport: {}", stop_err);
            }
            return Err(e.into());
        }

        if let Some(outbound) = ctx.outbound().cloned() {
            let shadows = self.shadows.clone();
            let ctx = ctx.clone();
            let thing = thing.clone();
            let reporter = tokio::spawn(async move {
                loop {
                    let reply = outbound.next().await;
                    let state = json!({ "reported": { "command": reply } });
                    if let Err(e) = shadows.update_state(&thing, state) {
                        ctx.report_error(e.into());
                    }
                }
            });
            *self.reporter.lock() = Some(reporter);
        }

        info!(connector = %ctx.id(), thing = %thing, "Shadow CnC connector started");
        Ok(())
    }

    async fn stop(&self, ctx: &ConnectorContext) -> Result<()> {
        if let Some(reporter) = self.reporter.lock().take() {
            reporter.abort();
        }
        let thing = self.thing()?;
        self.shadows.stop_watching(&thing);
        self.shadows.stop().await?;

        debug!(connector = %ctx.id(), "Shadow CnC connector stopped");
        Ok(())
    }
}
