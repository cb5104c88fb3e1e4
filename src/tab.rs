use crate::network;
use crate::transport::{Transport, next_id};
use crate::types::{CaptureOptions, Viewport};
use crate::utils::send_and_get_msg;
use anyhow::{Context, Result, bail};
use log::debug;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Represents a CDP browser tab (target) session.
pub struct Tab {
    pub(crate) transport: Arc<Transport>,
    pub(crate) session_id: String,
    pub(crate) target_id: String,
}

impl Tab {
    /// Creates a new blank tab and attaches to it.
    pub(crate) async fn new(transport: Arc<Transport>) -> Result<Self> {
        let created = transport
            .call("Target.createTarget", json!({ "url": "about:blank" }))
            .await?;
        let target_id = created["targetId"]
            .as_str()
            .context("No targetId")?
            .to_string();

        let attached = transport
            .call("Target.attachToTarget", json!({ "targetId": target_id }))
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .context("No sessionId")?
            .to_string();

        debug!("attached to target {target_id} (session {session_id})");
        Ok(Self {
            transport,
            session_id,
            target_id,
        })
    }

    /// Sends a command inside this tab's session and returns its `result`.
    pub(crate) async fn send_cmd(&self, method: &str, params: Value) -> Result<Value> {
        let msg_id = next_id();
        let msg = json!({
            "id": msg_id,
            "method": method,
            "params": params
        })
        .to_string();
        send_and_get_msg(&self.transport, msg_id, &self.session_id, msg)
            .await
            .with_context(|| format!("{method} failed"))
    }

    /// Overrides the page's device metrics with the given viewport.
    pub async fn set_viewport(&self, viewport: &Viewport) -> Result<&Self> {
        self.send_cmd(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": viewport.width,
                "height": viewport.height,
                "deviceScaleFactor": viewport.device_scale_factor,
                "mobile": false
            }),
        )
        .await?;
        Ok(self)
    }

    /// Replaces the document with `content` and waits until the network is idle.
    pub async fn set_content(&self, content: &str, timeout: Duration) -> Result<&Self> {
        let deadline = Instant::now() + timeout;

        self.send_cmd("Page.enable", json!({})).await?;
        self.send_cmd("Network.enable", json!({})).await?;

        // Subscribe before writing so no request of the new document is missed.
        let events = self.transport.subscribe(&self.session_id).await?;

        let js_write = r#"
        (async () => {
            document.open();
            document.write(CONTENT_PLACEHOLDER);
            document.close();
            if (document.readyState !== "complete") {
                await new Promise(resolve => window.addEventListener("load", resolve, { once: true }));
            }
            return document.readyState;
        })()
        "#
        .replace("CONTENT_PLACEHOLDER", &serde_json::to_string(content)?);

        let evaluated = self
            .send_cmd(
                "Runtime.evaluate",
                json!({ "expression": js_write, "awaitPromise": true, "returnByValue": true }),
            )
            .await?;
        if let Some(details) = evaluated.get("exceptionDetails") {
            bail!("Failed to set page content: {}", exception_text(details));
        }

        network::wait_for_network_idle(events, deadline).await?;
        debug!("network idle on {}", self.target_id);
        Ok(self)
    }

    /// Captures the page and returns the base64-encoded image.
    pub async fn screenshot(&self, opts: &CaptureOptions) -> Result<String> {
        self.activate().await?;
        let result = self
            .send_cmd("Page.captureScreenshot", opts.to_params())
            .await?;

        result["data"]
            .as_str()
            .map(|s| s.to_string())
            .context("No image data received")
    }

    /// Activates the target tab to bring it to the foreground.
    pub async fn activate(&self) -> Result<&Self> {
        self.transport
            .call("Target.activateTarget", json!({ "targetId": self.target_id }))
            .await?;
        Ok(self)
    }

    /// Closes the target tab.
    pub async fn close(&self) -> Result<()> {
        self.transport
            .call("Target.closeTarget", json!({ "targetId": self.target_id }))
            .await?;
        Ok(())
    }
}

/// Best human-readable text of a `Runtime.ExceptionDetails` object.
fn exception_text(details: &Value) -> String {
    details["exception"]["description"]
        .as_str()
        .or_else(|| details["text"].as_str())
        .unwrap_or("unknown exception")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_text_prefers_description() {
        let details = json!({
            "text": "Uncaught",
            "exception": { "description": "ReferenceError: x is not defined" }
        });
        assert_eq!(exception_text(&details), "ReferenceError: x is not defined");
        assert_eq!(exception_text(&json!({ "text": "Uncaught" })), "Uncaught");
        assert_eq!(exception_text(&json!({})), "unknown exception");
    }
}
