use crate::transport::{Transport, TransportResponse, cdp_error_message, next_id};
use anyhow::{Result, anyhow};
use serde_json::{Value, json};

/// Unwraps a session reply into its `result`, surfacing CDP errors.
pub(crate) fn serde_msg(msg: Value) -> Result<Value> {
    if let Some(err) = msg.get("error") {
        return Err(anyhow!(cdp_error_message(err)));
    }
    Ok(msg.get("result").cloned().unwrap_or(Value::Null))
}

/// Sends a message to a target and waits for the corresponding response.
pub(crate) async fn send_and_get_msg(
    transport: &Transport,
    msg_id: usize,
    session_id: &str,
    msg: String,
) -> Result<Value> {
    let reply = transport.listen(msg_id).await?;
    let response = async {
        transport
            .send(json!({
                "id": next_id(),
                "method": "Target.sendMessageToTarget",
                "params": { "sessionId": session_id, "message": msg }
            }))
            .await?;
        transport.get_target_msg(reply).await
    }
    .await;

    match response {
        Ok(TransportResponse::Target(res)) => serde_msg(res),
        Ok(other) => Err(anyhow!("Unexpected response: {:?}", other)),
        Err(e) => {
            transport.forget(msg_id).await;
            Err(e)
        }
    }
}
