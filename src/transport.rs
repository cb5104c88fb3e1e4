use anyhow::{Context, Result, anyhow};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, trace};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = oneshot::Sender<Result<TransportResponse>>;

/// Global atomic ID counter for generating unique message IDs.
///
/// Browser-level and session-level messages draw from the same counter, so a
/// single pending map can correlate both.
static GLOBAL_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Returns a unique incremental ID for request messages.
pub(crate) fn next_id() -> usize {
    GLOBAL_ID_COUNTER.fetch_add(1, Ordering::SeqCst) + 1
}

/// Messages sent to the transport actor.
#[derive(Debug)]
pub(crate) enum TransportMessage {
    /// A browser-level command with a response sender.
    Request(Value, Reply),
    /// Listener for the session reply carrying the given inner ID.
    ListenTargetMessage(u64, Reply),
    /// Drop a reply listener that will never be answered.
    Forget(u64),
    /// Forward every event of a session to the sender.
    Subscribe(String, mpsc::UnboundedSender<Value>),
    /// Command to shut down the transport.
    Shutdown,
}

/// Responses produced by the transport actor.
#[derive(Debug)]
pub(crate) enum TransportResponse {
    /// Reply to a browser-level command.
    Response(Response),
    /// Decoded inner reply of a session command.
    Target(Value),
}

/// Represents a successful browser-level CDP reply.
#[derive(Debug)]
pub(crate) struct Response {
    pub(crate) id: u64,
    pub(crate) result: Value,
}

/// Classification of a raw frame read from the DevTools socket.
#[derive(Debug, PartialEq)]
pub(crate) enum Incoming {
    Reply {
        id: u64,
        outcome: std::result::Result<Value, String>,
    },
    TargetReply {
        id: u64,
        message: Value,
    },
    TargetEvent {
        session_id: String,
        event: Value,
    },
    Ignored,
}

/// Sorts a raw text frame into replies, session replies and session events.
pub(crate) fn route(text: &str) -> Incoming {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Incoming::Ignored;
    };

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let outcome = match value.get("error") {
            Some(err) => Err(cdp_error_message(err)),
            None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Incoming::Reply { id, outcome };
    }

    if value["method"] != "Target.receivedMessageFromTarget" {
        return Incoming::Ignored;
    }

    let params = &value["params"];
    let Some(inner) = params["message"]
        .as_str()
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
    else {
        return Incoming::Ignored;
    };

    if let Some(id) = inner.get("id").and_then(Value::as_u64) {
        return Incoming::TargetReply { id, message: inner };
    }
    match params["sessionId"].as_str() {
        Some(session_id) => Incoming::TargetEvent {
            session_id: session_id.to_string(),
            event: inner,
        },
        None => Incoming::Ignored,
    }
}

/// Formats a CDP `error` object as `message: data`.
pub(crate) fn cdp_error_message(err: &Value) -> String {
    let message = err["message"].as_str().unwrap_or("unknown CDP error");
    match err["data"].as_str() {
        Some(data) => format!("{message}: {data}"),
        None => message.to_string(),
    }
}

/// Bookkeeping for pending replies and event subscribers.
#[derive(Default)]
struct Router {
    pending_requests: HashMap<u64, Reply>,
    subscribers: Vec<(String, mpsc::UnboundedSender<Value>)>,
}

impl Router {
    fn forget(&mut self, id: u64) {
        if self.pending_requests.remove(&id).is_some() {
            trace!("dropped listener for {id}");
        }
    }

    fn dispatch(&mut self, incoming: Incoming) {
        match incoming {
            Incoming::Reply { id, outcome } => {
                if let Some(sender) = self.pending_requests.remove(&id) {
                    let response = outcome
                        .map(|result| TransportResponse::Response(Response { id, result }))
                        .map_err(|e| anyhow!(e));
                    let _ = sender.send(response);
                }
            }
            Incoming::TargetReply { id, message } => {
                if let Some(sender) = self.pending_requests.remove(&id) {
                    let _ = sender.send(Ok(TransportResponse::Target(message)));
                }
            }
            Incoming::TargetEvent { session_id, event } => {
                trace!("event {} on {}", event["method"], session_id);
                self.subscribers
                    .retain(|(sid, tx)| sid != &session_id || tx.send(event.clone()).is_ok());
            }
            Incoming::Ignored => {}
        }
    }
}

/// Internal transport actor managing WebSocket communication and request-response handling.
struct TransportActor {
    router: Router,
    ws_sink: SplitSink<WsStream, Message>,
    command_rx: mpsc::Receiver<TransportMessage>,
}

impl TransportActor {
    /// Event loop handling incoming/outgoing WebSocket messages and commands.
    async fn run(mut self, mut ws_stream: SplitStream<WsStream>) {
        loop {
            tokio::select! {
                Some(msg) = ws_stream.next() => {
                    match msg {
                        Ok(Message::Text(text)) => self.router.dispatch(route(&text)),
                        Ok(Message::Close(_)) | Err(_) => break,
                        _ => {}
                    }
                }
                Some(msg) = self.command_rx.recv() => {
                    match msg {
                        TransportMessage::Request(cmd, tx) => {
                            let Some(id) = cmd["id"].as_u64() else {
                                let _ = tx.send(Err(anyhow!("Command without id")));
                                continue;
                            };
                            match self.ws_sink.send(Message::Text(cmd.to_string())).await {
                                Ok(()) => {
                                    self.router.pending_requests.insert(id, tx);
                                }
                                Err(e) => {
                                    let _ = tx.send(Err(anyhow!("WebSocket send failed: {e}")));
                                }
                            }
                        }
                        TransportMessage::ListenTargetMessage(id, tx) => {
                            self.router.pending_requests.insert(id, tx);
                        }
                        TransportMessage::Forget(id) => self.router.forget(id),
                        TransportMessage::Subscribe(session_id, tx) => {
                            self.router.subscribers.push((session_id, tx));
                        }
                        TransportMessage::Shutdown => {
                            let _ = self.ws_sink.send(Message::Text(json!({
                                "id": next_id(),
                                "method": "Browser.close",
                                "params": {}
                            }).to_string())).await;
                            let _ = self.ws_sink.close().await;
                            break;
                        }
                    }
                }
                else => break,
            }
        }
        debug!("transport actor stopped");
    }
}

/// Asynchronous transport interface to the Chrome DevTools Protocol over WebSocket.
#[derive(Debug)]
pub(crate) struct Transport {
    tx: mpsc::Sender<TransportMessage>,
    timeout: Duration,
}

impl Transport {
    /// Creates a new transport connected to the specified WebSocket URL.
    pub(crate) async fn new(ws_url: &str, timeout: Duration) -> Result<Self> {
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .with_context(|| format!("Failed to connect to {ws_url}"))?;
        let (ws_sink, ws_stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel(100);

        let actor = TransportActor {
            router: Router::default(),
            ws_sink,
            command_rx: rx,
        };
        tokio::spawn(actor.run(ws_stream));

        Ok(Self { tx, timeout })
    }

    async fn post(&self, msg: TransportMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("Transport actor dropped"))
    }

    async fn wait(&self, rx: oneshot::Receiver<Result<TransportResponse>>) -> Result<TransportResponse> {
        time::timeout(self.timeout, rx)
            .await
            .map_err(|_| anyhow!("Timeout waiting for response"))?
            .map_err(|_| anyhow!("Response channel closed"))?
    }

    /// Sends a browser-level command and awaits its reply.
    pub(crate) async fn send(&self, command: Value) -> Result<TransportResponse> {
        let (tx, rx) = oneshot::channel();
        self.post(TransportMessage::Request(command, tx)).await?;
        self.wait(rx).await
    }

    /// Sends a browser-level command and returns its `result` object.
    pub(crate) async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let res = self
            .send(json!({ "id": next_id(), "method": method, "params": params }))
            .await
            .with_context(|| format!("{method} failed"))?;
        match res {
            TransportResponse::Response(res) => {
                trace!("{method} answered (id {})", res.id);
                Ok(res.result)
            }
            other => Err(anyhow!("Unexpected response to {method}: {other:?}")),
        }
    }

    /// Registers interest in the session reply with the given inner ID.
    ///
    /// Must be called before the command is sent so the reply cannot race the
    /// registration.
    pub(crate) async fn listen(&self, msg_id: usize) -> Result<oneshot::Receiver<Result<TransportResponse>>> {
        let (tx, rx) = oneshot::channel();
        self.post(TransportMessage::ListenTargetMessage(msg_id as u64, tx))
            .await?;
        Ok(rx)
    }

    /// Waits for a reply previously registered with [`Transport::listen`].
    pub(crate) async fn get_target_msg(
        &self,
        rx: oneshot::Receiver<Result<TransportResponse>>,
    ) -> Result<TransportResponse> {
        self.wait(rx).await
    }

    /// Removes a listener registered with [`Transport::listen`].
    pub(crate) async fn forget(&self, msg_id: usize) {
        let _ = self.post(TransportMessage::Forget(msg_id as u64)).await;
    }

    /// Streams every event emitted by the given session.
    pub(crate) async fn subscribe(&self, session_id: &str) -> Result<mpsc::UnboundedReceiver<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.post(TransportMessage::Subscribe(session_id.to_string(), tx))
            .await?;
        Ok(rx)
    }

    /// Initiates a graceful shutdown of the transport.
    pub(crate) async fn shutdown(&self) {
        let _ = self.tx.send(TransportMessage::Shutdown).await;
    }
}
