//! Stand-ins for a real browser, shared by unit tests.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// A DevTools endpoint that answers every command with a CDP error.
///
/// Returns the browser WebSocket URL and a stream of the methods it received.
pub(crate) async fn refusing_endpoint() -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let cmd: Value = serde_json::from_str(&text).unwrap_or_default();
            let _ = seen_tx.send(cmd["method"].as_str().unwrap_or_default().to_string());
            if let Some(id) = cmd["id"].as_u64() {
                let reply = json!({
                    "id": id,
                    "error": { "code": -32601, "message": "not supported" }
                });
                if ws.send(Message::Text(reply.to_string())).await.is_err() {
                    break;
                }
            }
        }
    });

    (format!("ws://{addr}/devtools/browser/fake"), seen_rx)
}

/// Collects received methods until `method` shows up or five seconds pass.
pub(crate) async fn wait_for_method(
    seen: &mut mpsc::UnboundedReceiver<String>,
    method: &str,
) -> Vec<String> {
    let mut methods = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while let Ok(Some(m)) = tokio::time::timeout_at(deadline, seen.recv()).await {
        let done = m == method;
        methods.push(m);
        if done {
            break;
        }
    }
    methods
}

/// Shell script posing as a browser: records its pid, announces the given
/// DevTools URL on stderr, then sleeps until killed.
#[cfg(unix)]
pub(crate) struct FakeBrowser {
    dir: tempfile::TempDir,
    pub(crate) exe: PathBuf,
}

#[cfg(unix)]
impl FakeBrowser {
    pub(crate) fn new(ws_url: &str) -> Self {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("fake-chrome");
        let pid_file = dir.path().join("pid");
        let script = format!(
            "#!/bin/sh\necho $$ > '{}'\necho \"DevTools listening on {}\" >&2\nexec sleep 30\n",
            pid_file.display(),
            ws_url
        );
        std::fs::write(&exe, script).unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, exe }
    }

    pub(crate) fn pid(&self) -> u32 {
        std::fs::read_to_string(self.dir.path().join("pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }
}

/// True while the process exists, including as an unreaped zombie.
#[cfg(target_os = "linux")]
pub(crate) fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Browser profile directories still present under `root`.
pub(crate) fn leftover_profiles(root: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(root)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with("cdp-html-png_"))
        })
        .collect()
}
