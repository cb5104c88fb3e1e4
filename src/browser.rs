mod config;
mod temp_dir;

pub use config::{DEFAULT_TIMEOUT, LaunchConfig};

use crate::tab::Tab;
use crate::transport::Transport;
use crate::types::{CaptureOptions, ImageFormat, RenderJob};
use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use temp_dir::CustomTempDir;
use tokio::sync::{Mutex, oneshot};
use tokio::time;

/// How long `close_async` lets the browser exit on its own before killing it.
const EXIT_GRACE: Duration = Duration::from_millis(1000);

/// Holds the browser process and associated temporary directory.
/// Kills the process on drop, before the directory is removed.
#[derive(Debug)]
struct BrowserProcess {
    child: Child,
    _temp: CustomTempDir,
}

impl BrowserProcess {
    /// Polls for a voluntary exit for up to `grace`.
    async fn wait_exit(&mut self, grace: Duration) -> bool {
        let deadline = time::Instant::now() + grace;
        while time::Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return true;
            }
            time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

impl Drop for BrowserProcess {
    /// Ensures the child process is killed and waited upon before dropping temp.
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        // `_temp` is dropped after this, deleting the profile directory.
    }
}

/// A browser instance driven over CDP.
#[derive(Debug)]
pub struct Browser {
    transport: Arc<Transport>,
    /// `None` once the browser has been closed.
    process: Mutex<Option<BrowserProcess>>,
    timeout: Duration,
}

impl Browser {
    /// Starts the browser described by `config` and connects to it.
    pub async fn launch(config: LaunchConfig) -> Result<Self> {
        let exe = config.resolve_executable()?;
        let temp = CustomTempDir::new(config.profile_root(), "cdp-html-png")
            .context("Failed to create browser profile directory")?;
        let port = config::get_available_port()?;
        let args = config.browser_args(port, temp.path());

        info!("launching {} on port {}", exe.display(), port);
        debug!("browser args: {:?}", args);

        #[cfg(windows)]
        let mut cmd = {
            use std::os::windows::process::CommandExt;
            let mut c = Command::new(&exe);
            c.creation_flags(0x08000000); // CREATE_NO_WINDOW
            c
        };
        #[cfg(not(windows))]
        let mut cmd = Command::new(&exe);

        let mut child = cmd
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", exe.display()))?;
        let stderr = child.stderr.take().context("No stderr")?;

        // From here on the guard kills the process on every early return.
        let process = BrowserProcess { child, _temp: temp };

        let ws_url = time::timeout(config.timeout, Self::wait_for_ws(stderr))
            .await
            .map_err(|_| anyhow!("Timeout waiting for the DevTools endpoint"))??;
        debug!("DevTools endpoint {}", ws_url);

        let transport = Transport::new(&ws_url, config.timeout).await?;

        Ok(Self {
            transport: Arc::new(transport),
            process: Mutex::new(Some(process)),
            timeout: config.timeout,
        })
    }

    /// Reads browser stderr lines to extract the WebSocket debugging URL.
    ///
    /// The reader thread keeps draining stderr afterwards so the browser never
    /// blocks on a full pipe.
    async fn wait_for_ws(stderr: ChildStderr) -> Result<String> {
        let re = Regex::new(r"listening on (.*/devtools/browser/.*)$")?;
        let (tx, rx) = oneshot::channel();

        std::thread::spawn(move || {
            let mut tx = Some(tx);
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                if tx.is_some()
                    && let Some(cap) = re.captures(&line)
                    && let Some(tx) = tx.take()
                {
                    let _ = tx.send(cap[1].to_string());
                    continue;
                }
                log::trace!("browser: {}", line);
            }
        });

        rx.await
            .map_err(|_| anyhow!("Browser exited before printing its DevTools URL"))
    }

    /// Opens a new blank tab.
    pub async fn new_tab(&self) -> Result<Tab> {
        Tab::new(self.transport.clone()).await
    }

    /// Renders the job's HTML and captures the viewport-sized region as PNG.
    pub async fn capture(&self, job: &RenderJob) -> Result<String> {
        let tab = self.new_tab().await?;

        let result = async {
            tab.set_viewport(&job.viewport).await?;
            tab.set_content(&job.html, self.timeout).await?;
            let opts = CaptureOptions::new()
                .with_format(ImageFormat::Png)
                .with_clip(job.viewport.clip());
            tab.screenshot(&opts).await
        }
        .await;

        if let Err(e) = tab.close().await {
            warn!("Failed to close tab after capture: {:#}", e);
        }

        result
    }

    /// Closes the browser process and cleans up resources asynchronously.
    pub async fn close_async(&self) -> Result<()> {
        self.transport.shutdown().await;
        let mut lock = self.process.lock().await;
        if let Some(mut process) = lock.take() {
            if !process.wait_exit(EXIT_GRACE).await {
                debug!("browser did not exit within {:?}, killing it", EXIT_GRACE);
            }
            // Drop kills if still running, reaps the child and removes the profile.
        }
        Ok(())
    }
}
