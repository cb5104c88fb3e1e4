use anyhow::{Context, Result, anyhow};
use rand::prelude::SliceRandom;
use std::net;
use std::path::{Path, PathBuf};
use std::time::Duration;
use which::which;

#[cfg(windows)]
use winreg::{RegKey, enums::HKEY_LOCAL_MACHINE};

/// Default upper bound for a single CDP command and for the network-idle wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

static DEFAULT_ARGS: [&str; 18] = [
    // Containers and root users cannot use the setuid sandbox.
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--no-zygote",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--force-color-profile=srgb",
    "--hide-scrollbars",
    "--mute-audio",
    "--disable-background-networking",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-extensions",
    "--disable-sync",
    "--disable-breakpad",
    "--disable-notifications",
    "--metrics-recording-only",
    "--no-first-run",
    "--no-default-browser-check",
];

/// How to start the browser for a render.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub(crate) executable: Option<PathBuf>,
    pub(crate) profile_root: Option<PathBuf>,
    pub(crate) headless: bool,
    pub(crate) timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            executable: None,
            profile_root: None,
            headless: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl LaunchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses this executable instead of searching for one.
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    /// Directory under which the throwaway browser profile is created.
    /// Defaults to the system temp dir.
    pub fn with_profile_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_root = Some(path.into());
        self
    }

    pub(crate) fn profile_root(&self) -> PathBuf {
        self.profile_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The configured executable, or the first browser found on this machine.
    pub(crate) fn resolve_executable(&self) -> Result<PathBuf> {
        match &self.executable {
            Some(path) if path.exists() => Ok(path.clone()),
            Some(path) => Err(anyhow!("Browser executable {} does not exist", path.display())),
            None => default_executable(),
        }
    }

    pub(crate) fn browser_args(&self, debug_port: u16, user_data_dir: &Path) -> Vec<String> {
        let mut args = vec![
            format!("--remote-debugging-port={}", debug_port),
            format!("--user-data-dir={}", user_data_dir.display()),
        ];

        args.extend(DEFAULT_ARGS.iter().map(|s| s.to_string()));
        if self.headless {
            args.push("--headless=new".to_string());
        }
        args.push("about:blank".to_string());

        args
    }
}

fn default_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROME")
        && Path::new(&path).exists()
    {
        return Ok(path.into());
    }

    let apps = [
        "google-chrome-stable",
        "google-chrome",
        "chromium",
        "chromium-browser",
        "microsoft-edge-stable",
        "chrome",
        "msedge",
        "microsoft-edge",
    ];
    for app in apps {
        if let Ok(path) = which(app) {
            return Ok(path);
        }
    }

    #[cfg(target_os = "macos")]
    {
        let macos_apps = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ];
        for path in macos_apps.iter() {
            let path = Path::new(path);
            if path.exists() {
                return Ok(path.into());
            }
        }
    }

    #[cfg(windows)]
    {
        if let Some(path) = get_chrome_path_from_registry().filter(|p| p.exists()) {
            return Ok(path);
        }

        let windows_apps = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for path in windows_apps.iter() {
            let path = Path::new(path);
            if path.exists() {
                return Ok(path.into());
            }
        }
    }

    Err(anyhow!(
        "Could not auto detect a Chrome/Edge executable. Set the CHROME env var."
    ))
}

#[cfg(windows)]
fn get_chrome_path_from_registry() -> Option<PathBuf> {
    RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey("SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\App Paths\\chrome.exe")
        .and_then(|key| key.get_value::<String, _>(""))
        .map(PathBuf::from)
        .ok()
}

/// A free local port for the DevTools endpoint.
pub(crate) fn get_available_port() -> Result<u16> {
    let mut ports: Vec<u16> = (8000..9000).collect();
    ports.shuffle(&mut rand::thread_rng());
    ports
        .iter()
        .find(|port| port_is_available(**port))
        .copied()
        .context("No available debugging port in 8000..9000")
}

fn port_is_available(port: u16) -> bool {
    net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}
