/*!
Render an HTML fragment to a PNG of an exact pixel size with a headless
Chrome/Edge driven over the Chrome DevTools Protocol (CDP).

```no_run
use cdp_html_png::{LaunchConfig, RenderJob, Viewport, render};

# async fn run() -> anyhow::Result<()> {
let job = RenderJob::new("<h1>Hello</h1>", Viewport::new(1200, 630));
let png_base64 = render(&job, LaunchConfig::default()).await?;
# Ok(())
# }
```
*/

mod browser;
mod network;
mod tab;
#[cfg(test)]
mod testing;
mod transport;
mod types;
mod utils;

pub use browser::{Browser, DEFAULT_TIMEOUT, LaunchConfig};
pub use tab::Tab;
pub use types::{
    CaptureOptions, ClipRegion, DEFAULT_HEIGHT, DEFAULT_WIDTH, DimensionError, ImageFormat,
    Outcome, RenderJob, Viewport, parse_dimension,
};

use anyhow::{Context, Result};
use log::warn;

/// Launches a browser, renders `job` and returns the base64-encoded PNG.
///
/// The browser is shut down whether or not the capture succeeds.
pub async fn render(job: &RenderJob, config: LaunchConfig) -> Result<String> {
    let browser = Browser::launch(config)
        .await
        .context("Failed to launch browser")?;

    let result = browser.capture(job).await;

    if let Err(e) = browser.close_async().await {
        warn!("Failed to close browser: {:#}", e);
    }
    result
}
