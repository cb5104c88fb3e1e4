//! `cdp-html-png <HTML> [WIDTH] [HEIGHT]`
//!
//! Prints exactly one JSON line: `{"success":true,"data":"<base64 png>"}` or
//! `{"success":false,"error":"<message>"}`, and exits 0 or 1 accordingly.
//! Logs go to stderr (`RUST_LOG`, default `warn`).

use anyhow::{Context, Result, anyhow};
use cdp_html_png::{
    DEFAULT_HEIGHT, DEFAULT_WIDTH, DimensionError, LaunchConfig, Outcome, RenderJob, Viewport,
    parse_dimension, render,
};
use clap::Parser;
use clap::error::ErrorKind;
use env_logger::{Env, Target};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Render an HTML fragment to a base64-encoded PNG with headless Chrome.
#[derive(Parser, Debug)]
#[command(name = "cdp-html-png", version, allow_negative_numbers = true)]
struct Cli {
    /// HTML to render, or `-` to read it from stdin
    #[arg(allow_hyphen_values = true)]
    html: Option<String>,

    /// Viewport and image width in pixels (fractions are truncated)
    #[arg(default_value_t = DEFAULT_WIDTH.to_string())]
    width: String,

    /// Viewport and image height in pixels (fractions are truncated)
    #[arg(default_value_t = DEFAULT_HEIGHT.to_string())]
    height: String,

    /// Browser executable; auto-detected when omitted
    #[arg(long, env = "CHROME", value_name = "PATH")]
    chrome: Option<PathBuf>,

    /// Timeout for each browser command and for the network-idle wait
    #[arg(long, value_name = "MS", default_value_t = 30_000)]
    timeout: u64,

    /// Anything after HEIGHT is accepted and ignored
    #[arg(hide = true, allow_hyphen_values = true)]
    _rest: Vec<String>,
}

impl Cli {
    async fn job(&self) -> Result<RenderJob> {
        let html = match self.html.as_deref() {
            None => return Err(anyhow!("Missing HTML argument")),
            Some("-") => {
                let mut html = String::new();
                tokio::io::stdin()
                    .read_to_string(&mut html)
                    .await
                    .context("Failed to read HTML from stdin")?;
                html
            }
            Some(html) => html.to_string(),
        };
        let width = dimension_or(&self.width, DEFAULT_WIDTH)?;
        let height = dimension_or(&self.height, DEFAULT_HEIGHT)?;
        Ok(RenderJob::new(html, Viewport::new(width, height)))
    }

    fn launch_config(&self) -> LaunchConfig {
        let config = LaunchConfig::new().with_timeout(Duration::from_millis(self.timeout));
        match &self.chrome {
            Some(path) => config.with_executable(path),
            None => config,
        }
    }
}

/// A blank width or height means "use the default".
fn dimension_or(text: &str, default: u32) -> Result<u32, DimensionError> {
    if text.trim().is_empty() {
        Ok(default)
    } else {
        parse_dimension(text)
    }
}

async fn run(cli: Cli) -> Outcome {
    let work = async {
        let job = cli.job().await?;
        log::info!(
            "rendering {} bytes of HTML at {}x{}",
            job.html.len(),
            job.viewport.width,
            job.viewport.height
        );
        render(&job, cli.launch_config()).await
    };
    // Covers a stdin read that never ends as well as the render itself.
    let result = tokio::select! {
        res = work => res,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("Interrupted")),
    };
    Outcome::from_result(result)
}

/// First line of a clap error without its `error: ` prefix.
fn clap_message(err: &clap::Error) -> String {
    let text = err.to_string();
    let line = text.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn"))
        .target(Target::Stderr)
        .init();

    let outcome = match Cli::try_parse() {
        Ok(cli) => run(cli).await,
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::DisplayHelp
                    | ErrorKind::DisplayVersion
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            ) =>
        {
            e.exit()
        }
        Err(e) => Outcome::failed(clap_message(&e)),
    };

    let json = serde_json::to_string(&outcome).unwrap_or_else(|_| {
        r#"{"success":false,"error":"failed to serialize result"}"#.to_string()
    });
    println!("{}", json);
    ExitCode::from(outcome.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cdp-html-png").chain(args.iter().copied())).unwrap()
    }

    #[tokio::test]
    async fn defaults_to_social_preview_size() {
        let job = parse(&["<p>hi</p>"]).job().await.unwrap();
        assert_eq!(job.html, "<p>hi</p>");
        assert_eq!(job.viewport, Viewport::new(1200, 630));
    }

    #[tokio::test]
    async fn truncates_fractional_dimensions() {
        let job = parse(&["<p>hi</p>", "800.7", "600.2"]).job().await.unwrap();
        assert_eq!(job.viewport, Viewport::new(800, 600));
    }

    #[tokio::test]
    async fn missing_html_is_reported() {
        let err = parse(&[]).job().await.unwrap_err();
        assert_eq!(err.to_string(), "Missing HTML argument");
    }

    #[tokio::test]
    async fn negative_dimension_reaches_the_validator() {
        let err = parse(&["<p>hi</p>", "-5"]).job().await.unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[tokio::test]
    async fn bad_dimension_is_reported() {
        let err = parse(&["<p>hi</p>", "wide"]).job().await.unwrap_err();
        assert!(err.to_string().contains("expected an integer"));
    }

    #[tokio::test]
    async fn blank_dimensions_use_defaults() {
        let job = parse(&["<p>hi</p>", "", ""]).job().await.unwrap();
        assert_eq!(job.viewport, Viewport::new(1200, 630));

        let job = parse(&["<p>hi</p>", "  ", "400"]).job().await.unwrap();
        assert_eq!(job.viewport, Viewport::new(1200, 400));
    }

    #[tokio::test]
    async fn extra_arguments_are_ignored() {
        let job = parse(&["<p>hi</p>", "800", "600", "extra", "args"])
            .job()
            .await
            .unwrap();
        assert_eq!(job.html, "<p>hi</p>");
        assert_eq!(job.viewport, Viewport::new(800, 600));
    }

    #[test]
    fn launch_options() {
        let cli = parse(&["<p>hi</p>", "--timeout", "5000", "--chrome", "/opt/chrome"]);
        let config = cli.launch_config();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(cli.chrome, Some(PathBuf::from("/opt/chrome")));
    }

    #[test]
    fn clap_errors_become_one_line() {
        let err = Cli::try_parse_from(["cdp-html-png", "<p>", "--timeout", "soon"]).unwrap_err();
        let message = clap_message(&err);
        assert!(!message.starts_with("error:"));
        assert!(message.contains("soon"));
        assert!(!message.contains('\n'));
    }

    #[tokio::test]
    async fn invalid_input_fails_without_launching() {
        let outcome = run(parse(&["<p>hi</p>", "0", "100"])).await;
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome.data.is_none());
        assert!(outcome.error.unwrap().contains("greater than zero"));
    }
}
