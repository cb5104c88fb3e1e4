use serde::Serialize;
use thiserror::Error;

/// Default viewport width, matching common social-preview images.
pub const DEFAULT_WIDTH: u32 = 1200;
/// Default viewport height, matching common social-preview images.
pub const DEFAULT_HEIGHT: u32 = 630;

/// Viewport configuration for controlling page dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Viewport width in CSS pixels.
    pub width: u32,
    /// Viewport height in CSS pixels.
    pub height: u32,
    /// Device scale factor (DPR). Default is 1.0.
    pub device_scale_factor: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl Viewport {
    /// Creates a new viewport with specified dimensions and a scale factor of 1.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            device_scale_factor: 1.0,
        }
    }

    /// The clip covering exactly this viewport from the top-left corner.
    pub fn clip(&self) -> ClipRegion {
        ClipRegion::new(0.0, 0.0, self.width as f64, self.height as f64)
    }
}

/// Screenshot format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }
}

/// Defines a rectangular region for clipping screenshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

impl ClipRegion {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            scale: 1.0,
        }
    }
}

/// Configuration options for a page screenshot.
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub(crate) format: ImageFormat,
    pub(crate) quality: Option<u8>,
    pub(crate) clip: Option<ClipRegion>,
}

impl CaptureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    /// JPEG quality, capped at 100. Ignored for PNG.
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality.min(100));
        self
    }

    pub fn with_clip(mut self, clip: ClipRegion) -> Self {
        self.clip = Some(clip);
        self
    }

    /// Parameters for `Page.captureScreenshot`.
    pub(crate) fn to_params(&self) -> serde_json::Value {
        let mut params = serde_json::json!({
            "format": self.format.as_str(),
            "fromSurface": true,
            "captureBeyondViewport": true,
        });
        if self.format == ImageFormat::Jpeg {
            params["quality"] = serde_json::json!(self.quality.unwrap_or(90));
        }
        if let Some(clip) = self.clip {
            params["clip"] = serde_json::json!({
                "x": clip.x,
                "y": clip.y,
                "width": clip.width,
                "height": clip.height,
                "scale": clip.scale
            });
        }
        params
    }
}

/// A single HTML-to-PNG render request.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub html: String,
    pub viewport: Viewport,
}

impl RenderJob {
    pub fn new(html: impl Into<String>, viewport: Viewport) -> Self {
        Self {
            html: html.into(),
            viewport,
        }
    }
}

/// The JSON object printed on stdout: `{success, data?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    pub fn ok(data: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Maps a render result, flattening the error's context chain into one line.
    pub fn from_result(result: anyhow::Result<String>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failed(format!("{e:#}")),
        }
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> u8 {
        if self.success { 0 } else { 1 }
    }
}

/// Rejected width or height argument.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DimensionError {
    #[error("invalid dimension {0:?}: expected an integer")]
    NotANumber(String),
    #[error("invalid dimension {0:?}: must be greater than zero")]
    NotPositive(String),
    #[error("invalid dimension {0:?}: too large")]
    TooLarge(String),
}

/// Parses a width or height, truncating anything after the leading digits.
///
/// `"800.9"` gives 800 and `"640px"` gives 640.
pub fn parse_dimension(text: &str) -> Result<u32, DimensionError> {
    let trimmed = text.trim_start();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits_len = unsigned
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return Err(DimensionError::NotANumber(text.to_string()));
    }

    let digits = &unsigned[..digits_len];
    if negative || digits.bytes().all(|b| b == b'0') {
        return Err(DimensionError::NotPositive(text.to_string()));
    }
    digits
        .parse::<u32>()
        .map_err(|_| DimensionError::TooLarge(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integers() {
        assert_eq!(parse_dimension("1200"), Ok(1200));
        assert_eq!(parse_dimension("  630"), Ok(630));
        assert_eq!(parse_dimension("+42"), Ok(42));
    }

    #[test]
    fn truncates_fractions_and_suffixes() {
        assert_eq!(parse_dimension("800.9"), Ok(800));
        assert_eq!(parse_dimension("640px"), Ok(640));
        assert_eq!(parse_dimension("007"), Ok(7));
    }

    #[test]
    fn rejects_bad_dimensions() {
        assert_eq!(
            parse_dimension("abc"),
            Err(DimensionError::NotANumber("abc".into()))
        );
        assert_eq!(parse_dimension(""), Err(DimensionError::NotANumber("".into())));
        assert_eq!(parse_dimension(".5"), Err(DimensionError::NotANumber(".5".into())));
        assert_eq!(
            parse_dimension("-10"),
            Err(DimensionError::NotPositive("-10".into()))
        );
        assert_eq!(parse_dimension("0"), Err(DimensionError::NotPositive("0".into())));
        assert_eq!(
            parse_dimension("99999999999"),
            Err(DimensionError::TooLarge("99999999999".into()))
        );
    }

    #[test]
    fn outcome_json_shape() {
        let ok = serde_json::to_string(&Outcome::ok("iVBORw0KGgo=".into())).unwrap();
        assert_eq!(ok, r#"{"success":true,"data":"iVBORw0KGgo="}"#);

        let failed = serde_json::to_string(&Outcome::failed("Chrome not found")).unwrap();
        assert_eq!(failed, r#"{"success":false,"error":"Chrome not found"}"#);
    }

    #[test]
    fn outcome_flattens_context_chain() {
        use anyhow::Context;
        let result: anyhow::Result<String> = Err(anyhow::anyhow!("connection refused"))
            .context("Failed to launch browser");
        let outcome = Outcome::from_result(result);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Failed to launch browser: connection refused")
        );
        assert_eq!(Outcome::ok(String::new()).exit_code(), 0);
    }

    #[test]
    fn viewport_clip_covers_viewport() {
        let clip = Viewport::new(300, 200).clip();
        assert_eq!(clip, ClipRegion::new(0.0, 0.0, 300.0, 200.0));
        assert_eq!(Viewport::default(), Viewport::new(1200, 630));
    }

    #[test]
    fn capture_params() {
        let png = CaptureOptions::new()
            .with_clip(Viewport::new(10, 20).clip())
            .to_params();
        assert_eq!(png["format"], "png");
        assert_eq!(png["clip"]["width"], 10.0);
        assert_eq!(png["clip"]["height"], 20.0);
        assert_eq!(png["clip"]["scale"], 1.0);
        assert!(png.get("quality").is_none());

        let jpeg = CaptureOptions::new()
            .with_format(ImageFormat::Jpeg)
            .with_quality(150)
            .to_params();
        assert_eq!(jpeg["quality"], 100);
        assert!(jpeg.get("clip").is_none());
    }
}
