//! Configuration types for an OCR run.
//!
//! All pipeline behaviour is controlled through [`OcrConfig`], built via its
//! [`OcrConfigBuilder`]. Credentials and the folder id are part of the config
//! so the pipeline never reaches for globals or prompts on its own; the
//! builder refuses to produce a config without them.

use crate::auth::Credentials;
use crate::error::OcrError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Yandex Cloud Vision batch endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://vision.api.cloud.yandex.net/vision/v1/batchAnalyze";

/// Configuration for a run.
///
/// # Example
/// ```rust
/// use yandex_ocr::{Credentials, OcrConfig};
///
/// let config = OcrConfig::builder()
///     .credentials(Credentials::ApiKey("AQVN...".into()))
///     .folder_id("b1g00000000000000000")
///     .merge_output(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 300);
/// ```
#[derive(Clone)]
pub struct OcrConfig {
    /// Per-file documents land in `<output_dir>/<stem>/`, merged ones directly here.
    pub output_dir: PathBuf,

    /// Parent of the per-file scratch directories.
    pub tmp_dir: PathBuf,

    /// Keep the scratch images instead of deleting them after each file.
    pub keep_tmp: bool,

    /// Write `all_text.{docx,txt,csv}` after the run.
    pub merge_output: bool,

    /// Resolved credentials. Required.
    pub credentials: Option<Credentials>,

    /// Folder id scoping every request. Required.
    pub folder_id: Option<String>,

    /// PDF rasterisation resolution. Range: 72–600. Default: 300.
    pub dpi: u32,

    pub enhance: EnhanceSettings,

    pub retry: RetryPolicy,

    /// Recognition feature requested from the service.
    pub feature: TextFeature,

    /// Language hints; `["*"]` asks the service to detect all languages.
    pub language_codes: Vec<String>,

    /// OCR endpoint URL. Default: [`DEFAULT_ENDPOINT`].
    pub endpoint: String,

    /// Per-request timeout. Default: 30 s.
    pub request_timeout: Duration,

    /// Pages of one file in flight at once. Default: 1 (strictly sequential).
    ///
    /// Results are always emitted in page order regardless of this value.
    pub concurrency: usize,

    pub progress_callback: Option<ProgressCallback>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("result"),
            tmp_dir: PathBuf::from("result").join("tmp"),
            keep_tmp: false,
            merge_output: false,
            credentials: None,
            folder_id: None,
            dpi: 300,
            enhance: EnhanceSettings::default(),
            retry: RetryPolicy::default(),
            feature: TextFeature::default(),
            language_codes: vec!["*".to_string()],
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(30),
            concurrency: 1,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("output_dir", &self.output_dir)
            .field("tmp_dir", &self.tmp_dir)
            .field("keep_tmp", &self.keep_tmp)
            .field("merge_output", &self.merge_output)
            .field("credentials", &self.credentials)
            .field("folder_id", &self.folder_id)
            .field("dpi", &self.dpi)
            .field("enhance", &self.enhance)
            .field("retry", &self.retry)
            .field("feature", &self.feature)
            .field("language_codes", &self.language_codes)
            .field("endpoint", &self.endpoint)
            .field("request_timeout", &self.request_timeout)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn OcrProgressCallback>"),
            )
            .finish()
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }

    /// Credentials, guaranteed present on a built config.
    pub fn credentials(&self) -> Result<&Credentials, OcrError> {
        self.credentials.as_ref().ok_or(OcrError::MissingCredentials)
    }

    /// Folder id, guaranteed present on a built config.
    pub fn folder_id(&self) -> Result<&str, OcrError> {
        self.folder_id.as_deref().ok_or(OcrError::MissingFolderId)
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tmp_dir = dir.into();
        self
    }

    pub fn keep_tmp(mut self, v: bool) -> Self {
        self.config.keep_tmp = v;
        self
    }

    pub fn merge_output(mut self, v: bool) -> Self {
        self.config.merge_output = v;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    /// Blank ids are treated as missing.
    pub fn folder_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        let id = id.trim();
        self.config.folder_id = (!id.is_empty()).then(|| id.to_string());
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn enhance(mut self, settings: EnhanceSettings) -> Self {
        self.config.enhance = settings;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn feature(mut self, feature: TextFeature) -> Self {
        self.config.feature = feature;
        self
    }

    /// Empty input resets to `["*"]`.
    pub fn language_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let codes: Vec<String> = codes
            .into_iter()
            .map(|c| {
                let c: String = c.into();
                c.trim().to_string()
            })
            .filter(|c| !c.is_empty())
            .collect();
        self.config.language_codes = if codes.is_empty() {
            vec!["*".to_string()]
        } else {
            codes
        };
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Missing credentials are reported before a missing folder id.
    pub fn build(self) -> Result<OcrConfig, OcrError> {
        let c = &self.config;
        if c.credentials.is_none() {
            return Err(OcrError::MissingCredentials);
        }
        if c.folder_id.is_none() {
            return Err(OcrError::MissingFolderId);
        }
        if c.retry.max_attempts == 0 {
            return Err(OcrError::InvalidConfig(
                "max attempts must be ≥ 1".into(),
            ));
        }
        if !c.retry.multiplier.is_finite() || c.retry.multiplier < 1.0 {
            return Err(OcrError::InvalidConfig(format!(
                "retry multiplier must be a finite number ≥ 1.0, got {}",
                c.retry.multiplier
            )));
        }
        c.enhance.validate()?;
        if c.endpoint.trim().is_empty() {
            return Err(OcrError::InvalidConfig("endpoint must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enhancement settings ─────────────────────────────────────────────────

/// Knobs of the fixed preprocessing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnhanceSettings {
    /// Images whose longest side is below this are upscaled ×2. Default: 1000.
    pub upscale_below: u32,
    /// Contrast factor (1.0 = unchanged). Default: 1.8.
    pub contrast: f32,
    /// Sharpness factor (1.0 = unchanged). Default: 2.0.
    pub sharpness: f32,
    /// Luminance threshold; darker pixels become black. Default: 140.
    pub threshold: u8,
    /// Upload ceiling for the encoded JPEG. Default: 1,000,000 bytes.
    pub max_bytes: usize,
    /// First JPEG quality tried. Default: 85.
    pub start_quality: u8,
    /// Quality decrement per re-encode. Default: 5.
    pub quality_step: u8,
    /// Lowest quality tried. Default: 30.
    pub min_quality: u8,
}

impl Default for EnhanceSettings {
    fn default() -> Self {
        Self {
            upscale_below: 1000,
            contrast: 1.8,
            sharpness: 2.0,
            threshold: 140,
            max_bytes: 1_000_000,
            start_quality: 85,
            quality_step: 5,
            min_quality: 30,
        }
    }
}

impl EnhanceSettings {
    /// Upper bound on JPEG encodes for one page.
    pub fn max_encodes(&self) -> usize {
        let span = self.start_quality.saturating_sub(self.min_quality) as usize;
        span.div_ceil(self.quality_step.max(1) as usize) + 1
    }

    fn validate(&self) -> Result<(), OcrError> {
        if self.quality_step == 0 {
            return Err(OcrError::InvalidConfig("quality step must be ≥ 1".into()));
        }
        if self.min_quality == 0 || self.start_quality > 100 {
            return Err(OcrError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}..{}",
                self.min_quality, self.start_quality
            )));
        }
        if self.min_quality > self.start_quality {
            return Err(OcrError::InvalidConfig(format!(
                "minimum quality {} is above start quality {}",
                self.min_quality, self.start_quality
            )));
        }
        Ok(())
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────

/// Upper bound on a single backoff wait.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Backoff applied to HTTP 429 responses only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Default: 5.
    pub max_attempts: u32,
    /// Wait after the first 429. Default: 5 s.
    pub initial_delay: Duration,
    /// Growth factor between waits. Default: 2.0.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based): `initial * multiplier^(retry-1)`,
    /// capped at [`MAX_RETRY_DELAY`].
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }

    /// Parse a user-supplied initial delay in seconds.
    pub fn initial_delay_from_secs(secs: f64) -> Result<Duration, OcrError> {
        Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| *d <= MAX_RETRY_DELAY)
            .ok_or_else(|| {
                OcrError::InvalidConfig(format!(
                    "retry delay must be between 0 and {} seconds, got {}",
                    MAX_RETRY_DELAY.as_secs(),
                    secs
                ))
            })
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which text-recognition feature to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextFeature {
    /// `DOCUMENT_TEXT_DETECTION`, full-page document layout. (default)
    #[default]
    Document,
    /// `TEXT_DETECTION`, plain text detection.
    Text,
}

impl TextFeature {
    pub fn api_name(self) -> &'static str {
        match self {
            TextFeature::Document => "DOCUMENT_TEXT_DETECTION",
            TextFeature::Text => "TEXT_DETECTION",
        }
    }
}
