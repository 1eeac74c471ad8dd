//! Credential resolution for the Yandex Cloud Vision API.
//!
//! The OCR endpoint accepts either a short-lived IAM token
//! (`Authorization: Bearer …`) or a static API key
//! (`Authorization: Api-Key …`). An IAM token can also be minted from a
//! long-lived OAuth token through the IAM token endpoint; that exchange
//! swallows every failure into `None` so resolution can fall through to the
//! next source.
//!
//! Resolution order (first hit wins):
//!
//! 1. IAM token (flag, then `YANDEX_IAM_TOKEN`)
//! 2. API key (flag, then `YANDEX_API_KEY`)
//! 3. OAuth exchange (flag, then `YANDEX_OAUTH_TOKEN`)

use crate::error::OcrError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// IAM token issuance endpoint.
pub const IAM_TOKEN_URL: &str = "https://iam.api.cloud.yandex.net/iam/v1/tokens";

pub const ENV_IAM_TOKEN: &str = "YANDEX_IAM_TOKEN";
pub const ENV_API_KEY: &str = "YANDEX_API_KEY";
pub const ENV_OAUTH_TOKEN: &str = "YANDEX_OAUTH_TOKEN";
pub const ENV_FOLDER_ID: &str = "YANDEX_FOLDER_ID";

/// Credentials accepted by the OCR endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Short-lived IAM session token.
    Bearer(String),
    /// Static service-account API key.
    ApiKey(String),
}

impl Credentials {
    /// Value of the `Authorization` header.
    pub fn header_value(&self) -> String {
        match self {
            Credentials::Bearer(t) => format!("Bearer {t}"),
            Credentials::ApiKey(k) => format!("Api-Key {k}"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::Bearer(_) => "iam-token",
            Credentials::ApiKey(_) => "api-key",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Bearer(t) => f.debug_tuple("Bearer").field(&mask_secret(t)).finish(),
            Credentials::ApiKey(k) => f.debug_tuple("ApiKey").field(&mask_secret(k)).finish(),
        }
    }
}

/// Raw credential material collected by an adapter (CLI flags merged with
/// environment variables). Blank strings count as absent.
#[derive(Debug, Clone, Default)]
pub struct CredentialSources {
    pub iam_token: Option<String>,
    pub api_key: Option<String>,
    pub oauth_token: Option<String>,
}

impl CredentialSources {
    /// Read all three values from the process environment.
    pub fn from_env() -> Self {
        Self {
            iam_token: std::env::var(ENV_IAM_TOKEN).ok(),
            api_key: std::env::var(ENV_API_KEY).ok(),
            oauth_token: std::env::var(ENV_OAUTH_TOKEN).ok(),
        }
    }

    /// Fill values missing here from `other`; values already set win.
    pub fn or(self, other: CredentialSources) -> Self {
        Self {
            iam_token: non_blank(self.iam_token).or_else(|| non_blank(other.iam_token)),
            api_key: non_blank(self.api_key).or_else(|| non_blank(other.api_key)),
            oauth_token: non_blank(self.oauth_token).or_else(|| non_blank(other.oauth_token)),
        }
    }

    /// True when no source holds a non-blank value.
    pub fn is_empty(&self) -> bool {
        [&self.iam_token, &self.api_key, &self.oauth_token]
            .iter()
            .all(|v| non_blank((*v).clone()).is_none())
    }

    /// Resolve without touching the network: IAM token, then API key.
    pub fn resolve_static(&self) -> Option<Credentials> {
        if let Some(t) = non_blank(self.iam_token.clone()) {
            return Some(Credentials::Bearer(t));
        }
        non_blank(self.api_key.clone()).map(Credentials::ApiKey)
    }
}

/// Resolve credentials, exchanging the OAuth token if nothing static is set.
///
/// # Errors
/// [`OcrError::MissingCredentials`] when every source is absent or the OAuth
/// exchange failed.
pub async fn resolve_credentials(
    sources: &CredentialSources,
    exchange: &dyn TokenExchange,
) -> Result<Credentials, OcrError> {
    if let Some(creds) = sources.resolve_static() {
        debug!("Using {} credentials", creds.kind());
        return Ok(creds);
    }

    if let Some(oauth) = non_blank(sources.oauth_token.clone()) {
        info!(
            "Exchanging OAuth token ({}) for an IAM token",
            mask_secret(&oauth)
        );
        if let Some(session) = exchange.exchange(&oauth).await {
            info!(
                expires_at = session.expires_at.as_deref().unwrap_or("<unknown>"),
                "Obtained IAM token {}",
                mask_secret(&session.iam_token)
            );
            return Ok(Credentials::Bearer(session.iam_token));
        }
        warn!("OAuth exchange failed; no other credential source available");
    }

    Err(OcrError::MissingCredentials)
}

// ── OAuth → IAM exchange ─────────────────────────────────────────────────

/// A freshly issued IAM token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    #[serde(rename = "iamToken")]
    pub iam_token: String,
    /// RFC 3339 timestamp as returned by the service.
    #[serde(rename = "expiresAt", default)]
    pub expires_at: Option<String>,
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("iam_token", &mask_secret(&self.iam_token))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Exchanges a long-lived OAuth token for an IAM token.
#[async_trait::async_trait]
pub trait TokenExchange: Send + Sync {
    /// `None` on any failure (network, non-200, malformed body).
    async fn exchange(&self, oauth_token: &str) -> Option<SessionToken>;
}

/// [`TokenExchange`] against the public IAM endpoint.
#[derive(Debug, Clone)]
pub struct IamTokenExchange {
    client: reqwest::Client,
    url: String,
}

impl IamTokenExchange {
    pub fn new(timeout: Duration) -> Result<Self, OcrError> {
        Self::with_url(IAM_TOKEN_URL, timeout)
    }

    pub fn with_url(url: impl Into<String>, timeout: Duration) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcrError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl TokenExchange for IamTokenExchange {
    async fn exchange(&self, oauth_token: &str) -> Option<SessionToken> {
        let body = serde_json::json!({ "yandexPassportOauthToken": oauth_token });
        let response = match self.client.post(&self.url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("IAM token request failed: {}", e);
                return None;
            }
        };
        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!("IAM token response unreadable: {}", e);
                return None;
            }
        };
        parse_token_response(status, &text)
    }
}

/// Interpret the IAM endpoint's reply; anything but a 200 with a non-empty
/// `iamToken` is `None`.
pub fn parse_token_response(status: u16, body: &str) -> Option<SessionToken> {
    if status != 200 {
        warn!(
            status,
            "IAM token endpoint refused the exchange: {}",
            truncate(body, 300)
        );
        return None;
    }
    match serde_json::from_str::<SessionToken>(body) {
        Ok(token) if !token.iam_token.trim().is_empty() => Some(token),
        Ok(_) => {
            warn!("IAM token endpoint returned an empty token");
            None
        }
        Err(e) => {
            warn!("IAM token response is not valid JSON: {}", e);
            None
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Mask a secret for display: `abcd...wxyz`, or all `*` when short.
pub fn mask_secret(s: &str) -> String {
    const KEEP: usize = 4;
    let chars: Vec<char> = s.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    if chars.len() <= KEEP * 2 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..KEEP].iter().collect();
    let tail: String = chars[chars.len() - KEEP..].iter().collect();
    format!("{head}...{tail}")
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedExchange {
        token: Option<SessionToken>,
        calls: AtomicUsize,
    }

    impl FixedExchange {
        fn new(token: Option<&str>) -> Self {
            Self {
                token: token.map(|t| SessionToken {
                    iam_token: t.to_string(),
                    expires_at: Some("2025-07-29T18:50:37Z".into()),
                }),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl TokenExchange for FixedExchange {
        async fn exchange(&self, _oauth_token: &str) -> Option<SessionToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.token.clone()
        }
    }

    #[test]
    fn header_encoding() {
        assert_eq!(Credentials::Bearer("t1.abc".into()).header_value(), "Bearer t1.abc");
        assert_eq!(Credentials::ApiKey("AQVN".into()).header_value(), "Api-Key AQVN");
    }

    #[test]
    fn debug_never_prints_secret() {
        let c = Credentials::Bearer("t1.9euelZrNl8iZlZmPmYyQ".into());
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("9euelZrNl8iZ"), "got: {dbg}");
        assert!(dbg.contains("t1.9...mYyQ"), "got: {dbg}");
    }

    #[test]
    fn mask_secret_short_and_long() {
        assert_eq!(mask_secret(""), "");
        assert_eq!(mask_secret("abcdefgh"), "********");
        assert_eq!(mask_secret("abcdefghij"), "abcd...ghij");
    }

    #[test]
    fn flag_beats_env_per_value() {
        let flags = CredentialSources {
            iam_token: Some("from-flag".into()),
            ..Default::default()
        };
        let env = CredentialSources {
            iam_token: Some("from-env".into()),
            api_key: Some("key-env".into()),
            oauth_token: None,
        };
        let merged = flags.or(env);
        assert_eq!(merged.iam_token.as_deref(), Some("from-flag"));
        assert_eq!(merged.api_key.as_deref(), Some("key-env"));
    }

    #[test]
    fn blank_flag_falls_back_to_env() {
        let flags = CredentialSources {
            api_key: Some("  ".into()),
            ..Default::default()
        };
        let env = CredentialSources {
            api_key: Some("key-env".into()),
            ..Default::default()
        };
        assert_eq!(flags.or(env).api_key.as_deref(), Some("key-env"));
    }

    #[test]
    fn blank_sources_are_empty() {
        assert!(CredentialSources::default().is_empty());
        let blank = CredentialSources {
            iam_token: Some(" ".into()),
            api_key: Some(String::new()),
            oauth_token: None,
        };
        assert!(blank.is_empty());
        let oauth_only = CredentialSources {
            oauth_token: Some("y0_oauth".into()),
            ..Default::default()
        };
        assert!(!oauth_only.is_empty());
    }

    #[tokio::test]
    async fn iam_token_preferred_over_api_key() {
        let sources = CredentialSources {
            iam_token: Some("t1.x".into()),
            api_key: Some("AQVN".into()),
            oauth_token: Some("y0_oauth".into()),
        };
        let exchange = FixedExchange::new(Some("t1.fresh"));
        let creds = resolve_credentials(&sources, &exchange).await.unwrap();
        assert_eq!(creds, Credentials::Bearer("t1.x".into()));
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn api_key_used_without_iam_token() {
        let sources = CredentialSources {
            api_key: Some("AQVN".into()),
            ..Default::default()
        };
        let creds = resolve_credentials(&sources, &FixedExchange::new(None))
            .await
            .unwrap();
        assert_eq!(creds, Credentials::ApiKey("AQVN".into()));
    }

    #[tokio::test]
    async fn oauth_exchange_is_last_resort() {
        let sources = CredentialSources {
            oauth_token: Some("y0_oauth".into()),
            ..Default::default()
        };
        let exchange = FixedExchange::new(Some("t1.fresh"));
        let creds = resolve_credentials(&sources, &exchange).await.unwrap();
        assert_eq!(creds, Credentials::Bearer("t1.fresh".into()));
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_exchange_is_missing_credentials() {
        let sources = CredentialSources {
            oauth_token: Some("y0_oauth".into()),
            ..Default::default()
        };
        let err = resolve_credentials(&sources, &FixedExchange::new(None))
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::MissingCredentials));
    }

    #[tokio::test]
    async fn nothing_configured_is_missing_credentials() {
        let exchange = FixedExchange::new(Some("t1.unused"));
        let err = resolve_credentials(&CredentialSources::default(), &exchange)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::MissingCredentials));
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn token_response_success() {
        let body = r#"{"iamToken":"t1.abc","expiresAt":"2025-07-29T04:16:59.559278450Z"}"#;
        let token = parse_token_response(200, body).unwrap();
        assert_eq!(token.iam_token, "t1.abc");
        assert_eq!(
            token.expires_at.as_deref(),
            Some("2025-07-29T04:16:59.559278450Z")
        );
    }

    #[test]
    fn token_response_failures_are_none() {
        assert!(parse_token_response(401, r#"{"code":16,"message":"bad"}"#).is_none());
        assert!(parse_token_response(200, "<html>").is_none());
        assert!(parse_token_response(200, r#"{"iamToken":""}"#).is_none());
        assert!(parse_token_response(200, r#"{"expiresAt":"x"}"#).is_none());
    }
}
