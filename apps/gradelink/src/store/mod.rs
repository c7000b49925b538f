pub mod memory;

use async_trait::async_trait;
use gradelink_proto::{
    CaptureMetadata, CreateSessionResponse, Credential, SessionContext, StatusResponse,
    TaskMetadata,
};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use url::Url;

pub use memory::{InMemorySessionStore, MemoryStoreSettings};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct StoreConfig {
    base_url: Url,
    access_token: Option<String>,
}

impl StoreConfig {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let mut base = base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(StoreError::InvalidConfig(
                "session store base url cannot be empty".into(),
            ));
        }
        if !base.contains("://") {
            let inferred_scheme = infer_scheme(&base);
            base = format!("{inferred_scheme}{base}");
        }
        // Relative joins drop the last path segment unless it ends in '/'.
        if !base.ends_with('/') {
            base.push('/');
        }
        let parsed = Url::parse(&base).map_err(|err| {
            StoreError::InvalidConfig(format!("invalid session store url: {err}"))
        })?;
        Ok(Self {
            base_url: parsed,
            access_token: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        self.base_url.join(path).map_err(|err| {
            StoreError::InvalidConfig(format!("invalid endpoint '{path}': {err}"))
        })
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url.as_str())
            .field("access_token_present", &self.access_token.is_some())
            .finish()
    }
}

fn infer_scheme(base: &str) -> &'static str {
    let host_part = base
        .split('/')
        .next()
        .unwrap_or(base)
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(base);
    let host_lower = host_part.to_ascii_lowercase();
    if host_lower.starts_with("localhost")
        || host_lower.starts_with("0.0.0.0")
        || host_lower.starts_with("127.")
        || host_lower == "::1"
        || host_lower.starts_with("10.")
        || host_lower.starts_with("192.168.")
        || host_lower
            .strip_prefix("172.")
            .and_then(|rest| rest.split('.').next())
            .and_then(|octet| octet.parse::<u8>().ok())
            .map(|octet| (16..32).contains(&octet))
            .unwrap_or(false)
    {
        "http://"
    } else {
        "https://"
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid session store configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("session store rejected the request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to encode request: {0}")]
    Encode(String),
}

impl StoreError {
    /// The store refused this session or credential; retrying the same
    /// request cannot succeed.
    pub fn is_rejection(&self) -> bool {
        matches!(self, StoreError::Rejected { .. })
    }

    pub fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        StoreError::Rejected {
            status,
            message: message.into(),
        }
    }
}

fn is_rejection_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND
            | StatusCode::CONFLICT
            | StatusCode::GONE
    )
}

/// Image bytes plus everything the store needs to attribute them.
#[derive(Debug, Clone, Copy)]
pub struct ImageUpload<'a> {
    pub session_id: &'a str,
    pub credential: &'a Credential,
    pub bytes: &'a [u8],
    pub mime: &'a str,
    pub captured_at: OffsetDateTime,
    pub metadata: &'a CaptureMetadata,
}

/// Remote session store. The initiator authenticates with its own access
/// token; acceptor calls carry the pairing credential.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        task: &TaskMetadata,
    ) -> Result<CreateSessionResponse, StoreError>;

    async fn session_status(&self, session_id: &str) -> Result<StatusResponse, StoreError>;

    async fn validate_session(
        &self,
        session_id: &str,
        credential: &Credential,
    ) -> Result<SessionContext, StoreError>;

    async fn mark_connected(
        &self,
        session_id: &str,
        credential: &Credential,
    ) -> Result<(), StoreError>;

    async fn submit_image(&self, upload: ImageUpload<'_>) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn SessionStore>;

pub struct HttpSessionStore {
    config: StoreConfig,
    client: reqwest::Client,
}

impl HttpSessionStore {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn with_access_token(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.access_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if is_rejection_status(status) {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::rejected(status, rejection_message(status, &body)));
    }
    Err(StoreError::HttpStatus(status))
}

fn rejection_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["detail", "message", "error"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
    });
    from_json
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty() && trimmed.len() <= 200).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request rejected")
                .to_string()
        })
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn create_session(
        &self,
        task: &TaskMetadata,
    ) -> Result<CreateSessionResponse, StoreError> {
        let endpoint = self.config.endpoint("api/create-grading-session")?;
        let request = self.with_access_token(self.client.post(endpoint)).json(task);
        let response = ensure_success(request.send().await?).await?;
        let payload = response.json::<CreateSessionResponse>().await?;
        debug!(
            target: "gradelink::store",
            session_id = %payload.session_id,
            expires_in = payload.expires_in,
            "grading session created"
        );
        Ok(payload)
    }

    async fn session_status(&self, session_id: &str) -> Result<StatusResponse, StoreError> {
        let endpoint = self
            .config
            .endpoint(&format!("api/grading-session/{session_id}/result"))?;
        let request = self.with_access_token(self.client.get(endpoint));
        let response = ensure_success(request.send().await?).await?;
        Ok(response.json::<StatusResponse>().await?)
    }

    async fn validate_session(
        &self,
        session_id: &str,
        credential: &Credential,
    ) -> Result<SessionContext, StoreError> {
        let endpoint = self
            .config
            .endpoint(&format!("api/validate-grading-session/{session_id}"))?;
        let response = self
            .client
            .get(endpoint)
            .bearer_auth(credential.expose())
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json::<SessionContext>().await?)
    }

    async fn mark_connected(
        &self,
        session_id: &str,
        credential: &Credential,
    ) -> Result<(), StoreError> {
        let endpoint = self
            .config
            .endpoint(&format!("api/grading-session/{session_id}/connect-mobile"))?;
        let response = self
            .client
            .patch(endpoint)
            .bearer_auth(credential.expose())
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn submit_image(&self, upload: ImageUpload<'_>) -> Result<(), StoreError> {
        let endpoint = self.config.endpoint("api/submit-grading-image")?;
        let timestamp = upload
            .captured_at
            .format(&Rfc3339)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        let metadata = serde_json::to_string(upload.metadata)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        let image = Part::bytes(upload.bytes.to_vec())
            .file_name(format!("submission_{}.jpg", upload.session_id))
            .mime_str(upload.mime)?;
        let form = Form::new()
            .part("image", image)
            .text("sessionId", upload.session_id.to_string())
            .text("timestamp", timestamp)
            .text("imageSize", upload.bytes.len().to_string())
            .text("metadata", metadata);
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(upload.credential.expose())
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        ensure_success(response).await?;
        debug!(
            target: "gradelink::store",
            session_id = %upload.session_id,
            bytes = upload.bytes.len(),
            "grading image submitted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_https_for_public_hosts() {
        assert_eq!(infer_scheme("api.gradelink.dev"), "https://");
        assert_eq!(infer_scheme("gradelink.dev/some/path"), "https://");
        assert_eq!(infer_scheme("13.215.162.4"), "https://");
    }

    #[test]
    fn defaults_to_http_for_local_hosts() {
        for host in [
            "localhost",
            "localhost:8000",
            "127.0.0.1",
            "127.0.0.1:8080",
            "0.0.0.0:8000",
            "10.0.0.5",
            "192.168.1.10",
            "172.16.0.1",
            "172.31.255.255",
            "[::1]",
        ] {
            assert_eq!(infer_scheme(host), "http://");
        }
    }

    #[test]
    fn store_config_normalizes_base_path() {
        let config = StoreConfig::new("api.gradelink.dev/v1").unwrap();
        assert_eq!(config.base_url().as_str(), "https://api.gradelink.dev/v1/");
        let endpoint = config.endpoint("api/create-grading-session").unwrap();
        assert_eq!(
            endpoint.as_str(),
            "https://api.gradelink.dev/v1/api/create-grading-session"
        );

        let local = StoreConfig::new("localhost:8000").unwrap();
        assert_eq!(local.base_url().as_str(), "http://localhost:8000/");
        assert!(StoreConfig::new("   ").is_err());
    }

    #[test]
    fn access_token_is_trimmed_and_hidden_from_debug() {
        let config = StoreConfig::new("localhost:8000")
            .unwrap()
            .with_access_token(Some("  secret-token ".into()));
        assert_eq!(config.access_token(), Some("secret-token"));
        assert!(!format!("{config:?}").contains("secret-token"));

        let blank = StoreConfig::new("localhost:8000")
            .unwrap()
            .with_access_token(Some("   ".into()));
        assert_eq!(blank.access_token(), None);
    }

    #[test]
    fn rejection_statuses_are_classified() {
        for status in [
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
            StatusCode::CONFLICT,
            StatusCode::GONE,
        ] {
            assert!(is_rejection_status(status));
        }
        assert!(!is_rejection_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_rejection_status(StatusCode::BAD_GATEWAY));
        assert!(StoreError::rejected(StatusCode::GONE, "expired").is_rejection());
        assert!(!StoreError::Unavailable("down".into()).is_rejection());
    }

    #[test]
    fn rejection_message_prefers_structured_detail() {
        assert_eq!(
            rejection_message(StatusCode::GONE, r#"{"detail":"Session expired"}"#),
            "Session expired"
        );
        assert_eq!(
            rejection_message(StatusCode::UNAUTHORIZED, "bad token"),
            "bad token"
        );
        assert_eq!(rejection_message(StatusCode::NOT_FOUND, ""), "Not Found");
    }
}
