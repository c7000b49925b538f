use std::fmt;
use thiserror::Error;
use url::Url;

const TOKEN_PARAM: &str = "token";
const REDACTED: &str = "***";

/// Short-lived bearer capability scoped to one session. Anyone holding it can
/// complete the grading flow, so neither `Debug` nor `Display` prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({REDACTED})")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingUrlError {
    #[error("pairing url is not a valid url: {0}")]
    Invalid(String),
    #[error("pairing url does not name a session")]
    MissingSessionId,
    #[error("pairing url for session {session_id} carries no access token")]
    MissingCredential { session_id: String },
}

/// Locator of the form `<mobile-entry-point>/<sessionId>?token=<credential>`.
#[derive(Clone)]
pub struct PairingUrl {
    url: Url,
    session_id: String,
    credential: Credential,
}

impl PairingUrl {
    pub fn parse(raw: &str) -> Result<Self, PairingUrlError> {
        let url = Url::parse(raw.trim()).map_err(|err| PairingUrlError::Invalid(err.to_string()))?;
        let session_id = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .ok_or(PairingUrlError::MissingSessionId)?;
        let credential = url
            .query_pairs()
            .find(|(key, _)| key == TOKEN_PARAM)
            .and_then(|(_, value)| Credential::new(value.into_owned()))
            .ok_or_else(|| PairingUrlError::MissingCredential {
                session_id: session_id.clone(),
            })?;
        Ok(Self {
            url,
            session_id,
            credential,
        })
    }

    pub fn build(
        entry_point: &Url,
        session_id: &str,
        credential: &Credential,
    ) -> Result<Self, PairingUrlError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(PairingUrlError::MissingSessionId);
        }
        let mut url = entry_point.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| PairingUrlError::Invalid(format!("{entry_point} cannot carry a path")))?
            .pop_if_empty()
            .push(session_id);
        url.query_pairs_mut()
            .append_pair(TOKEN_PARAM, credential.expose());
        Ok(Self {
            url,
            session_id: session_id.to_string(),
            credential: credential.clone(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Full URL including the credential. Only hand this to the encoder.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// URL with the credential masked, suitable for log lines.
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        let pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .map(|(key, value)| {
                if key == TOKEN_PARAM {
                    (key.into_owned(), REDACTED.to_string())
                } else {
                    (key.into_owned(), value.into_owned())
                }
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }

    pub fn into_parts(self) -> (String, Credential) {
        (self.session_id, self.credential)
    }
}

impl fmt::Debug for PairingUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingUrl")
            .field("url", &self.redacted())
            .field("session_id", &self.session_id)
            .finish()
    }
}
