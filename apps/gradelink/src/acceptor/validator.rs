use crate::store::{SharedStore, StoreError};
use gradelink_proto::{Credential, PairingUrl, PairingUrlError, SessionContext};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ValidationFailure {
    #[error("pairing link carries no access token")]
    MissingCredential,
    #[error("pairing link is malformed: {0}")]
    MalformedUrl(PairingUrlError),
    #[error("session rejected: {0}")]
    Rejected(StoreError),
    #[error("session store unreachable: {0}")]
    Unreachable(StoreError),
    #[error("session validation already ran for this page load")]
    AlreadyAttempted,
}

impl ValidationFailure {
    pub fn user_message(&self) -> &'static str {
        match self {
            ValidationFailure::MissingCredential | ValidationFailure::MalformedUrl(_) => {
                "Invalid QR code. Please scan the code shown on your computer again."
            }
            ValidationFailure::Rejected(_) => {
                "This grading session has expired or is no longer valid. Please generate a new QR code on your computer."
            }
            ValidationFailure::Unreachable(_) => {
                "Could not reach the grading service. Check your connection, then scan the code again."
            }
            ValidationFailure::AlreadyAttempted => {
                "This page already checked its session. Scan the code again to start over."
            }
        }
    }

    /// Distinguishes a dead session from a transport problem.
    pub fn is_network(&self) -> bool {
        matches!(self, ValidationFailure::Unreachable(_))
    }
}

impl From<PairingUrlError> for ValidationFailure {
    fn from(err: PairingUrlError) -> Self {
        match err {
            PairingUrlError::MissingCredential { .. } => ValidationFailure::MissingCredential,
            other => ValidationFailure::MalformedUrl(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorState {
    Validating,
    Valid,
    Invalid(String),
}

/// A session the store accepted for this credential.
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub session_id: String,
    pub credential: Credential,
    pub context: SessionContext,
    /// Whether the best-effort connect notification went through.
    pub connected: bool,
}

/// Runs exactly once per page load: a second `validate` is refused rather
/// than retried.
pub struct SessionValidator {
    store: SharedStore,
    state: ValidatorState,
    attempted: bool,
}

impl SessionValidator {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            state: ValidatorState::Validating,
            attempted: false,
        }
    }

    pub fn state(&self) -> &ValidatorState {
        &self.state
    }

    pub async fn validate(
        &mut self,
        inbound_url: &str,
    ) -> Result<ValidatedSession, ValidationFailure> {
        if self.attempted {
            return Err(ValidationFailure::AlreadyAttempted);
        }
        self.attempted = true;
        let outcome = self.run(inbound_url).await;
        self.state = match &outcome {
            Ok(_) => ValidatorState::Valid,
            Err(err) => ValidatorState::Invalid(err.user_message().to_string()),
        };
        outcome
    }

    async fn run(&self, inbound_url: &str) -> Result<ValidatedSession, ValidationFailure> {
        let pairing = PairingUrl::parse(inbound_url).inspect_err(|err| {
            warn!(target: "gradelink::acceptor", error = %err, "pairing link unusable");
        })?;
        let (session_id, credential) = pairing.into_parts();

        let context = self
            .store
            .validate_session(&session_id, &credential)
            .await
            .map_err(|err| {
                warn!(
                    target: "gradelink::acceptor",
                    session_id = %session_id,
                    error = %err,
                    "session validation failed"
                );
                if err.is_rejection() {
                    ValidationFailure::Rejected(err)
                } else {
                    ValidationFailure::Unreachable(err)
                }
            })?;
        info!(
            target: "gradelink::acceptor",
            session_id = %session_id,
            subject = %context.subject,
            "session validated"
        );

        let connected = match self.store.mark_connected(&session_id, &credential).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target: "gradelink::acceptor",
                    session_id = %session_id,
                    error = %err,
                    "connect notification failed; continuing to capture"
                );
                false
            }
        };

        Ok(ValidatedSession {
            session_id,
            credential,
            context,
            connected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemorySessionStore, SessionStore};
    use gradelink_proto::{SessionStatus, TaskMetadata};
    use std::sync::Arc;

    async fn pairing(store: &InMemorySessionStore) -> PairingUrl {
        let task = TaskMetadata::new("Define osmosis", "biology", "8").with_topic("cells");
        let created = store.create_session(&task).await.unwrap();
        PairingUrl::parse(&created.pairing_url).unwrap()
    }

    #[test_timeout::tokio_timeout_test]
    async fn valid_link_validates_and_connects() {
        let store = InMemorySessionStore::default();
        let url = pairing(&store).await;
        let mut validator = SessionValidator::new(Arc::new(store.clone()));
        assert_eq!(validator.state(), &ValidatorState::Validating);

        let session = validator.validate(url.as_str()).await.unwrap();
        assert_eq!(validator.state(), &ValidatorState::Valid);
        assert!(session.connected);
        assert_eq!(session.context.headline(), "biology - Grade 8 (cells)");
        assert_eq!(
            store.status(url.session_id()),
            Some(SessionStatus::MobileConnected)
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn missing_token_fails_without_calling_the_store() {
        let store = InMemorySessionStore::default();
        let url = pairing(&store).await;
        let bare = format!("https://m.example.com/mobile-grading/{}", url.session_id());
        let mut validator = SessionValidator::new(Arc::new(store.clone()));

        let err = validator.validate(&bare).await.unwrap_err();
        assert!(matches!(err, ValidationFailure::MissingCredential));
        assert!(matches!(validator.state(), ValidatorState::Invalid(_)));
        assert_eq!(
            store.status(url.session_id()),
            Some(SessionStatus::WaitingForMobile)
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn rejected_credential_is_terminal_and_not_a_network_error() {
        let store = InMemorySessionStore::default();
        let url = pairing(&store).await;
        let forged = format!(
            "https://m.example.com/mobile-grading/{}?token=forged",
            url.session_id()
        );
        let mut validator = SessionValidator::new(Arc::new(store));

        let err = validator.validate(&forged).await.unwrap_err();
        assert!(matches!(err, ValidationFailure::Rejected(_)));
        assert!(!err.is_network());

        let again = validator.validate(url.as_str()).await.unwrap_err();
        assert!(matches!(again, ValidationFailure::AlreadyAttempted));
    }

    struct ConnectOutage(InMemorySessionStore);

    #[async_trait::async_trait]
    impl SessionStore for ConnectOutage {
        async fn create_session(
            &self,
            task: &TaskMetadata,
        ) -> Result<gradelink_proto::CreateSessionResponse, StoreError> {
            self.0.create_session(task).await
        }

        async fn session_status(
            &self,
            session_id: &str,
        ) -> Result<gradelink_proto::StatusResponse, StoreError> {
            self.0.session_status(session_id).await
        }

        async fn validate_session(
            &self,
            session_id: &str,
            credential: &Credential,
        ) -> Result<SessionContext, StoreError> {
            self.0.validate_session(session_id, credential).await
        }

        async fn mark_connected(&self, _: &str, _: &Credential) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connect endpoint down".into()))
        }

        async fn submit_image(
            &self,
            upload: crate::store::ImageUpload<'_>,
        ) -> Result<(), StoreError> {
            self.0.submit_image(upload).await
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn connect_failure_does_not_block_capture() {
        let store = InMemorySessionStore::default();
        let url = pairing(&store).await;
        let mut validator = SessionValidator::new(Arc::new(ConnectOutage(store.clone())));

        let session = validator.validate(url.as_str()).await.unwrap();
        assert_eq!(validator.state(), &ValidatorState::Valid);
        assert!(!session.connected);
        assert_eq!(session.session_id, url.session_id());
        assert_eq!(
            store.status(url.session_id()),
            Some(SessionStatus::WaitingForMobile)
        );
    }
}
