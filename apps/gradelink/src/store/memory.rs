//! Reference session store kept entirely in process memory.
//!
//! It enforces the same lifecycle a real store does (forward-only status,
//! credential scoping, one accepted image per session) and exposes hooks for
//! the grading engine and for fault injection, so both device roles can be
//! exercised without a network.

use super::{ImageUpload, SessionStore, StoreError};
use async_trait::async_trait;
use gradelink_proto::{
    CaptureMetadata, CreateSessionResponse, Credential, GradingResult, PairingUrl, SessionContext,
    SessionStatus, StatusResponse, TaskMetadata,
};
use parking_lot::Mutex;
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

const CREDENTIAL_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct MemoryStoreSettings {
    pub entry_point: Url,
    pub ttl: Duration,
    /// Revoke the pairing credential once an image has been accepted.
    pub invalidate_after_upload: bool,
}

impl Default for MemoryStoreSettings {
    fn default() -> Self {
        Self {
            entry_point: Url::parse("http://localhost:3000/mobile-grading/")
                .unwrap_or_else(|_| unreachable!("static entry point parses")),
            ttl: Duration::from_secs(300),
            invalidate_after_upload: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub captured_at: OffsetDateTime,
    pub metadata: CaptureMetadata,
}

#[derive(Debug)]
struct StoredSession {
    task: TaskMetadata,
    credential: Credential,
    credential_revoked: bool,
    status: SessionStatus,
    expires_at: Instant,
    result: Option<GradingResult>,
    image: Option<StoredImage>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, StoredSession>,
    transitions: Vec<(String, SessionStatus)>,
    fail_uploads: u32,
    fail_status_polls: u32,
    upload_attempts: u32,
    status_polls: u32,
}

impl Inner {
    fn advance(&mut self, session_id: &str, next: SessionStatus) -> Result<(), StoreError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| unknown_session(session_id))?;
        session.status = session
            .status
            .advance(next)
            .map_err(|err| StoreError::rejected(StatusCode::CONFLICT, err.to_string()))?;
        self.transitions.push((session_id.to_string(), next));
        debug!(target: "gradelink::store", session_id, status = %next, "session status advanced");
        Ok(())
    }

    /// Checks an acceptor credential, expiring the session lazily when the
    /// deadline has passed before an image arrived.
    fn authorize(
        &mut self,
        session_id: &str,
        credential: &Credential,
        now: Instant,
    ) -> Result<(), StoreError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| unknown_session(session_id))?;
        if session.credential_revoked || session.credential != *credential {
            return Err(StoreError::rejected(
                StatusCode::UNAUTHORIZED,
                "invalid session access",
            ));
        }
        let status = session.status;
        let past_deadline = now >= session.expires_at;
        if past_deadline && status.rank() < SessionStatus::ImageUploaded.rank() {
            self.advance(session_id, SessionStatus::Expired)?;
            return Err(StoreError::rejected(StatusCode::GONE, "session expired"));
        }
        if status.is_terminal() {
            return Err(StoreError::rejected(
                StatusCode::GONE,
                format!("session is {status}"),
            ));
        }
        Ok(())
    }
}

fn unknown_session(session_id: &str) -> StoreError {
    StoreError::rejected(
        StatusCode::NOT_FOUND,
        format!("unknown session {session_id}"),
    )
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    inner: Arc<Mutex<Inner>>,
    settings: Arc<MemoryStoreSettings>,
}

impl InMemorySessionStore {
    pub fn new(settings: MemoryStoreSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &MemoryStoreSettings {
        &self.settings
    }

    /// Grading engine hook: attach a result and mark the session completed.
    pub fn complete(&self, session_id: &str, result: GradingResult) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.advance(session_id, SessionStatus::Completed)?;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.result = Some(result);
        }
        info!(target: "gradelink::store", session_id, "grading completed");
        Ok(())
    }

    pub fn fail(&self, session_id: &str) -> Result<(), StoreError> {
        self.inner.lock().advance(session_id, SessionStatus::Failed)
    }

    pub fn expire(&self, session_id: &str) -> Result<(), StoreError> {
        self.inner.lock().advance(session_id, SessionStatus::Expired)
    }

    /// The next `count` uploads fail as if the network dropped them.
    pub fn fail_next_uploads(&self, count: u32) {
        self.inner.lock().fail_uploads = count;
    }

    /// The next `count` status polls fail as if the store were unreachable.
    pub fn fail_next_status_polls(&self, count: u32) {
        self.inner.lock().fail_status_polls = count;
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.inner
            .lock()
            .sessions
            .get(session_id)
            .map(|session| session.status)
    }

    pub fn task(&self, session_id: &str) -> Option<TaskMetadata> {
        self.inner
            .lock()
            .sessions
            .get(session_id)
            .map(|session| session.task.clone())
    }

    pub fn stored_image(&self, session_id: &str) -> Option<StoredImage> {
        self.inner
            .lock()
            .sessions
            .get(session_id)
            .and_then(|session| session.image.clone())
    }

    /// Every status change applied so far, in order.
    pub fn transitions(&self) -> Vec<(String, SessionStatus)> {
        self.inner.lock().transitions.clone()
    }

    pub fn transitions_to(&self, session_id: &str, status: SessionStatus) -> usize {
        self.inner
            .lock()
            .transitions
            .iter()
            .filter(|(id, next)| id == session_id && *next == status)
            .count()
    }

    pub fn upload_attempts(&self) -> u32 {
        self.inner.lock().upload_attempts
    }

    pub fn status_polls(&self) -> u32 {
        self.inner.lock().status_polls
    }

    fn mint_credential() -> Credential {
        let raw: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CREDENTIAL_LEN)
            .map(char::from)
            .collect();
        Credential::new(raw).unwrap_or_else(|| unreachable!("generated credential is non-empty"))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        task: &TaskMetadata,
    ) -> Result<CreateSessionResponse, StoreError> {
        let session_id = Uuid::new_v4().to_string();
        let credential = Self::mint_credential();
        let pairing = PairingUrl::build(&self.settings.entry_point, &session_id, &credential)
            .map_err(|err| StoreError::InvalidConfig(err.to_string()))?;
        let mut inner = self.inner.lock();
        inner.sessions.insert(
            session_id.clone(),
            StoredSession {
                task: task.clone(),
                credential,
                credential_revoked: false,
                status: SessionStatus::WaitingForMobile,
                expires_at: Instant::now() + self.settings.ttl,
                result: None,
                image: None,
            },
        );
        inner
            .transitions
            .push((session_id.clone(), SessionStatus::WaitingForMobile));
        Ok(CreateSessionResponse {
            session_id,
            pairing_url: pairing.as_str().to_string(),
            expires_in: self.settings.ttl.as_secs(),
        })
    }

    async fn session_status(&self, session_id: &str) -> Result<StatusResponse, StoreError> {
        let mut inner = self.inner.lock();
        inner.status_polls += 1;
        if inner.fail_status_polls > 0 {
            inner.fail_status_polls -= 1;
            return Err(StoreError::Unavailable("simulated status outage".into()));
        }
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| unknown_session(session_id))?;
        Ok(StatusResponse {
            status: session.status,
            result: match session.status {
                SessionStatus::Completed => session.result.clone(),
                _ => None,
            },
        })
    }

    async fn validate_session(
        &self,
        session_id: &str,
        credential: &Credential,
    ) -> Result<SessionContext, StoreError> {
        let mut inner = self.inner.lock();
        inner.authorize(session_id, credential, Instant::now())?;
        let task = &inner
            .sessions
            .get(session_id)
            .ok_or_else(|| unknown_session(session_id))?
            .task;
        Ok(SessionContext {
            question_id: task.question_id.clone(),
            subject: task.subject.clone(),
            grade: task.grade.clone(),
            topic: task.topic.clone(),
            question_text: task.question_text.clone(),
        })
    }

    async fn mark_connected(
        &self,
        session_id: &str,
        credential: &Credential,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.authorize(session_id, credential, Instant::now())?;
        let waiting = inner
            .sessions
            .get(session_id)
            .is_some_and(|session| session.status == SessionStatus::WaitingForMobile);
        if waiting {
            inner.advance(session_id, SessionStatus::MobileConnected)?;
        }
        Ok(())
    }

    async fn submit_image(&self, upload: ImageUpload<'_>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.upload_attempts += 1;
        if inner.fail_uploads > 0 {
            inner.fail_uploads -= 1;
            return Err(StoreError::Unavailable("simulated upload failure".into()));
        }
        let already_uploaded = inner
            .sessions
            .get(upload.session_id)
            .is_some_and(|session| session.image.is_some());
        if already_uploaded {
            return Err(StoreError::rejected(
                StatusCode::CONFLICT,
                "an image was already submitted for this session",
            ));
        }
        inner.authorize(upload.session_id, upload.credential, Instant::now())?;
        inner.advance(upload.session_id, SessionStatus::ImageUploaded)?;
        let invalidate = self.settings.invalidate_after_upload;
        if let Some(session) = inner.sessions.get_mut(upload.session_id) {
            session.image = Some(StoredImage {
                bytes: upload.bytes.to_vec(),
                mime: upload.mime.to_string(),
                captured_at: upload.captured_at,
                metadata: upload.metadata.clone(),
            });
            session.credential_revoked = invalidate;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradelink_proto::{DeviceContext, Grade};

    fn task() -> TaskMetadata {
        TaskMetadata::new("Integrate x^2 from 0 to 3", "mathematics", "12")
            .with_question_id("q-42")
            .with_topic("integrals")
    }

    fn metadata(context: &SessionContext) -> CaptureMetadata {
        CaptureMetadata::new(&DeviceContext::default(), OffsetDateTime::UNIX_EPOCH, context)
    }

    async fn created(store: &InMemorySessionStore) -> (String, Credential) {
        let response = store.create_session(&task()).await.unwrap();
        let pairing = PairingUrl::parse(&response.pairing_url).unwrap();
        assert_eq!(pairing.session_id(), response.session_id);
        let (_, credential) = pairing.into_parts();
        (response.session_id, credential)
    }

    #[test_timeout::tokio_timeout_test]
    async fn sessions_get_unique_ids_and_pairing_urls() {
        let store = InMemorySessionStore::default();
        let (first, _) = created(&store).await;
        let (second, _) = created(&store).await;
        assert_ne!(first, second);
        assert_eq!(store.status(&first), Some(SessionStatus::WaitingForMobile));
    }

    #[test_timeout::tokio_timeout_test]
    async fn validate_returns_context_and_rejects_wrong_credential() {
        let store = InMemorySessionStore::default();
        let (session_id, credential) = created(&store).await;
        let context = store
            .validate_session(&session_id, &credential)
            .await
            .unwrap();
        assert_eq!(context.subject, "mathematics");
        assert_eq!(context.question_id.as_deref(), Some("q-42"));

        let forged = Credential::new("forged").unwrap();
        let err = store
            .validate_session(&session_id, &forged)
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        let unknown = store
            .validate_session("missing", &credential)
            .await
            .unwrap_err();
        assert!(matches!(
            unknown,
            StoreError::Rejected { status, .. } if status == StatusCode::NOT_FOUND
        ));
    }

    #[test_timeout::tokio_timeout_test]
    async fn connect_and_upload_advance_status_once() {
        let store = InMemorySessionStore::default();
        let (session_id, credential) = created(&store).await;
        let context = store
            .validate_session(&session_id, &credential)
            .await
            .unwrap();
        store.mark_connected(&session_id, &credential).await.unwrap();
        store.mark_connected(&session_id, &credential).await.unwrap();
        assert_eq!(
            store.transitions_to(&session_id, SessionStatus::MobileConnected),
            1
        );

        let meta = metadata(&context);
        let upload = ImageUpload {
            session_id: &session_id,
            credential: &credential,
            bytes: b"jpeg",
            mime: "image/jpeg",
            captured_at: OffsetDateTime::UNIX_EPOCH,
            metadata: &meta,
        };
        store.submit_image(upload).await.unwrap();
        assert_eq!(store.status(&session_id), Some(SessionStatus::ImageUploaded));
        assert_eq!(store.stored_image(&session_id).unwrap().bytes, b"jpeg");

        let replay = store.submit_image(upload).await.unwrap_err();
        assert!(matches!(
            replay,
            StoreError::Rejected { status, .. } if status == StatusCode::CONFLICT
        ));
        let revoked = store
            .validate_session(&session_id, &credential)
            .await
            .unwrap_err();
        assert!(revoked.is_rejection());
    }

    #[test_timeout::tokio_timeout_test]
    async fn completed_status_carries_result() {
        let store = InMemorySessionStore::default();
        let (session_id, _) = created(&store).await;
        let pending = store.session_status(&session_id).await.unwrap();
        assert!(pending.result.is_none());

        store
            .complete(
                &session_id,
                GradingResult {
                    grade: Grade::Mark("9/10".into()),
                    feedback: "Clear working.".into(),
                    corrections: Vec::new(),
                    strengths: vec!["Correct antiderivative".into()],
                },
            )
            .unwrap();
        let done = store.session_status(&session_id).await.unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.result.unwrap().strengths.len(), 1);
        assert!(store.fail(&session_id).is_err());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn expired_sessions_reject_acceptor_calls() {
        let store = InMemorySessionStore::new(MemoryStoreSettings {
            ttl: Duration::from_secs(60),
            ..MemoryStoreSettings::default()
        });
        let (session_id, credential) = created(&store).await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        let err = store
            .validate_session(&session_id, &credential)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status, .. } if status == StatusCode::GONE));
        assert_eq!(store.status(&session_id), Some(SessionStatus::Expired));
    }

    #[test_timeout::tokio_timeout_test]
    async fn injected_faults_are_consumed() {
        let store = InMemorySessionStore::default();
        let (session_id, _) = created(&store).await;
        store.fail_next_status_polls(2);
        assert!(store.session_status(&session_id).await.is_err());
        assert!(store.session_status(&session_id).await.is_err());
        assert!(store.session_status(&session_id).await.is_ok());
        assert_eq!(store.status_polls(), 3);
    }
}
