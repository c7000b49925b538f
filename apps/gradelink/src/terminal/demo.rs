//! Both devices in one process: the desktop pairing, a simulated phone and
//! a stand-in grading engine, all sharing the in-memory session store.

use crate::acceptor::{Acceptor, Camera, StillImageCamera, SyntheticCamera};
use crate::config::Config;
use crate::initiator::{Initiator, InitiatorSettings};
use crate::store::{InMemorySessionStore, MemoryStoreSettings, SharedStore};
use crate::terminal::cli::DemoArgs;
use crate::terminal::error::CliError;
use crate::terminal::{accept, open};
use gradelink_proto::{Grade, GradingResult, SessionStatus, TaskMetadata};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const SCAN_DELAY: Duration = Duration::from_secs(1);
const ENGINE_POLL: Duration = Duration::from_millis(100);

pub async fn run(config: &Config, args: DemoArgs) -> Result<(), CliError> {
    if args.expires_in == 0 {
        return Err(CliError::InvalidArgument("--expires-in must be positive".into()));
    }
    let store = InMemorySessionStore::new(MemoryStoreSettings {
        ttl: Duration::from_secs(args.expires_in),
        ..MemoryStoreSettings::default()
    });
    let shared: SharedStore = Arc::new(store.clone());
    let settings = InitiatorSettings {
        poll_interval: Duration::from_millis(args.poll_interval_ms.max(1)),
        ..config.initiator_settings()
    };

    let task = TaskMetadata::new("Solve for x: 3x + 5 = 20", "mathematics", "8")
        .with_question_id("demo-linear-1")
        .with_topic("linear equations")
        .with_solution("3x = 15, so x = 5")
        .with_practice_mode("practice");
    let initiator = Initiator::new(shared.clone(), settings);
    let handle = initiator.open_pairing(&task, |_| {}).await?;
    open::show_pairing(&handle, None)?;

    let pairing_url = handle
        .pairing_url()
        .ok_or_else(|| {
            CliError::InvalidArgument("pairing closed before the phone scanned it".into())
        })?
        .as_str()
        .to_string();
    let camera: Arc<dyn Camera> = match &args.photo {
        Some(path) => Arc::new(StillImageCamera::new(path)),
        None => Arc::new(SyntheticCamera::new(1280, 720)),
    };
    let phone = tokio::spawn(async move {
        tokio::time::sleep(SCAN_DELAY).await;
        let acceptor = Acceptor::new(shared, camera);
        let pipeline = acceptor.load(&pairing_url).await?;
        accept::capture_and_submit(&pipeline, 1).await
    });
    let engine = spawn_grading_engine(
        store,
        handle.session_id().to_string(),
        Duration::from_millis(args.grading_delay_ms),
    );

    let outcome = open::follow(&handle).await;
    engine.abort();
    if !phone.is_finished() {
        phone.abort();
    }
    match phone.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(err),
        Err(err) if err.is_cancelled() => {}
        Err(err) => return Err(CliError::Task(err.to_string())),
    }
    outcome
}

fn spawn_grading_engine(
    store: InMemorySessionStore,
    session_id: String,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match store.status(&session_id) {
                Some(SessionStatus::ImageUploaded) => break,
                Some(status) if status.is_terminal() => return,
                None => return,
                Some(_) => tokio::time::sleep(ENGINE_POLL).await,
            }
        }
        debug!(target: "gradelink::demo", session_id = %session_id, "grading submission");
        tokio::time::sleep(delay).await;
        let result = GradingResult {
            grade: Grade::Mark("9/10".into()),
            feedback: "Correct answer with clear steps. Show the subtraction explicitly.".into(),
            corrections: vec!["Write 3x = 20 - 5 before simplifying".into()],
            strengths: vec!["Isolated x correctly".into(), "Checked the answer".into()],
        };
        match store.complete(&session_id, result) {
            Ok(()) => info!(
                target: "gradelink::demo",
                session_id = %session_id,
                "demo grading complete"
            ),
            Err(err) => debug!(target: "gradelink::demo", error = %err, "demo grading skipped"),
        }
    })
}
