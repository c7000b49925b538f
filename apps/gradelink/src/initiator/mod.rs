//! Desktop side of the handoff: opens a session, shows the pairing code and
//! follows the session through polling until a result, expiry or dismissal.
//!
//! Each pairing owns two tasks, a one-second countdown and the status poll
//! loop. Both observe the same `CancellationToken`; every state mutation
//! happens under one lock that also carries the `closed` flag, so a poll
//! response that lands after teardown is dropped on the floor.

mod countdown;
mod state;

pub use countdown::{Countdown, format_clock};
pub use state::{Effect, Phase, PhaseMachine};

use crate::encoder::{EncodeOptions, PairingDisplay};
use crate::store::{SharedStore, StoreError};
use gradelink_proto::{GradingResult, PairingUrl, PairingUrlError, StatusResponse, TaskMetadata};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

pub type CompletionCallback = Box<dyn FnOnce(GradingResult) + Send + 'static>;

#[derive(Debug, Clone)]
pub struct InitiatorSettings {
    pub poll_interval: Duration,
    /// Consecutive failed ticks before the view shows "connection lost".
    pub connection_lost_after: u32,
    /// How long an unscanned code keeps polling after its countdown ends.
    pub expiry_grace: Duration,
    pub create_timeout: Duration,
    pub encode: EncodeOptions,
}

impl Default for InitiatorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            connection_lost_after: 3,
            expiry_grace: Duration::from_secs(60),
            create_timeout: Duration::from_secs(10),
            encode: EncodeOptions::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionCreationError {
    #[error("failed to create grading session: {0}")]
    Store(#[from] StoreError),
    #[error("session store did not answer within {0:?}")]
    TimedOut(Duration),
    #[error("session store returned an unusable pairing url: {0}")]
    InvalidPairingUrl(#[from] PairingUrlError),
    #[error("pairing url names session {found}, expected {expected}")]
    SessionMismatch { expected: String, found: String },
}

impl SessionCreationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionCreationError::TimedOut(_) => {
                "The grading service took too long to respond. Please try again."
            }
            _ => "Could not start mobile grading. Please try again.",
        }
    }
}

pub struct Initiator {
    store: SharedStore,
    settings: InitiatorSettings,
}

impl Initiator {
    pub fn new(store: SharedStore, settings: InitiatorSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &InitiatorSettings {
        &self.settings
    }

    /// Allocates a session and starts the countdown and poll loop.
    /// `on_complete` runs at most once, with the first result observed.
    pub async fn open_pairing<F>(
        &self,
        task: &TaskMetadata,
        on_complete: F,
    ) -> Result<PairingHandle, SessionCreationError>
    where
        F: FnOnce(GradingResult) + Send + 'static,
    {
        let response = tokio::time::timeout(
            self.settings.create_timeout,
            self.store.create_session(task),
        )
        .await
        .map_err(|_| SessionCreationError::TimedOut(self.settings.create_timeout))??;

        let pairing = PairingUrl::parse(&response.pairing_url)?;
        if pairing.session_id() != response.session_id {
            return Err(SessionCreationError::SessionMismatch {
                expected: response.session_id,
                found: pairing.session_id().to_string(),
            });
        }

        let display = PairingDisplay::for_url(&pairing, &self.settings.encode);
        info!(
            target: "gradelink::initiator",
            session_id = %response.session_id,
            expires_in = response.expires_in,
            pairing_url = %pairing.redacted(),
            "pairing opened"
        );
        Ok(self.start(pairing, display, response.expires_in, Box::new(on_complete)))
    }

    fn start(
        &self,
        pairing: PairingUrl,
        display: PairingDisplay,
        expires_in: u64,
        on_complete: CompletionCallback,
    ) -> PairingHandle {
        let session_id = pairing.session_id().to_string();
        let countdown = Countdown::new(expires_in);
        let expired_at = countdown.is_expired().then(Instant::now);
        let inner = Inner {
            closed: false,
            polling: true,
            machine: PhaseMachine::new(),
            countdown,
            expired: expired_at.is_some(),
            expired_at,
            consecutive_failures: 0,
            connection_lost: false,
            rejected: false,
            on_complete: Some(on_complete),
        };
        let (snapshot_tx, _) = watch::channel(inner.snapshot(&session_id));
        let shared = Arc::new(Shared {
            session_id,
            connection_lost_after: self.settings.connection_lost_after.max(1),
            expiry_grace: self.settings.expiry_grace,
            inner: Mutex::new(inner),
            snapshot: snapshot_tx,
            cancel: CancellationToken::new(),
        });

        let mut tasks = Vec::with_capacity(2);
        if expires_in > 0 {
            tasks.push(tokio::spawn(countdown_loop(shared.clone())));
        }
        tasks.push(tokio::spawn(poll_loop(
            shared.clone(),
            self.store.clone(),
            self.settings.poll_interval,
        )));

        PairingHandle {
            shared,
            pairing: Mutex::new(Some(pairing)),
            display: Mutex::new(Some(display)),
            expires_in,
            tasks: Mutex::new(tasks),
        }
    }
}

struct Inner {
    closed: bool,
    polling: bool,
    machine: PhaseMachine,
    countdown: Countdown,
    expired: bool,
    expired_at: Option<Instant>,
    consecutive_failures: u32,
    connection_lost: bool,
    /// Last poll was refused by the store rather than lost in transit.
    rejected: bool,
    on_complete: Option<CompletionCallback>,
}

impl Inner {
    fn snapshot(&self, session_id: &str) -> InitiatorSnapshot {
        InitiatorSnapshot {
            session_id: session_id.to_string(),
            phase: self.machine.phase().clone(),
            remaining_secs: self.countdown.remaining(),
            expired: self.expired,
            remote_expired: self.machine.remote_expired(),
            connection_lost: self.connection_lost,
            rejected: self.rejected,
            consecutive_failures: self.consecutive_failures,
            polling: self.polling,
            closed: self.closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollControl {
    Continue,
    Stop,
}

struct Shared {
    session_id: String,
    connection_lost_after: u32,
    expiry_grace: Duration,
    inner: Mutex<Inner>,
    snapshot: watch::Sender<InitiatorSnapshot>,
    cancel: CancellationToken,
}

impl Shared {
    fn publish(&self, inner: &Inner) {
        self.snapshot.send_replace(inner.snapshot(&self.session_id));
    }

    fn tick_countdown(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        if inner.countdown.tick() {
            inner.expired = true;
            inner.expired_at = Some(Instant::now());
            info!(
                target: "gradelink::initiator",
                session_id = %self.session_id,
                "pairing code expired"
            );
        }
        self.publish(&inner);
        !inner.countdown.is_expired()
    }

    /// Gate checked before every tick's request. The expiry grace only
    /// applies while nobody has scanned the code; once a phone has connected
    /// polling runs until a terminal status or `close`.
    fn should_poll(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        if *inner.machine.phase() != Phase::Waiting {
            return true;
        }
        match inner.expired_at {
            Some(at) if Instant::now() >= at + self.expiry_grace => {
                inner.polling = false;
                self.publish(&inner);
                info!(
                    target: "gradelink::initiator",
                    session_id = %self.session_id,
                    "code expired unscanned; polling stopped"
                );
                false
            }
            _ => true,
        }
    }

    fn apply_status(&self, response: StatusResponse) -> PollControl {
        let (control, completion) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return PollControl::Stop;
            }
            inner.consecutive_failures = 0;
            inner.rejected = false;
            if inner.connection_lost {
                inner.connection_lost = false;
                info!(
                    target: "gradelink::initiator",
                    session_id = %self.session_id,
                    "connection to session store restored"
                );
            }

            let mut control = PollControl::Continue;
            let mut completion = None;
            match inner.machine.observe(&response) {
                Effect::None => {}
                Effect::Advanced(phase) => {
                    info!(
                        target: "gradelink::initiator",
                        session_id = %self.session_id,
                        phase = phase.label(),
                        "remote status advanced"
                    );
                }
                Effect::Completed(result) => {
                    info!(
                        target: "gradelink::initiator",
                        session_id = %self.session_id,
                        grade = %result.grade,
                        "grading result received"
                    );
                    completion = inner.on_complete.take().map(|callback| (callback, result));
                    control = PollControl::Stop;
                }
                Effect::RemoteExpired => {
                    inner.expired = true;
                    info!(
                        target: "gradelink::initiator",
                        session_id = %self.session_id,
                        "session expired remotely"
                    );
                    control = PollControl::Stop;
                }
                Effect::Failed => {
                    warn!(
                        target: "gradelink::initiator",
                        session_id = %self.session_id,
                        "grading failed remotely"
                    );
                    control = PollControl::Stop;
                }
            }
            if control == PollControl::Stop {
                inner.polling = false;
            }
            self.publish(&inner);
            (control, completion)
        };

        if let Some((callback, result)) = completion {
            callback(result);
        }
        if control == PollControl::Stop {
            self.cancel.cancel();
        }
        control
    }

    fn apply_failure(&self, err: &StoreError) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        if err.is_rejection() {
            // The store answered, so this is not a connectivity problem.
            if !inner.rejected {
                warn!(
                    target: "gradelink::initiator",
                    session_id = %self.session_id,
                    error = %err,
                    "session store refused the status check"
                );
            }
            inner.rejected = true;
            inner.consecutive_failures = 0;
            inner.connection_lost = false;
            self.publish(&inner);
            return;
        }
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let lost = inner.consecutive_failures >= self.connection_lost_after;
        if lost && !inner.connection_lost {
            warn!(
                target: "gradelink::initiator",
                session_id = %self.session_id,
                failures = inner.consecutive_failures,
                error = %err,
                "connection to session store lost; still polling"
            );
        } else {
            debug!(
                target: "gradelink::initiator",
                session_id = %self.session_id,
                failures = inner.consecutive_failures,
                error = %err,
                "status poll failed"
            );
        }
        inner.connection_lost = lost;
        self.publish(&inner);
    }

    fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        inner.on_complete = None;
        self.publish(&inner);
        drop(inner);
        self.cancel.cancel();
        true
    }
}

async fn countdown_loop(shared: Arc<Shared>) {
    let mut ticker = interval_at(Instant::now() + COUNTDOWN_PERIOD, COUNTDOWN_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !shared.tick_countdown() {
                    break;
                }
            }
        }
    }
}

/// One request per tick, awaited before the next tick is scheduled.
async fn poll_loop(shared: Arc<Shared>, store: SharedStore, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !shared.should_poll() {
            shared.cancel.cancel();
            break;
        }
        let outcome = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            outcome = store.session_status(&shared.session_id) => outcome,
        };
        match outcome {
            Ok(response) => {
                if shared.apply_status(response) == PollControl::Stop {
                    break;
                }
            }
            Err(err) => shared.apply_failure(&err),
        }
    }
    debug!(
        target: "gradelink::initiator",
        session_id = %shared.session_id,
        "poll loop stopped"
    );
}

/// Published view of one pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiatorSnapshot {
    pub session_id: String,
    pub phase: Phase,
    pub remaining_secs: u64,
    /// Countdown reached zero or the store reported the session expired.
    pub expired: bool,
    pub remote_expired: bool,
    pub connection_lost: bool,
    pub rejected: bool,
    pub consecutive_failures: u32,
    pub polling: bool,
    pub closed: bool,
}

impl InitiatorSnapshot {
    pub fn status_line(&self) -> &'static str {
        match &self.phase {
            Phase::Completed(_) => "Grading complete",
            Phase::Failed => "Grading failed. Please create a new code and try again.",
            _ if self.remote_expired => "Code expired",
            _ if self.rejected => {
                "The grading service refused the status check. Close and create a new code."
            }
            _ if self.connection_lost => "Connection lost, retrying...",
            Phase::Waiting if self.expired => "Code expired",
            Phase::Waiting => "Waiting for mobile device...",
            Phase::Connected => "Mobile device connected!",
            Phase::Processing => "Processing your submission...",
        }
    }

    pub fn countdown_label(&self) -> String {
        if self.remote_expired || (self.expired && self.phase == Phase::Waiting) {
            "Code expired. Close and generate a new one.".to_string()
        } else if self.expired {
            "Code expired; your submission is still being followed.".to_string()
        } else {
            format!("Expires in {}", format_clock(self.remaining_secs))
        }
    }

    pub fn is_urgent(&self) -> bool {
        Countdown::new(self.remaining_secs).is_urgent()
    }

    /// Nothing further will change without a new pairing.
    pub fn is_settled(&self) -> bool {
        self.closed || !self.polling
    }

    pub fn render(&self) -> String {
        let mut out = String::from(self.status_line());
        if !self.phase.is_terminal() {
            let _ = write!(out, "\n{}", self.countdown_label());
        }
        if let Some(result) = self.phase.result() {
            out.push('\n');
            out.push_str(&render_result(result));
        }
        out
    }
}

pub fn render_result(result: &GradingResult) -> String {
    let mut out = format!("Score: {}", result.grade);
    if let Some((earned, total)) = result.grade.as_fraction() {
        let _ = write!(out, " ({:.0}%)", earned / total * 100.0);
    }
    if !result.feedback.is_empty() {
        let _ = write!(out, "\nFeedback: {}", result.feedback);
    }
    for (title, items) in [
        ("Corrections", &result.corrections),
        ("Strengths", &result.strengths),
    ] {
        if items.is_empty() {
            continue;
        }
        let _ = write!(out, "\n{title}:");
        for item in items {
            let _ = write!(out, "\n  - {item}");
        }
    }
    out
}

/// Live pairing. Dropping it tears the pairing down like `close`.
pub struct PairingHandle {
    shared: Arc<Shared>,
    pairing: Mutex<Option<PairingUrl>>,
    display: Mutex<Option<PairingDisplay>>,
    expires_in: u64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PairingHandle {
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    /// The pairing URL while the pairing is open; scrubbed on close.
    pub fn pairing_url(&self) -> Option<PairingUrl> {
        self.pairing.lock().clone()
    }

    pub fn display(&self) -> Option<PairingDisplay> {
        self.display.lock().clone()
    }

    pub fn snapshot(&self) -> InitiatorSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<InitiatorSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Resolves once the pairing completed, failed, ran out of grace or was
    /// closed.
    pub async fn settled(&self) -> InitiatorSnapshot {
        let mut updates = self.subscribe();
        match updates.wait_for(InitiatorSnapshot::is_settled).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Cancels the countdown and the poll loop. Responses still in flight
    /// are discarded.
    pub fn close(&self) {
        if self.shared.close() {
            info!(
                target: "gradelink::initiator",
                session_id = %self.shared.session_id,
                "pairing closed"
            );
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.pairing.lock().take();
        self.display.lock().take();
    }
}

impl Drop for PairingHandle {
    fn drop(&mut self) {
        self.close();
    }
}
