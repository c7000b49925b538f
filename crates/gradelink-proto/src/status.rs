use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle of a grading session as persisted by the session store.
///
/// The happy path is `WaitingForMobile → MobileConnected → ImageUploaded →
/// Completed`; `Expired` and `Failed` are terminal failures reachable from
/// any non-terminal status. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    WaitingForMobile,
    MobileConnected,
    ImageUploaded,
    Completed,
    Expired,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::WaitingForMobile => "waiting_for_mobile",
            SessionStatus::MobileConnected => "mobile_connected",
            SessionStatus::ImageUploaded => "image_uploaded",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
            SessionStatus::Failed => "failed",
        }
    }

    /// Position along the forward-only lifecycle. Terminal failures rank
    /// above every happy-path status so they can be reached from any of them.
    pub fn rank(self) -> u8 {
        match self {
            SessionStatus::WaitingForMobile => 0,
            SessionStatus::MobileConnected => 1,
            SessionStatus::ImageUploaded => 2,
            SessionStatus::Completed => 3,
            SessionStatus::Expired | SessionStatus::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Expired | SessionStatus::Failed
        )
    }

    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn advance(self, next: SessionStatus) -> Result<SessionStatus, StatusTransitionError> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(StatusTransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "waiting_for_mobile" => Ok(SessionStatus::WaitingForMobile),
            "mobile_connected" => Ok(SessionStatus::MobileConnected),
            "image_uploaded" => Ok(SessionStatus::ImageUploaded),
            "completed" => Ok(SessionStatus::Completed),
            "expired" => Ok(SessionStatus::Expired),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session status cannot move from {from} to {to}")]
pub struct StatusTransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}
