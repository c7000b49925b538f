use crate::status::SessionStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Context captured when the initiator opens a pairing. Opaque to the
/// handoff itself; the grading engine and both displays read it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    pub question_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_solution: Option<String>,
    #[serde(default)]
    pub practice_mode: String,
    pub subject: String,
    pub grade: String,
    #[serde(default)]
    pub topic: Option<String>,
}

impl TaskMetadata {
    pub fn new(
        question_text: impl Into<String>,
        subject: impl Into<String>,
        grade: impl Into<String>,
    ) -> Self {
        Self {
            question_text: question_text.into(),
            subject: subject.into(),
            grade: grade.into(),
            ..Self::default()
        }
    }

    pub fn with_question_id(mut self, id: impl Into<String>) -> Self {
        self.question_id = Some(id.into());
        self
    }

    pub fn with_solution(mut self, solution: impl Into<String>) -> Self {
        self.correct_solution = Some(solution.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_practice_mode(mut self, mode: impl Into<String>) -> Self {
        self.practice_mode = mode.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    #[serde(rename = "qrCodeUrl", alias = "pairingUrl")]
    pub pairing_url: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: SessionStatus,
    #[serde(default)]
    pub result: Option<GradingResult>,
}

/// Session view returned to the acceptor once its credential checks out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(default)]
    pub question_id: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub question_text: String,
}

impl SessionContext {
    pub fn headline(&self) -> String {
        match self.topic.as_deref().filter(|t| !t.is_empty()) {
            Some(topic) => format!("{} - Grade {} ({topic})", self.subject, self.grade),
            None => format!("{} - Grade {}", self.subject, self.grade),
        }
    }
}

/// Score as reported by the grading engine: either a number or a symbolic
/// mark such as `"7/10"` or `"A-"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Grade {
    Score(f64),
    Mark(String),
}

impl Grade {
    /// Splits `"earned/total"` marks into their numeric parts.
    pub fn as_fraction(&self) -> Option<(f64, f64)> {
        match self {
            Grade::Score(_) => None,
            Grade::Mark(mark) => {
                let (earned, total) = mark.split_once('/')?;
                let earned = earned.trim().parse().ok()?;
                let total: f64 = total.trim().parse().ok()?;
                (total > 0.0).then_some((earned, total))
            }
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Score(score) => write!(f, "{score}"),
            Grade::Mark(mark) => f.write_str(mark),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    pub grade: Grade,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrections: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strengths: Vec<String>,
}

/// Facts about the capturing device that travel with an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceContext {
    pub user_agent: String,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self {
            user_agent: format!("gradelink/{}", env!("CARGO_PKG_VERSION")),
            screen_width: 0,
            screen_height: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDataRef {
    #[serde(default)]
    pub question_id: Option<String>,
    pub subject: String,
    pub grade: String,
}

impl From<&SessionContext> for SessionDataRef {
    fn from(context: &SessionContext) -> Self {
        Self {
            question_id: context.question_id.clone(),
            subject: context.subject.clone(),
            grade: context.grade.clone(),
        }
    }
}

/// JSON document sent in the `metadata` part of an image upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetadata {
    pub user_agent: String,
    pub screen_width: u32,
    pub screen_height: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub capture_time: OffsetDateTime,
    pub session_data: SessionDataRef,
}

impl CaptureMetadata {
    pub fn new(
        device: &DeviceContext,
        capture_time: OffsetDateTime,
        context: &SessionContext,
    ) -> Self {
        Self {
            user_agent: device.user_agent.clone(),
            screen_width: device.screen_width,
            screen_height: device.screen_height,
            capture_time,
            session_data: SessionDataRef::from(context),
        }
    }
}
