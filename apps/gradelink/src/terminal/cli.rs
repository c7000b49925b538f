use clap::{Args, Parser, Subcommand};
use gradelink_proto::TaskMetadata;
use std::path::PathBuf;

use crate::config::DEFAULT_SESSION_STORE;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "gradelink",
    about = "📱 Hand a grading task from the desktop to a phone camera and back",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"))
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "GRADELINK_SESSION_STORE",
        default_value = DEFAULT_SESSION_STORE,
        help = "Base URL of the grading session store"
    )]
    pub session_store: String,

    #[arg(
        long,
        global = true,
        env = "GRADELINK_ACCESS_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true,
        help = "Access token the desktop side presents to the session store"
    )]
    pub access_token: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "GRADELINK_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "GRADELINK_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a pairing code on this machine and wait for the graded result
    Open(OpenArgs),
    /// Act as the phone: validate a pairing link and upload a photo
    Accept(AcceptArgs),
    /// Render any URL as a QR code image
    Qr(QrArgs),
    /// Run both devices in-process against a local session store
    Demo(DemoArgs),
}

#[derive(Args, Debug)]
pub struct OpenArgs {
    #[arg(long, value_name = "TEXT", help = "Question the student is answering")]
    pub question_text: String,

    #[arg(long, help = "Subject, e.g. mathematics")]
    pub subject: String,

    #[arg(long, help = "Grade or class level")]
    pub grade: String,

    #[arg(long)]
    pub topic: Option<String>,

    #[arg(long, value_name = "ID")]
    pub question_id: Option<String>,

    #[arg(long, value_name = "TEXT", help = "Reference solution for the grader")]
    pub solution: Option<String>,

    #[arg(long, default_value = "practice")]
    pub practice_mode: String,

    #[arg(long, value_name = "PATH", help = "Also write the QR code as a PNG")]
    pub qr_out: Option<PathBuf>,
}

impl OpenArgs {
    pub fn task(&self) -> TaskMetadata {
        let mut task = TaskMetadata::new(&self.question_text, &self.subject, &self.grade)
            .with_practice_mode(&self.practice_mode);
        if let Some(topic) = &self.topic {
            task = task.with_topic(topic);
        }
        if let Some(id) = &self.question_id {
            task = task.with_question_id(id);
        }
        if let Some(solution) = &self.solution {
            task = task.with_solution(solution);
        }
        task
    }
}

#[derive(Args, Debug)]
pub struct AcceptArgs {
    #[arg(value_name = "PAIRING_URL", help = "Link scanned from the desktop QR code")]
    pub url: String,

    #[arg(long, value_name = "PATH", help = "Photo of the handwritten work")]
    pub photo: PathBuf,

    #[arg(long, default_value_t = 2, help = "Resubmissions after a failed upload")]
    pub retries: u32,
}

#[derive(Args, Debug)]
pub struct QrArgs {
    #[arg(value_name = "URL")]
    pub url: String,

    #[arg(long, value_name = "PATH")]
    pub out: PathBuf,

    #[arg(long, default_value_t = 300, help = "Image edge length in pixels")]
    pub width: u32,

    #[arg(long, default_value_t = 2, help = "Quiet zone in modules")]
    pub margin: u32,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    #[arg(long, default_value_t = 300, value_name = "SECS")]
    pub expires_in: u64,

    #[arg(long, value_name = "PATH", help = "Photo to upload instead of a generated page")]
    pub photo: Option<PathBuf>,

    #[arg(long, default_value_t = 500, value_name = "MS")]
    pub poll_interval_ms: u64,

    #[arg(long, default_value_t = 1_500, value_name = "MS", help = "Simulated grading time")]
    pub grading_delay_ms: u64,
}
