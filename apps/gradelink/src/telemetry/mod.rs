pub mod logging {
    //! Process-wide `tracing` setup for the `gradelink` binary.
    //!
    //! Every event in this crate names a `gradelink::<area>` target, so the
    //! filter raises those targets to the requested level and keeps the HTTP
    //! stack at `warn` unless dependency tracing is asked for.

    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    pub const FILTER_ENV: &str = "GRADELINK_LOG_FILTER";
    pub const TRACE_DEPS_ENV: &str = "GRADELINK_TRACE_DEPS";

    const OWN_TARGETS: &[&str] = &["gradelink", "gradelink_core"];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        fn directive(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to install logger: {0}")]
        Install(String),
    }

    /// Keeps the non-blocking writer flushing for the life of the process.
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Once one is installed, later calls
    /// return `Ok` without touching it.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }
        let directives = match std::env::var(FILTER_ENV) {
            Ok(custom) if !custom.trim().is_empty() => custom,
            _ => directives_for(config.level, env_flag(TRACE_DEPS_ENV)),
        };

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(directives))
            .with_target(true)
            .with_thread_names(config.level == LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .try_init()
            .map_err(|err| InitError::Install(err.to_string()))?;

        let _ = GUARD.set(guard);
        Ok(())
    }

    fn env_flag(var: &str) -> bool {
        std::env::var(var)
            .map(|value| matches!(value.trim(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    /// Filter directives for `level`. With `trace_deps` every crate logs at
    /// that level; otherwise only this crate's targets do.
    fn directives_for(level: LogLevel, trace_deps: bool) -> String {
        let level = level.directive();
        if trace_deps {
            return level.to_owned();
        }
        let mut directives = String::from("warn");
        for target in OWN_TARGETS {
            directives.push_str(&format!(",{target}={level}"));
        }
        directives
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn own_targets_follow_the_requested_level() {
            assert_eq!(
                directives_for(LogLevel::Debug, false),
                "warn,gradelink=debug,gradelink_core=debug"
            );
            assert_eq!(
                directives_for(LogLevel::Error, false),
                "warn,gradelink=error,gradelink_core=error"
            );
        }

        #[test]
        fn dependency_tracing_applies_the_level_everywhere() {
            assert_eq!(directives_for(LogLevel::Trace, true), "trace");
        }

        #[test]
        fn directives_parse_as_env_filters() {
            for level in LogLevel::value_variants() {
                for trace_deps in [false, true] {
                    let directives = directives_for(*level, trace_deps);
                    assert!(EnvFilter::try_new(&directives).is_ok(), "{directives}");
                }
            }
        }

        #[test]
        fn unwritable_log_file_is_reported() {
            let config = LogConfig {
                level: LogLevel::Info,
                file: Some(PathBuf::from("/nonexistent/gradelink/run.log")),
            };
            assert!(matches!(init(&config), Err(InitError::Io { .. })));
        }
    }
}
