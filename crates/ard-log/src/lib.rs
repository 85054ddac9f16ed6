use std::path::PathBuf;

use chrono::{Datelike, Timelike};
// Re-export logging functions for convenience.
pub use log::*;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Logger, Root},
    encode::pattern::PatternEncoder,
    Config,
};
use serde::{Deserialize, Serialize};

/// Describes how logging should be set up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Logs below this level are discarded.
    pub filter: LevelFilter,
    /// Directory for log files. No file is written when `None`.
    pub directory: Option<PathBuf>,
    /// Per-target level overrides, e.g. `("ard_sync", LevelFilter::Trace)`.
    pub targets: Vec<(String, LevelFilter)>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: LevelFilter::Info,
            directory: Some(PathBuf::from("./logs")),
            targets: Vec::default(),
        }
    }
}

/// Initializes logging. Should be called before any other logging functions. Provided
/// `LevelFilter` will remove all logs below the provided level.
pub fn init(filter: LevelFilter) {
    init_with(LogConfig {
        filter,
        ..Default::default()
    });
}

/// Initializes logging with a full configuration.
pub fn init_with(config: LogConfig) {
    // Output to console
    let stdout = ConsoleAppender::builder().build();

    let mut builder =
        Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));
    let mut root = Root::builder().appender("stdout");
    let mut appenders = vec!["stdout".to_owned()];

    // Output to log file. Name of the file is based on the current time.
    if let Some(directory) = &config.directory {
        let now = chrono::Utc::now();
        let log_file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d} - {t} - {l} - {m}{n}")))
            .build(directory.join(format!(
                "{} {} {} {} {} {}.txt",
                now.year(),
                now.month(),
                now.day(),
                now.hour(),
                now.minute(),
                now.second()
            )))
            .expect("unable to initialize logging to file");

        builder = builder.appender(Appender::builder().build("log_file", Box::new(log_file)));
        root = root.appender("log_file");
        appenders.push("log_file".to_owned());
    }

    for (target, level) in &config.targets {
        builder = builder.logger(
            Logger::builder()
                .appenders(appenders.iter().cloned())
                .additive(false)
                .build(target, *level),
        );
    }

    let log_config = builder
        .build(root.build(config.filter))
        .expect("unable to create logging configuration");

    log4rs::init_config(log_config).expect("unable to initialize logging");

    log_panics::init();
}
