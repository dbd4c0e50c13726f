//! Diagnostic logging.
//!
//! stdout carries protocol responses only, so every appender writes to
//! stderr (plus an optional file).

use std::io::Write;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::LoggingConfig;

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}{n}";

/// Readiness sentinel the parent waits for on stderr.
pub const READY_SENTINEL: &str = "MODEL_READY";

pub fn setup_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let level = parse_level(&config.level);

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let mut builder =
        Config::builder().appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");

    if let Some(path) = &config.file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file_appender = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(path)?;
        builder = builder.appender(Appender::builder().build("file", Box::new(file_appender)));
        root = root.appender("file");
    }

    let config = builder.build(root.build(level))?;
    log4rs::init_config(config)?;

    Ok(())
}

fn parse_level(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::Info)
}

/// Write the readiness sentinel as a bare line (stderr in the real process).
pub fn write_ready<W: Write>(out: &mut W) -> std::io::Result<()> {
    writeln!(out, "{READY_SENTINEL}")?;
    out.flush()
}
