use crate::config::LoggingConfig;
use crate::error::{Result, ScraperError};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

/// `2024-05-01 10:00:00 [fanmtl_scraper::crawler] INFO: message`
pub const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} [{t}] {l}: {m}{n}";

/// Dependencies that log far too much at info/debug
const NOISY_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "tokio_postgres", "html5ever", "selectors"];

/// Initialise log4rs from the YAML file when it exists, otherwise from the
/// built-in console (and optional file) setup.
pub fn init(cfg: &LoggingConfig) -> Result<()> {
    if Path::new(&cfg.config_file).exists() {
        log4rs::init_file(&cfg.config_file, Default::default())
            .map_err(|e| ScraperError::Logging(e.to_string()))?;
        log::debug!("Logging configured from {}", cfg.config_file);
        return Ok(());
    }

    log4rs::init_config(build_config(cfg)?).map_err(|e| ScraperError::Logging(e.to_string()))?;
    Ok(())
}

pub fn level_filter(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::Info)
}

pub fn build_config(cfg: &LoggingConfig) -> Result<Config> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let mut builder = Config::builder().appender(Appender::builder().build("stdout", Box::new(console)));
    let mut root = Root::builder().appender("stdout");

    if let Some(path) = cfg.file.as_deref().filter(|p| !p.trim().is_empty()) {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(path)?;
        builder = builder.appender(Appender::builder().build("file", Box::new(file)));
        root = root.appender("file");
    }

    for target in NOISY_TARGETS {
        builder = builder.logger(Logger::builder().build(*target, LevelFilter::Warn));
    }

    builder
        .build(root.build(level_filter(&cfg.level)))
        .map_err(|e| ScraperError::Logging(e.to_string()))
}
