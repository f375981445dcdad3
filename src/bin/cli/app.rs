use std::path::Path;

use anyhow::{Context, Result};

use tutor_lib::config::TutorConfig;
use tutor_lib::rag::RagPipeline;

/// Shared application state for CLI commands
pub struct App {
    pub pipeline: RagPipeline,
}

impl App {
    /// Initialize from the config file and environment
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = TutorConfig::from_env(config_path).context("Failed to load configuration")?;
        log::debug!("Using data directory {:?}", config.data_dir);

        let pipeline = RagPipeline::new(config).context("Failed to initialize data directories")?;
        Ok(Self { pipeline })
    }
}

/// Print a not-found message and exit with status 2.
pub fn exit_not_found(message: &str) -> ! {
    eprintln!("{}", message);
    std::process::exit(2);
}
