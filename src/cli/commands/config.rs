//! Config command implementation.
//!
//! The `steadyflow config` command shows the effective engine configuration
//! and the delays the engine will wait before each retry.

use std::io::Write;

use serde::Serialize;

use crate::cli::args::ConfigArgs;
use crate::config::EngineConfig;
use crate::error::{Result, SteadyflowError};

use super::dispatcher::{Command, CommandResult};

/// The config command implementation.
pub struct ConfigCommand {
    args: ConfigArgs,
}

#[derive(Serialize)]
struct ConfigReport<'a> {
    config: &'a EngineConfig,
    /// Delay before each retry, in milliseconds.
    backoff_ms: Vec<u64>,
}

impl ConfigCommand {
    pub fn new(args: ConfigArgs) -> Self {
        Self { args }
    }

    fn load(&self) -> Result<EngineConfig> {
        match &self.args.file {
            Some(path) => EngineConfig::load(path),
            None => Ok(EngineConfig::default()),
        }
    }
}

impl Command for ConfigCommand {
    fn execute(&self, out: &mut dyn Write) -> Result<CommandResult> {
        let config = self.load()?;
        let schedule = config.retry.schedule();

        if self.args.json {
            let report = ConfigReport {
                config: &config,
                backoff_ms: schedule
                    .iter()
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                    .collect(),
            };
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| SteadyflowError::Other(e.into()))?;
            writeln!(out, "{}", json)?;
            return Ok(CommandResult::success());
        }

        if let Some(path) = &self.args.file {
            writeln!(out, "# {}", path.display())?;
        }
        let yaml = serde_yaml::to_string(&config).map_err(|e| SteadyflowError::Other(e.into()))?;
        write!(out, "{}", yaml)?;

        writeln!(out)?;
        writeln!(out, "# backoff schedule")?;
        for (n, delay) in schedule.iter().enumerate() {
            writeln!(out, "retry {:>3}: {:.1}s", n + 1, delay.as_secs_f64())?;
        }
        match (config.retry.max_retries, schedule.last()) {
            (None, Some(last)) => {
                writeln!(out, "later retries: {:.1}s, unlimited", last.as_secs_f64())?
            }
            (Some(max), _) => writeln!(out, "gives up after {} retries", max)?,
            (None, None) => {}
        }

        Ok(CommandResult::success())
    }
}
