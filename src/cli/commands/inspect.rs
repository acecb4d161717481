//! Inspect command implementation.
//!
//! The `steadyflow inspect` command reads a registry file written by
//! [`FileStateStore`](crate::state::FileStateStore) and lists its flows.
//! Flows are shown by the variant name of the application's flow enum, so no
//! concrete flow type is needed.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cli::args::InspectArgs;
use crate::error::{Result, SteadyflowError};
use crate::progress::FlowProgress;

use super::dispatcher::{Command, CommandResult};

/// The inspect command implementation.
pub struct InspectCommand {
    args: InspectArgs,
}

#[derive(Deserialize)]
struct ArchivedIndex {
    #[serde(default)]
    flows: BTreeMap<String, ArchivedEntry>,
    #[serde(default)]
    pending: BTreeSet<String>,
}

#[derive(Deserialize)]
struct ArchivedEntry {
    flow: serde_json::Value,
    progress: FlowProgress,
    #[serde(default)]
    retry_count: u32,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// One line of the report.
#[derive(Debug, Serialize)]
pub struct FlowSummary {
    pub id: String,
    pub kind: String,
    pub progress: FlowProgress,
    pub retry_count: u32,
    pub pending: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Name of the enum variant wrapping a serialized flow.
fn flow_kind(flow: &serde_json::Value) -> String {
    match flow {
        serde_json::Value::Object(map) if map.len() == 1 => {
            map.keys().next().cloned().unwrap_or_default()
        }
        serde_json::Value::String(name) => name.clone(),
        _ => "unknown".to_string(),
    }
}

impl InspectCommand {
    pub fn new(args: InspectArgs) -> Self {
        Self { args }
    }

    /// Read the state file into one summary per flow, in identifier order.
    pub fn summaries(&self) -> Result<Vec<FlowSummary>> {
        let path = &self.args.state_file;
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        let index: ArchivedIndex = serde_json::from_str(&content)
            .with_context(|| format!("{} is not an engine state file", path.display()))?;

        Ok(index
            .flows
            .into_iter()
            .map(|(id, entry)| FlowSummary {
                kind: flow_kind(&entry.flow),
                pending: index.pending.contains(&id),
                id,
                progress: entry.progress,
                retry_count: entry.retry_count,
                updated_at: entry.updated_at,
            })
            .collect())
    }
}

impl Command for InspectCommand {
    fn execute(&self, out: &mut dyn Write) -> Result<CommandResult> {
        let summaries = self.summaries()?;

        if self.args.json {
            let json = serde_json::to_string_pretty(&summaries)
                .map_err(|e| SteadyflowError::Other(e.into()))?;
            writeln!(out, "{}", json)?;
            return Ok(CommandResult::success());
        }

        let pending = summaries.iter().filter(|s| s.pending).count();
        writeln!(
            out,
            "{} tracked flows ({} waiting on dependencies)",
            summaries.len(),
            pending
        )?;
        for summary in &summaries {
            write!(
                out,
                "{}  kind={}  progress={}  retries={}",
                summary.id, summary.kind, summary.progress, summary.retry_count
            )?;
            if summary.pending {
                write!(out, "  [pending]")?;
            }
            if let Some(updated_at) = summary.updated_at {
                write!(out, "  updated={}", updated_at.to_rfc3339())?;
            }
            writeln!(out)?;
        }

        Ok(CommandResult::success())
    }
}
