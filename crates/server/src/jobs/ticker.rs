// crates/server/src/jobs/ticker.rs
//! A job that only counts. Useful to watch progress messages and stop
//! requests without an archive engine behind the session.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use backdesk_core::{Job, JobContext, JobError, JobOutput};
use serde::Deserialize;

pub const KIND: &str = "ticker";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TickerParams {
    pub steps: u32,
    pub interval_ms: u64,
    /// Fail with an error when this step is reached.
    pub fail_at: Option<u32>,
    /// Report the steps as a listing instead of a summary.
    pub listing: bool,
    /// Write the steps to a text file with this name and offer it for
    /// download. Takes precedence over `listing`.
    pub download: Option<String>,
}

impl Default for TickerParams {
    fn default() -> Self {
        Self {
            steps: 10,
            interval_ms: 200,
            fail_at: None,
            listing: false,
            download: None,
        }
    }
}

pub struct Ticker {
    params: TickerParams,
}

impl Ticker {
    pub fn new(params: TickerParams) -> Self {
        Self { params }
    }
}

impl Job for Ticker {
    fn name(&self) -> &str {
        KIND
    }

    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput, JobError> {
        let TickerParams {
            steps,
            interval_ms,
            fail_at,
            listing,
            download,
        } = self.params.clone();
        let interval = Duration::from_millis(interval_ms);

        ctx.log(format!("counting {steps} steps"));
        for step in 1..=steps {
            ctx.pause(interval)?;
            if fail_at == Some(step) {
                return Err(anyhow!("step {step} of {steps} failed").into());
            }
            ctx.log(format!("step {step}/{steps}"));
        }

        if let Some(file_name) = download {
            let path = report_path(&file_name)?;
            let report: String = (1..=steps).map(|step| format!("step {step}\n")).collect();
            fs::write(&path, report)
                .with_context(|| format!("failed to write {}", path.display()))?;
            ctx.log(format!("report ready: {file_name}"));
            Ok(JobOutput::Download { file_name, path })
        } else if listing {
            Ok(JobOutput::Listing {
                entries: (1..=steps).map(|step| format!("step-{step}")).collect(),
            })
        } else {
            Ok(JobOutput::summary([format!("completed {steps} steps")]))
        }
    }
}

/// Reports land in the temp directory; the name must be a plain file name.
fn report_path(file_name: &str) -> anyhow::Result<PathBuf> {
    let plain = !file_name.is_empty()
        && !file_name.starts_with('.')
        && !file_name.contains(['/', '\\']);
    if !plain {
        return Err(anyhow!("'{file_name}' is not a plain file name"));
    }
    Ok(std::env::temp_dir().join(format!("backdesk-{}-{file_name}", std::process::id())))
}
