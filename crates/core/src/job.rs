// crates/core/src/job.rs
//! The narrow interface between the session core and a job body.
//!
//! A job runs on its own thread. It receives a [`JobContext`] carrying the
//! session's interaction channel and the two stop signals, and is expected to
//! call [`JobContext::checkpoint`] at safe points.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::interaction::{InteractionChannel, SecretString};

/// Granularity of [`JobContext::pause`] while waiting for a stop request.
const PAUSE_SLICE: Duration = Duration::from_millis(10);

/// Graceful and forced stop requests, kept as two separate signals: a job
/// parked in the interaction channel never sees the graceful flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignals {
    graceful: CancellationToken,
    forced: CancellationToken,
}

impl StopSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_graceful(&self) {
        self.graceful.cancel();
    }

    /// A forced stop implies a graceful one.
    pub fn request_forced(&self) {
        self.graceful.cancel();
        self.forced.cancel();
    }

    pub fn graceful_requested(&self) -> bool {
        self.graceful.is_cancelled()
    }

    pub fn forced_requested(&self) -> bool {
        self.forced.is_cancelled()
    }

    pub fn stop_requested(&self) -> bool {
        self.graceful_requested() || self.forced_requested()
    }
}

/// What a job hands back on success. The variant decides which page the
/// session shows next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutput {
    Summary { lines: Vec<String> },
    Listing { entries: Vec<String> },
    Download { file_name: String, path: PathBuf },
}

impl JobOutput {
    pub fn summary<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Summary {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

/// Everything a running job may touch.
pub struct JobContext {
    channel: Arc<InteractionChannel>,
    stop: StopSignals,
}

impl JobContext {
    pub fn new(channel: Arc<InteractionChannel>, stop: StopSignals) -> Self {
        Self { channel, stop }
    }

    pub fn channel(&self) -> &InteractionChannel {
        &self.channel
    }

    pub fn log(&self, message: impl Into<String>) {
        self.channel.log(message);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.stop_requested()
    }

    pub fn forced_stop_requested(&self) -> bool {
        self.stop.forced_requested()
    }

    /// Return `Err(JobError::Cancelled)` once any stop has been requested.
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.stop.stop_requested() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `Cancelled` on a stop request.
    pub fn pause(&self, duration: Duration) -> Result<(), JobError> {
        let deadline = Instant::now() + duration;
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }

    pub fn confirm(&self, question: impl Into<String>) -> Result<bool, JobError> {
        self.checkpoint()?;
        Ok(self.channel.post_confirmation(question)?)
    }

    pub fn ask_text(&self, question: impl Into<String>, echo: bool) -> Result<String, JobError> {
        self.checkpoint()?;
        Ok(self.channel.post_text_prompt(question, echo)?)
    }

    pub fn ask_secret(
        &self,
        question: impl Into<String>,
        echo: bool,
    ) -> Result<SecretString, JobError> {
        self.checkpoint()?;
        Ok(self.channel.post_secret_prompt(question, echo)?)
    }
}

/// One long-running operation, executed on a dedicated thread.
pub trait Job: Send + 'static {
    /// Short label used for logging and thread naming.
    fn name(&self) -> &str;

    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput, JobError>;
}

/// Adapter turning a closure into a [`Job`].
pub struct FnJob<F> {
    name: String,
    body: F,
}

impl<F> Job for FnJob<F>
where
    F: FnMut(&JobContext) -> Result<JobOutput, JobError> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput, JobError> {
        (self.body)(ctx)
    }
}

pub fn job_fn<F>(name: impl Into<String>, body: F) -> FnJob<F>
where
    F: FnMut(&JobContext) -> Result<JobOutput, JobError> + Send + 'static,
{
    FnJob {
        name: name.into(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (JobContext, StopSignals) {
        let stop = StopSignals::new();
        let ctx = JobContext::new(Arc::new(InteractionChannel::default()), stop.clone());
        (ctx, stop)
    }

    #[test]
    fn forced_implies_graceful() {
        let stop = StopSignals::new();
        assert!(!stop.stop_requested());
        stop.request_forced();
        assert!(stop.graceful_requested());
        assert!(stop.forced_requested());
    }

    #[test]
    fn checkpoint_reports_cancellation() {
        let (ctx, stop) = context();
        assert!(ctx.checkpoint().is_ok());
        stop.request_graceful();
        assert!(matches!(ctx.checkpoint(), Err(JobError::Cancelled)));
        assert!(!ctx.forced_stop_requested());
    }

    #[test]
    fn pause_wakes_on_stop() {
        let (ctx, stop) = context();
        let stopper = {
            let stop = stop.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                stop.request_graceful();
            })
        };
        let started = Instant::now();
        let result = ctx.pause(Duration::from_secs(10));
        stopper.join().unwrap();
        assert!(matches!(result, Err(JobError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn pause_completes_without_stop() {
        let (ctx, _stop) = context();
        assert!(ctx.pause(Duration::from_millis(15)).is_ok());
    }

    #[test]
    fn ask_skips_channel_once_stopped() {
        let (ctx, stop) = context();
        stop.request_graceful();
        assert!(matches!(ctx.confirm("proceed?"), Err(JobError::Cancelled)));
        assert!(ctx.channel().pending().is_none());
    }

    #[test]
    fn fn_job_runs_closure() {
        let (ctx, _stop) = context();
        let mut job = job_fn("echo", |ctx: &JobContext| {
            ctx.log("ran");
            Ok(JobOutput::summary(["done"]))
        });
        assert_eq!(job.name(), "echo");
        let output = job.run(&ctx).unwrap();
        assert_eq!(output, JobOutput::summary(["done"]));
        assert_eq!(ctx.channel().messages(), vec!["ran"]);
    }
}
