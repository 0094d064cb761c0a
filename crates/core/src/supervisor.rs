// crates/core/src/supervisor.rs
//! Lifecycle manager for at most one running job per session.
//!
//! ```text
//! Idle ──start──▶ Running ──stop──▶ {GracefulStopRequested, ForcedStopRequested}
//!                    │                              │
//!                    └──────── job thread exits ◀───┘
//!                                   │
//!                     Finished(ok | error | cancelled) ──acknowledge──▶ Idle
//! ```
//!
//! Failures raised on the job thread (returned errors and panics alike) are
//! captured there and handed to the supervising thread on the first
//! [`WorkerSupervisor::poll_status`] or [`WorkerSupervisor::join`] that
//! observes the exit. Every later call reports a plain status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::SupervisorConfig;
use crate::error::{JobError, JobFailure, SpawnError};
use crate::interaction::InteractionChannel;
use crate::job::{Job, JobContext, JobOutput, StopSignals};

/// Lifecycle state as shown to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Running,
    GracefulStopRequested,
    ForcedStopRequested,
    FinishedOk,
    FinishedWithError,
    FinishedCancelled,
}

impl WorkerStatus {
    /// A job thread exists for this status.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Running | Self::GracefulStopRequested | Self::ForcedStopRequested
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            Self::FinishedOk | Self::FinishedWithError | Self::FinishedCancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopKind {
    Graceful,
    Forced,
}

type JobResult = Result<JobOutput, JobError>;

struct RunningJob {
    name: String,
    handle: JoinHandle<JobResult>,
    stop: StopSignals,
    stop_kind: Option<StopKind>,
    started_at: Instant,
}

struct FinishedJob {
    name: String,
    status: WorkerStatus,
}

enum Phase {
    Idle,
    Running(RunningJob),
    Finished(FinishedJob),
}

/// Clears the shared "job running" flag when the job thread unwinds, even on
/// panic.
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct WorkerSupervisor {
    channel: Arc<InteractionChannel>,
    config: SupervisorConfig,
    phase: Phase,
    /// Mirrors "a job thread is alive"; readable without the session lock.
    running: Arc<AtomicBool>,
    /// Failure captured from the last job, not yet handed out.
    unreported: Option<JobFailure>,
    last_outcome: Option<WorkerStatus>,
    last_output: Option<JobOutput>,
    last_elapsed: Option<Duration>,
}

impl WorkerSupervisor {
    pub fn new(channel: Arc<InteractionChannel>, config: SupervisorConfig) -> Self {
        Self {
            channel,
            config,
            phase: Phase::Idle,
            running: Arc::new(AtomicBool::new(false)),
            unreported: None,
            last_outcome: None,
            last_output: None,
            last_elapsed: None,
        }
    }

    /// Spawn `job` on a dedicated thread.
    ///
    /// A previous finished job is acknowledged implicitly and the interaction
    /// channel is reset.
    ///
    /// # Panics
    ///
    /// If a job is already running on this supervisor.
    pub fn start(&mut self, job: Box<dyn Job>) -> Result<(), SpawnError> {
        if let Phase::Running(running) = &self.phase {
            panic!(
                "job '{}' started while job '{}' is still running",
                job.name(),
                running.name
            );
        }
        if let Some(failure) = self.unreported.take() {
            warn!(job = %failure.job, error = %failure.message, "discarding unreported job failure");
        }
        self.phase = Phase::Idle;
        self.last_outcome = None;
        self.last_output = None;
        self.last_elapsed = None;
        self.channel.reset();

        let name = job.name().to_string();
        let stop = StopSignals::new();
        let ctx = JobContext::new(self.channel.clone(), stop.clone());

        self.running.store(true, Ordering::Release);
        let flag = RunningFlag(self.running.clone());
        let mut job = job;
        let spawned = thread::Builder::new()
            .name(format!("job-{name}"))
            .spawn(move || {
                let _flag = flag;
                job.run(&ctx)
            });

        match spawned {
            Ok(handle) => {
                info!(job = %name, "job started");
                self.phase = Phase::Running(RunningJob {
                    name,
                    handle,
                    stop,
                    stop_kind: None,
                    started_at: Instant::now(),
                });
                Ok(())
            }
            Err(source) => {
                self.running.store(false, Ordering::Release);
                Err(SpawnError { job: name, source })
            }
        }
    }

    /// Non-blocking status check. Records the outcome of a job thread that has
    /// exited; a failure is returned as `Err` exactly once.
    pub fn poll_status(&mut self) -> Result<WorkerStatus, JobFailure> {
        self.reap(false);
        self.report()
    }

    /// Block until the job thread has terminated, with the same
    /// exactly-once failure delivery as [`poll_status`](Self::poll_status).
    ///
    /// A job parked on an interaction request only returns once it is
    /// answered or a forced stop interrupts it.
    pub fn join(&mut self) -> Result<WorkerStatus, JobFailure> {
        self.reap(true);
        self.report()
    }

    /// Raise the cooperative stop flag. Returns false when no job is running.
    pub fn request_graceful_stop(&mut self) -> bool {
        match &mut self.phase {
            Phase::Running(running) => {
                running.stop.request_graceful();
                if running.stop_kind.is_none() {
                    running.stop_kind = Some(StopKind::Graceful);
                }
                info!(job = %running.name, "graceful stop requested");
                true
            }
            _ => false,
        }
    }

    /// Raise both stop flags and interrupt any interaction wait so the job can
    /// unwind. Returns false when no job is running.
    pub fn request_forced_stop(&mut self) -> bool {
        match &mut self.phase {
            Phase::Running(running) => {
                running.stop.request_forced();
                running.stop_kind = Some(StopKind::Forced);
                self.channel.interrupt();
                warn!(job = %running.name, "forced stop requested");
                true
            }
            _ => false,
        }
    }

    /// Leave the `Finished` state. Returns false if there was nothing to
    /// acknowledge.
    pub fn acknowledge(&mut self) -> bool {
        if !matches!(self.phase, Phase::Finished(_)) {
            return false;
        }
        if let Some(failure) = self.unreported.take() {
            warn!(job = %failure.job, error = %failure.message, "job failure acknowledged unseen");
        }
        self.phase = Phase::Idle;
        true
    }

    /// Current status without reaping an exited job thread.
    pub fn status(&self) -> WorkerStatus {
        match &self.phase {
            Phase::Idle => WorkerStatus::Idle,
            Phase::Running(running) => match running.stop_kind {
                None => WorkerStatus::Running,
                Some(StopKind::Graceful) => WorkerStatus::GracefulStopRequested,
                Some(StopKind::Forced) => WorkerStatus::ForcedStopRequested,
            },
            Phase::Finished(finished) => finished.status,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running(_))
    }

    /// Name of the running or finished-but-unacknowledged job.
    pub fn job_name(&self) -> Option<&str> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Running(running) => Some(&running.name),
            Phase::Finished(finished) => Some(&finished.name),
        }
    }

    /// Final status of the most recent job, kept across auto-hide and
    /// acknowledgement until the next `start`.
    pub fn last_outcome(&self) -> Option<WorkerStatus> {
        self.last_outcome
    }

    /// Output of the most recent successful job.
    pub fn take_output(&mut self) -> Option<JobOutput> {
        self.last_output.take()
    }

    /// Wall-clock duration of the most recent job.
    pub fn last_elapsed(&self) -> Option<Duration> {
        self.last_elapsed
    }

    pub fn channel(&self) -> &Arc<InteractionChannel> {
        &self.channel
    }

    pub(crate) fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn report(&mut self) -> Result<WorkerStatus, JobFailure> {
        match self.unreported.take() {
            Some(failure) => Err(failure),
            None => Ok(self.status()),
        }
    }

    fn reap(&mut self, block: bool) {
        let exited = match &self.phase {
            Phase::Running(running) => block || running.handle.is_finished(),
            _ => false,
        };
        if !exited {
            return;
        }
        let Phase::Running(running) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };
        let stopped = running.stop_kind.is_some();
        let result = running.handle.join();
        self.record(running.name, stopped, running.started_at.elapsed(), result);
    }

    fn record(
        &mut self,
        name: String,
        stopped: bool,
        elapsed: Duration,
        result: thread::Result<JobResult>,
    ) {
        let (status, failure, output) = match result {
            Ok(Ok(output)) => (WorkerStatus::FinishedOk, None, Some(output)),
            Ok(Err(JobError::Cancelled)) => (WorkerStatus::FinishedCancelled, None, None),
            Ok(Err(JobError::Failed(err))) => (
                WorkerStatus::FinishedWithError,
                Some(JobFailure::new(&name, format!("{err:#}"))),
                None,
            ),
            Err(payload) => (
                WorkerStatus::FinishedWithError,
                Some(JobFailure::from_panic(&name, &*payload)),
                None,
            ),
        };

        match &failure {
            Some(failure) => warn!(
                job = %name,
                error = %failure.message,
                panicked = failure.panicked,
                elapsed_ms = elapsed.as_millis() as u64,
                "job failed"
            ),
            None => info!(
                job = %name,
                status = ?status,
                elapsed_ms = elapsed.as_millis() as u64,
                "job finished"
            ),
        }

        self.unreported = failure;
        self.last_outcome = Some(status);
        self.last_output = output;
        self.last_elapsed = Some(elapsed);

        let hide = status != WorkerStatus::FinishedWithError
            && self.config.auto_hide
            && (!stopped || self.config.auto_hide_after_stop);
        self.phase = if hide {
            Phase::Idle
        } else {
            Phase::Finished(FinishedJob { name, status })
        };
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        if let Phase::Running(running) = std::mem::replace(&mut self.phase, Phase::Idle) {
            warn!(job = %running.name, "supervisor dropped with a running job, forcing stop");
            running.stop.request_forced();
            self.channel.interrupt();
            if running.handle.join().is_err() {
                warn!(job = %running.name, "job thread panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::job_fn;
    use anyhow::anyhow;

    fn supervisor(config: SupervisorConfig) -> WorkerSupervisor {
        WorkerSupervisor::new(Arc::new(InteractionChannel::default()), config)
    }

    /// Poll until the job leaves the active states.
    fn settle(sup: &mut WorkerSupervisor) -> Result<WorkerStatus, JobFailure> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let result = sup.poll_status();
            match &result {
                Ok(status) if status.is_active() => {
                    assert!(Instant::now() < deadline, "job did not finish in time");
                    thread::sleep(Duration::from_millis(5));
                }
                _ => return result,
            }
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn endless() -> Box<dyn Job> {
        Box::new(job_fn("endless", |ctx: &JobContext| loop {
            ctx.pause(Duration::from_millis(20))?;
        }))
    }

    #[test]
    fn successful_job_reports_output() {
        let mut sup = supervisor(SupervisorConfig::default());
        assert_eq!(sup.status(), WorkerStatus::Idle);

        sup.start(Box::new(job_fn("count", |ctx: &JobContext| {
            ctx.log("counted");
            Ok(JobOutput::summary(["3 files"]))
        })))
        .unwrap();

        assert_eq!(settle(&mut sup), Ok(WorkerStatus::FinishedOk));
        assert_eq!(sup.job_name(), Some("count"));
        assert_eq!(sup.last_outcome(), Some(WorkerStatus::FinishedOk));
        assert_eq!(sup.take_output(), Some(JobOutput::summary(["3 files"])));
        assert_eq!(sup.channel().messages(), vec!["counted"]);
        assert!(sup.last_elapsed().is_some());

        assert!(sup.acknowledge());
        assert_eq!(sup.status(), WorkerStatus::Idle);
        assert!(!sup.acknowledge());
    }

    #[test]
    fn failure_is_reported_exactly_once() {
        let mut sup = supervisor(SupervisorConfig::default());
        sup.start(Box::new(job_fn("broken", |_ctx: &JobContext| {
            Err(anyhow!("archive corrupted").into())
        })))
        .unwrap();

        let failure = settle(&mut sup).unwrap_err();
        assert_eq!(failure.job, "broken");
        assert_eq!(failure.message, "archive corrupted");
        assert!(!failure.panicked);

        assert_eq!(sup.poll_status(), Ok(WorkerStatus::FinishedWithError));
        assert_eq!(sup.join(), Ok(WorkerStatus::FinishedWithError));
    }

    #[test]
    fn panic_is_captured_as_failure() {
        let mut sup = supervisor(SupervisorConfig::default());
        sup.start(Box::new(job_fn("explodes", |_ctx: &JobContext| -> Result<JobOutput, JobError> {
            panic!("slice index out of range")
        })))
        .unwrap();

        let failure = sup.join().unwrap_err();
        assert!(failure.panicked);
        assert_eq!(failure.message, "slice index out of range");
        assert!(!sup.running_flag().load(Ordering::Acquire));
    }

    #[test]
    fn graceful_stop_ends_cancelled() {
        let mut sup = supervisor(SupervisorConfig::default());
        sup.start(endless()).unwrap();
        assert_eq!(sup.poll_status(), Ok(WorkerStatus::Running));

        assert!(sup.request_graceful_stop());
        assert_eq!(sup.status(), WorkerStatus::GracefulStopRequested);
        assert_eq!(settle(&mut sup), Ok(WorkerStatus::FinishedCancelled));
        assert!(!sup.request_graceful_stop());
    }

    #[test]
    fn forced_stop_unblocks_interaction_wait() {
        let mut sup = supervisor(SupervisorConfig::default());
        sup.start(Box::new(job_fn("asks", |ctx: &JobContext| {
            let name = ctx.ask_text("archive name?", true)?;
            Ok(JobOutput::summary([name]))
        })))
        .unwrap();

        let channel = sup.channel().clone();
        wait_for(|| channel.is_waiting());

        // A graceful stop cannot reach a job parked on a question.
        assert!(sup.request_graceful_stop());
        thread::sleep(Duration::from_millis(30));
        assert!(sup.is_running());

        assert!(sup.request_forced_stop());
        assert_eq!(sup.status(), WorkerStatus::ForcedStopRequested);
        assert_eq!(sup.join(), Ok(WorkerStatus::FinishedCancelled));
        assert!(channel.pending().is_none());
    }

    #[test]
    #[should_panic(expected = "is still running")]
    fn starting_twice_panics() {
        let mut sup = supervisor(SupervisorConfig::default());
        sup.start(endless()).unwrap();
        // The supervisor's Drop stops the first job while unwinding.
        let _ = sup.start(endless());
    }

    #[test]
    fn restart_after_finish_resets_channel() {
        let mut sup = supervisor(SupervisorConfig::default());
        sup.start(Box::new(job_fn("first", |ctx: &JobContext| {
            ctx.log("from first");
            Ok(JobOutput::summary(["1"]))
        })))
        .unwrap();
        settle(&mut sup).unwrap();

        sup.start(Box::new(job_fn("second", |_ctx: &JobContext| {
            Ok(JobOutput::summary(["2"]))
        })))
        .unwrap();
        assert!(sup.channel().messages().is_empty());
        assert_eq!(settle(&mut sup), Ok(WorkerStatus::FinishedOk));
        assert_eq!(sup.job_name(), Some("second"));
    }

    #[test]
    fn auto_hide_returns_to_idle_on_success() {
        let mut sup = supervisor(SupervisorConfig {
            auto_hide: true,
            auto_hide_after_stop: false,
        });
        sup.start(Box::new(job_fn("quick", |_ctx: &JobContext| {
            Ok(JobOutput::summary(["done"]))
        })))
        .unwrap();
        assert_eq!(sup.join(), Ok(WorkerStatus::Idle));
        assert_eq!(sup.last_outcome(), Some(WorkerStatus::FinishedOk));
        assert!(sup.take_output().is_some());
    }

    #[test]
    fn auto_hide_is_suppressed_after_stop_request() {
        let mut sup = supervisor(SupervisorConfig {
            auto_hide: true,
            auto_hide_after_stop: false,
        });
        sup.start(endless()).unwrap();
        sup.request_graceful_stop();
        assert_eq!(sup.join(), Ok(WorkerStatus::FinishedCancelled));

        let mut sup = supervisor(SupervisorConfig {
            auto_hide: true,
            auto_hide_after_stop: true,
        });
        sup.start(endless()).unwrap();
        sup.request_graceful_stop();
        assert_eq!(sup.join(), Ok(WorkerStatus::Idle));
        assert_eq!(sup.last_outcome(), Some(WorkerStatus::FinishedCancelled));
    }

    #[test]
    fn failures_are_never_auto_hidden() {
        let mut sup = supervisor(SupervisorConfig {
            auto_hide: true,
            auto_hide_after_stop: true,
        });
        sup.start(Box::new(job_fn("broken", |_ctx: &JobContext| {
            Err(anyhow!("no space left").into())
        })))
        .unwrap();
        assert!(sup.join().is_err());
        assert_eq!(sup.status(), WorkerStatus::FinishedWithError);
    }

    #[test]
    fn running_flag_tracks_thread() {
        let mut sup = supervisor(SupervisorConfig::default());
        let flag = sup.running_flag();
        assert!(!flag.load(Ordering::Acquire));

        sup.start(endless()).unwrap();
        assert!(flag.load(Ordering::Acquire));

        sup.request_forced_stop();
        sup.join().unwrap();
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn dropping_supervisor_stops_job() {
        let mut sup = supervisor(SupervisorConfig::default());
        sup.start(endless()).unwrap();
        let flag = sup.running_flag();
        drop(sup);
        assert!(!flag.load(Ordering::Acquire));
    }
}
