// crates/core/src/session.rs
//! One user's working context: UI mode, worker supervisor and interaction
//! channel, driven by [`SessionRequest`]s from the front end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::{JobCatalog, JobKind};
use crate::config::SessionConfig;
use crate::error::JobFailure;
use crate::id::SessionId;
use crate::interaction::{InteractionChannel, InteractionRequest, SecretString};
use crate::job::JobOutput;
use crate::supervisor::{WorkerStatus, WorkerSupervisor};

/// Longest display name accepted by `rename`, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// Which page the front end should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UiMode {
    Config,
    Running,
    Listing,
    Summary,
    Error,
    Download,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SessionRequest {
    Refresh,
    StartJob {
        kind: String,
        #[serde(default)]
        params: Value,
    },
    AnswerConfirmation {
        value: bool,
    },
    AnswerText {
        value: String,
    },
    AnswerSecret {
        value: SecretString,
    },
    GracefulStop,
    ForcedStop,
    Acknowledge,
    Rename {
        name: String,
    },
    BackToConfig,
}

/// Why a request was not applied. Returned inside the view; the session
/// state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SessionRejection {
    JobAlreadyRunning,
    NoJobRunning,
    NothingPending { expected: &'static str },
    InvalidJob { message: String },
    SpawnFailed { message: String },
    InvalidName { message: String },
}

/// Everything the front end needs to render a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: SessionId,
    pub owner: String,
    pub display_name: String,
    pub mode: UiMode,
    pub worker: WorkerStatus,
    pub job: Option<String>,
    pub pending: Option<InteractionRequest>,
    pub messages: Vec<String>,
    pub output: Option<JobOutput>,
    pub error: Option<String>,
    /// The last job ended because of a stop request.
    pub interrupted: bool,
    pub available_jobs: Vec<JobKind>,
    pub rejection: Option<SessionRejection>,
}

/// Session facts readable from the registry without taking the session lock.
pub(crate) struct SessionBadge {
    display_name: RwLock<String>,
    job_running: Arc<AtomicBool>,
}

impl SessionBadge {
    pub(crate) fn display_name(&self) -> String {
        self.display_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_display_name(&self, name: String) {
        *self
            .display_name
            .write()
            .unwrap_or_else(PoisonError::into_inner) = name;
    }

    pub(crate) fn is_job_running(&self) -> bool {
        self.job_running.load(Ordering::Acquire)
    }
}

pub struct Session {
    id: SessionId,
    owner: String,
    badge: Arc<SessionBadge>,
    mode: UiMode,
    supervisor: WorkerSupervisor,
    channel: Arc<InteractionChannel>,
    catalog: Arc<JobCatalog>,
    output: Option<JobOutput>,
    error: Option<String>,
    interrupted: bool,
}

impl Session {
    pub fn new(
        id: SessionId,
        owner: impl Into<String>,
        display_name: Option<String>,
        config: &SessionConfig,
        catalog: Arc<JobCatalog>,
    ) -> Self {
        let channel = Arc::new(InteractionChannel::new(config.message_log_capacity));
        let supervisor = WorkerSupervisor::new(channel.clone(), config.supervisor.clone());
        let badge = Arc::new(SessionBadge {
            display_name: RwLock::new(display_name.unwrap_or_else(|| id.clone())),
            job_running: supervisor.running_flag(),
        });
        Self {
            id,
            owner: owner.into(),
            badge,
            mode: UiMode::Config,
            supervisor,
            channel,
            catalog,
            output: None,
            error: None,
            interrupted: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn display_name(&self) -> String {
        self.badge.display_name()
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    pub fn channel(&self) -> &Arc<InteractionChannel> {
        &self.channel
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut WorkerSupervisor {
        &mut self.supervisor
    }

    pub(crate) fn badge(&self) -> Arc<SessionBadge> {
        self.badge.clone()
    }

    /// Apply one front-end request and describe the resulting state.
    pub fn handle(&mut self, request: SessionRequest) -> SessionView {
        // A job may have ended since the last request; judge the request
        // against the current state.
        self.refresh();
        let rejection = self.apply(request).err();
        if let Some(rejection) = &rejection {
            info!(session_id = %self.id, ?rejection, "session request rejected");
        }
        self.refresh();
        self.view(rejection)
    }

    pub fn view(&self, rejection: Option<SessionRejection>) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            owner: self.owner.clone(),
            display_name: self.badge.display_name(),
            mode: self.mode,
            worker: self.supervisor.status(),
            job: self.supervisor.job_name().map(str::to_string),
            pending: self.channel.pending(),
            messages: self.channel.messages(),
            output: self.output.clone(),
            error: self.error.clone(),
            interrupted: self.interrupted,
            available_jobs: self.catalog.kinds(),
            rejection,
        }
    }

    fn apply(&mut self, request: SessionRequest) -> Result<(), SessionRejection> {
        match request {
            SessionRequest::Refresh => Ok(()),
            SessionRequest::StartJob { kind, params } => self.start_job(&kind, &params),
            SessionRequest::AnswerConfirmation { value } => {
                if self.channel.try_answer_confirmation(value) {
                    Ok(())
                } else {
                    Err(SessionRejection::NothingPending {
                        expected: "confirmation",
                    })
                }
            }
            SessionRequest::AnswerText { value } => {
                if self.channel.try_answer_text_prompt(value) {
                    Ok(())
                } else {
                    Err(SessionRejection::NothingPending {
                        expected: "text_prompt",
                    })
                }
            }
            SessionRequest::AnswerSecret { value } => {
                if self.channel.try_answer_secret_prompt(value) {
                    Ok(())
                } else {
                    Err(SessionRejection::NothingPending {
                        expected: "secret_prompt",
                    })
                }
            }
            SessionRequest::GracefulStop => {
                if self.supervisor.request_graceful_stop() {
                    Ok(())
                } else {
                    Err(SessionRejection::NoJobRunning)
                }
            }
            SessionRequest::ForcedStop => {
                if self.supervisor.request_forced_stop() {
                    Ok(())
                } else {
                    Err(SessionRejection::NoJobRunning)
                }
            }
            SessionRequest::Acknowledge => {
                if self.supervisor.is_running() {
                    return Err(SessionRejection::JobAlreadyRunning);
                }
                self.supervisor.acknowledge();
                self.mode = UiMode::Config;
                Ok(())
            }
            SessionRequest::BackToConfig => {
                if self.supervisor.is_running() {
                    return Err(SessionRejection::JobAlreadyRunning);
                }
                self.supervisor.acknowledge();
                self.mode = UiMode::Config;
                self.output = None;
                self.error = None;
                self.interrupted = false;
                Ok(())
            }
            SessionRequest::Rename { name } => self.rename(&name),
        }
    }

    fn start_job(&mut self, kind: &str, params: &Value) -> Result<(), SessionRejection> {
        if self.supervisor.is_running() {
            return Err(SessionRejection::JobAlreadyRunning);
        }
        let job = self
            .catalog
            .build(kind, params)
            .map_err(|err| SessionRejection::InvalidJob {
                message: err.to_string(),
            })?;
        self.supervisor
            .start(job)
            .map_err(|err| SessionRejection::SpawnFailed {
                message: err.to_string(),
            })?;
        info!(session_id = %self.id, owner = %self.owner, job = kind, "job started from session");
        self.mode = UiMode::Running;
        self.output = None;
        self.error = None;
        self.interrupted = false;
        Ok(())
    }

    fn rename(&mut self, name: &str) -> Result<(), SessionRejection> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionRejection::InvalidName {
                message: "display name must not be empty".into(),
            });
        }
        if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(SessionRejection::InvalidName {
                message: format!("display name is longer than {MAX_DISPLAY_NAME_CHARS} characters"),
            });
        }
        self.badge.set_display_name(name.to_string());
        Ok(())
    }

    /// Pick up a job completion and move to the matching page.
    fn refresh(&mut self) {
        match self.supervisor.poll_status() {
            Err(failure) => self.fail(failure),
            Ok(status) if self.mode == UiMode::Running && !status.is_active() => self.complete(),
            Ok(_) => {}
        }
    }

    fn fail(&mut self, failure: JobFailure) {
        warn!(
            session_id = %self.id,
            job = %failure.job,
            panicked = failure.panicked,
            error = %failure.message,
            "job failed in session"
        );
        self.error = Some(failure.to_string());
        self.output = None;
        self.mode = UiMode::Error;
    }

    fn complete(&mut self) {
        match self.supervisor.last_outcome() {
            Some(WorkerStatus::FinishedOk) => {
                let output = self.supervisor.take_output();
                self.mode = match &output {
                    Some(JobOutput::Listing { .. }) => UiMode::Listing,
                    Some(JobOutput::Download { .. }) => UiMode::Download,
                    Some(JobOutput::Summary { .. }) | None => UiMode::Summary,
                };
                self.output = output;
            }
            Some(WorkerStatus::FinishedCancelled) => {
                self.interrupted = true;
                self.mode = UiMode::Summary;
            }
            // The failure itself was delivered through `fail`.
            Some(WorkerStatus::FinishedWithError) => self.mode = UiMode::Error,
            _ => self.mode = UiMode::Config,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        info!(session_id = %self.id, owner = %self.owner, "session destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use crate::job::{job_fn, Job, JobContext};
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::thread;
    use std::time::{Duration, Instant};

    fn catalog() -> Arc<JobCatalog> {
        let mut catalog = JobCatalog::new();
        catalog.register("list", "lists archives", |_params: &Value| {
            Ok(Box::new(job_fn("list", |_ctx: &JobContext| {
                Ok(JobOutput::Listing {
                    entries: vec!["host-2024-01-01".into(), "host-2024-01-02".into()],
                })
            })) as Box<dyn Job>)
        });
        catalog.register("export", "exports a report", |_params: &Value| {
            Ok(Box::new(job_fn("export", |_ctx: &JobContext| {
                Ok(JobOutput::Download {
                    file_name: "report.txt".into(),
                    path: "/tmp/report.txt".into(),
                })
            })) as Box<dyn Job>)
        });
        catalog.register("ask", "asks for a name", |_params: &Value| {
            Ok(Box::new(job_fn("ask", |ctx: &JobContext| {
                let keep = ctx.confirm("keep going?")?;
                let name = ctx.ask_text("name?", true)?;
                let secret = ctx.ask_secret("passphrase?", false)?;
                Ok(JobOutput::summary([
                    format!("keep={keep}"),
                    format!("name={name}"),
                    format!("secret_len={}", secret.len()),
                ]))
            })) as Box<dyn Job>)
        });
        catalog.register("fail", "always fails", |_params: &Value| {
            Ok(Box::new(job_fn("fail", |_ctx: &JobContext| {
                Err(anyhow!("repository locked").into())
            })) as Box<dyn Job>)
        });
        catalog.register("spin", "runs until stopped", |_params: &Value| {
            Ok(Box::new(job_fn("spin", |ctx: &JobContext| loop {
                ctx.pause(Duration::from_millis(10))?;
            })) as Box<dyn Job>)
        });
        Arc::new(catalog)
    }

    fn session() -> Session {
        Session::new(
            "abcd".into(),
            "alice",
            None,
            &SessionConfig::default(),
            catalog(),
        )
    }

    fn start(kind: &str) -> SessionRequest {
        SessionRequest::StartJob {
            kind: kind.into(),
            params: Value::Null,
        }
    }

    /// Refresh until `done` holds for the view.
    fn refresh_until(session: &mut Session, done: impl Fn(&SessionView) -> bool) -> SessionView {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let view = session.handle(SessionRequest::Refresh);
            if done(&view) {
                return view;
            }
            assert!(Instant::now() < deadline, "session never reached state: {view:?}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn new_session_starts_in_config() {
        let session = session();
        let view = session.view(None);
        assert_eq!(view.mode, UiMode::Config);
        assert_eq!(view.display_name, "abcd");
        assert_eq!(view.worker, WorkerStatus::Idle);
        assert_eq!(view.available_jobs.len(), 5);
    }

    #[test]
    fn listing_output_switches_to_listing_mode() {
        let mut session = session();
        let view = session.handle(start("list"));
        assert!(view.rejection.is_none());

        let view = refresh_until(&mut session, |v| v.mode != UiMode::Running);
        assert_eq!(view.mode, UiMode::Listing);
        assert!(matches!(view.output, Some(JobOutput::Listing { .. })));

        let view = session.handle(SessionRequest::BackToConfig);
        assert_eq!(view.mode, UiMode::Config);
        assert!(view.output.is_none());
    }

    #[test]
    fn download_output_switches_to_download_mode() {
        let mut session = session();
        session.handle(start("export"));
        let view = refresh_until(&mut session, |v| v.mode != UiMode::Running);
        assert_eq!(view.mode, UiMode::Download);
        assert_eq!(
            view.output,
            Some(JobOutput::Download {
                file_name: "report.txt".into(),
                path: "/tmp/report.txt".into(),
            })
        );

        let view = session.handle(SessionRequest::Acknowledge);
        assert_eq!(view.mode, UiMode::Config);
    }

    #[test]
    fn prompts_are_answered_through_requests() {
        let mut session = session();
        session.handle(start("ask"));

        let view = refresh_until(&mut session, |v| v.pending.is_some());
        assert_eq!(
            view.pending,
            Some(InteractionRequest::Confirmation {
                question: "keep going?".into()
            })
        );

        // Wrong answer kind is rejected without touching the channel.
        let view = session.handle(SessionRequest::AnswerText { value: "x".into() });
        assert_eq!(
            view.rejection,
            Some(SessionRejection::NothingPending {
                expected: "text_prompt"
            })
        );

        session.handle(SessionRequest::AnswerConfirmation { value: true });
        refresh_until(&mut session, |v| {
            matches!(v.pending, Some(InteractionRequest::TextPrompt { .. }))
        });
        session.handle(SessionRequest::AnswerText {
            value: "bob".into(),
        });
        refresh_until(&mut session, |v| {
            matches!(v.pending, Some(InteractionRequest::SecretPrompt { .. }))
        });
        session.handle(SessionRequest::AnswerSecret {
            value: SecretString::new("hunter2"),
        });

        let view = refresh_until(&mut session, |v| v.mode != UiMode::Running);
        assert_eq!(view.mode, UiMode::Summary);
        assert_eq!(
            view.output,
            Some(JobOutput::summary(["keep=true", "name=bob", "secret_len=7"]))
        );
    }

    #[test]
    fn failure_moves_to_error_and_session_stays_usable() {
        let mut session = session();
        session.handle(start("fail"));
        let view = refresh_until(&mut session, |v| v.mode != UiMode::Running);
        assert_eq!(view.mode, UiMode::Error);
        assert_eq!(
            view.error.as_deref(),
            Some("job 'fail' failed: repository locked")
        );
        assert_eq!(view.worker, WorkerStatus::FinishedWithError);

        let view = session.handle(SessionRequest::Acknowledge);
        assert_eq!(view.mode, UiMode::Config);
        assert_eq!(view.worker, WorkerStatus::Idle);

        session.handle(start("list"));
        let view = refresh_until(&mut session, |v| v.mode != UiMode::Running);
        assert_eq!(view.mode, UiMode::Listing);
    }

    #[test]
    fn stop_marks_summary_as_interrupted() {
        let mut session = session();
        session.handle(start("spin"));
        let view = session.handle(SessionRequest::GracefulStop);
        assert!(view.rejection.is_none());

        let view = refresh_until(&mut session, |v| v.mode != UiMode::Running);
        assert_eq!(view.mode, UiMode::Summary);
        assert!(view.interrupted);
        assert_eq!(view.worker, WorkerStatus::FinishedCancelled);
    }

    #[test]
    fn forced_stop_releases_pending_prompt() {
        let mut session = session();
        session.handle(start("ask"));
        refresh_until(&mut session, |v| v.pending.is_some());

        session.handle(SessionRequest::ForcedStop);
        let view = refresh_until(&mut session, |v| v.mode != UiMode::Running);
        assert!(view.interrupted);
        assert!(view.pending.is_none());
    }

    #[test]
    fn answer_after_forced_stop_is_rejected() {
        let mut session = session();
        session.handle(start("ask"));
        refresh_until(&mut session, |v| v.pending.is_some());

        let view = session.handle(SessionRequest::ForcedStop);
        assert!(view.rejection.is_none());
        assert!(view.pending.is_none());

        let view = session.handle(SessionRequest::AnswerConfirmation { value: true });
        assert_eq!(
            view.rejection,
            Some(SessionRejection::NothingPending {
                expected: "confirmation"
            })
        );
        let view = refresh_until(&mut session, |v| v.mode != UiMode::Running);
        assert!(view.interrupted);
        assert_eq!(view.worker, WorkerStatus::FinishedCancelled);
    }

    #[test]
    fn conflicting_requests_are_rejected() {
        let mut session = session();
        assert_eq!(
            session.handle(SessionRequest::GracefulStop).rejection,
            Some(SessionRejection::NoJobRunning)
        );
        assert_eq!(
            session
                .handle(SessionRequest::AnswerConfirmation { value: true })
                .rejection,
            Some(SessionRejection::NothingPending {
                expected: "confirmation"
            })
        );

        session.handle(start("spin"));
        assert_eq!(
            session.handle(start("list")).rejection,
            Some(SessionRejection::JobAlreadyRunning)
        );
        assert_eq!(
            session.handle(SessionRequest::BackToConfig).rejection,
            Some(SessionRejection::JobAlreadyRunning)
        );
        session.handle(SessionRequest::ForcedStop);
    }

    #[test]
    fn unknown_job_is_rejected() {
        let mut session = session();
        let view = session.handle(SessionRequest::StartJob {
            kind: "prune".into(),
            params: json!({}),
        });
        assert!(matches!(
            view.rejection,
            Some(SessionRejection::InvalidJob { .. })
        ));
        assert_eq!(view.mode, UiMode::Config);
    }

    #[test]
    fn rename_validates_name() {
        let mut session = session();
        let view = session.handle(SessionRequest::Rename {
            name: "  nightly  ".into(),
        });
        assert_eq!(view.display_name, "nightly");

        let view = session.handle(SessionRequest::Rename { name: "  ".into() });
        assert!(matches!(
            view.rejection,
            Some(SessionRejection::InvalidName { .. })
        ));
        let view = session.handle(SessionRequest::Rename {
            name: "x".repeat(MAX_DISPLAY_NAME_CHARS + 1),
        });
        assert!(view.rejection.is_some());
        assert_eq!(view.display_name, "nightly");
    }

    #[test]
    fn auto_hide_still_shows_output_page() {
        let config = SessionConfig {
            supervisor: SupervisorConfig {
                auto_hide: true,
                auto_hide_after_stop: false,
            },
            ..SessionConfig::default()
        };
        let mut session = Session::new("wxyz".into(), "bob", None, &config, catalog());
        session.handle(start("list"));
        let view = refresh_until(&mut session, |v| v.mode != UiMode::Running);
        assert_eq!(view.mode, UiMode::Listing);
        assert_eq!(view.worker, WorkerStatus::Idle);
    }

    #[test]
    fn requests_deserialize_from_tagged_json() {
        let request: SessionRequest =
            serde_json::from_value(json!({"action": "answer_secret", "value": "s3cret"})).unwrap();
        assert!(matches!(request, SessionRequest::AnswerSecret { ref value } if value.expose() == "s3cret"));
        assert!(!format!("{request:?}").contains("s3cret"));

        let request: SessionRequest =
            serde_json::from_value(json!({"action": "start_job", "kind": "ticker"})).unwrap();
        assert!(matches!(request, SessionRequest::StartJob { ref params, .. } if params.is_null()));
    }
}
