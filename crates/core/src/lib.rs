// crates/core/src/lib.rs
pub mod catalog;
pub mod config;
pub mod error;
pub mod id;
pub mod interaction;
pub mod job;
pub mod registry;
pub mod session;
pub mod supervisor;

pub use catalog::{JobCatalog, JobKind};
pub use config::{RegistryConfig, SessionConfig, SupervisorConfig};
pub use error::*;
pub use id::SessionId;
pub use interaction::{InteractionChannel, InteractionRequest, Prompt, SecretString};
pub use job::{job_fn, FnJob, Job, JobContext, JobOutput, StopSignals};
pub use registry::{Landing, SessionLease, SessionRegistry, SessionSummary};
pub use session::{Session, SessionRejection, SessionRequest, SessionView, UiMode};
pub use supervisor::{WorkerStatus, WorkerSupervisor};
