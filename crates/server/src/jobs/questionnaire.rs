// crates/server/src/jobs/questionnaire.rs
//! Exercises every interaction request kind in turn.

use backdesk_core::{Job, JobContext, JobError, JobOutput};
use serde::Deserialize;

pub const KIND: &str = "questionnaire";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuestionnaireParams {
    pub confirmation: String,
    pub name_prompt: String,
    pub secret_prompt: String,
    /// Echo the secret as it is typed.
    pub echo_secret: bool,
}

impl Default for QuestionnaireParams {
    fn default() -> Self {
        Self {
            confirmation: "Proceed with the questionnaire?".to_string(),
            name_prompt: "Archive name?".to_string(),
            secret_prompt: "Passphrase?".to_string(),
            echo_secret: false,
        }
    }
}

pub struct Questionnaire {
    params: QuestionnaireParams,
}

impl Questionnaire {
    pub fn new(params: QuestionnaireParams) -> Self {
        Self { params }
    }
}

impl Job for Questionnaire {
    fn name(&self) -> &str {
        KIND
    }

    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput, JobError> {
        if !ctx.confirm(self.params.confirmation.as_str())? {
            ctx.log("questionnaire declined");
            return Ok(JobOutput::summary(["declined"]));
        }

        let name = ctx.ask_text(self.params.name_prompt.as_str(), true)?;
        ctx.log(format!("archive name set to '{name}'"));

        let secret = ctx.ask_secret(self.params.secret_prompt.as_str(), self.params.echo_secret)?;
        // Only the length ever leaves the job.
        let secret_len = secret.expose().chars().count();

        Ok(JobOutput::summary([
            format!("archive: {name}"),
            format!("passphrase: {secret_len} characters"),
        ]))
    }
}
