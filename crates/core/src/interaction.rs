// crates/core/src/interaction.rs
//! Blocking question/answer rendezvous between a job thread and the polling
//! front end.
//!
//! The job thread is a genuine blocking waiter: `post_*` parks it on a
//! condition variable until an answer arrives. The front end never blocks: each
//! request either peeks at the pending question or supplies the answer and
//! returns immediately.
//!
//! At most one request is outstanding per channel. Posting a second one, or
//! answering when nothing matching is pending, is a programming error and
//! panics. Front ends that race with a forced stop use the `try_answer_*`
//! variants instead.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::config::DEFAULT_MESSAGE_LOG_CAPACITY;
use crate::error::Interrupted;

/// A string whose contents are redacted from `Debug` and wiped on drop.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A question posted by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InteractionRequest {
    Confirmation { question: String },
    TextPrompt { question: String, echo: bool },
    SecretPrompt { question: String, echo: bool },
}

impl InteractionRequest {
    fn kind(&self) -> &'static str {
        match self {
            Self::Confirmation { .. } => "confirmation",
            Self::TextPrompt { .. } => "text prompt",
            Self::SecretPrompt { .. } => "secret prompt",
        }
    }
}

/// A pending text or secret prompt as seen by the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub question: String,
    pub echo: bool,
}

enum Answer {
    Confirmation(bool),
    Text(String),
    Secret(SecretString),
}

impl Answer {
    fn kind(&self) -> &'static str {
        match self {
            Self::Confirmation(_) => "confirmation",
            Self::Text(_) => "text prompt",
            Self::Secret(_) => "secret prompt",
        }
    }

    fn answers(&self, request: &InteractionRequest) -> bool {
        matches!(
            (self, request),
            (Self::Confirmation(_), InteractionRequest::Confirmation { .. })
                | (Self::Text(_), InteractionRequest::TextPrompt { .. })
                | (Self::Secret(_), InteractionRequest::SecretPrompt { .. })
        )
    }
}

/// Why an answer could not be stored.
enum Refusal {
    Interrupted,
    NothingPending,
    WrongKind(&'static str),
    AlreadyAnswered,
}

struct ChannelState {
    pending: Option<InteractionRequest>,
    answer: Option<Answer>,
    /// Set by a forced stop; sticky until `reset`.
    interrupted: bool,
    /// A job thread is parked in a `post_*` call.
    waiting: bool,
    messages: VecDeque<String>,
    capacity: usize,
}

impl ChannelState {
    fn trim(&mut self) {
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }
}

pub struct InteractionChannel {
    state: Mutex<ChannelState>,
    answered: Condvar,
}

impl InteractionChannel {
    /// Create a channel keeping at most `log_capacity` messages (minimum 1).
    pub fn new(log_capacity: usize) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                pending: None,
                answer: None,
                interrupted: false,
                waiting: false,
                messages: VecDeque::new(),
                capacity: log_capacity.max(1),
            }),
            answered: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Job side -------------------------------------------------------------

    /// Ask a yes/no question and block until it is answered.
    ///
    /// # Panics
    ///
    /// If another request is already pending on this channel.
    pub fn post_confirmation(&self, question: impl Into<String>) -> Result<bool, Interrupted> {
        match self.post(InteractionRequest::Confirmation {
            question: question.into(),
        })? {
            Answer::Confirmation(value) => Ok(value),
            other => unreachable!("confirmation answered with a {}", other.kind()),
        }
    }

    /// Ask for a plain string and block until it is answered.
    ///
    /// # Panics
    ///
    /// If another request is already pending on this channel.
    pub fn post_text_prompt(
        &self,
        question: impl Into<String>,
        echo: bool,
    ) -> Result<String, Interrupted> {
        match self.post(InteractionRequest::TextPrompt {
            question: question.into(),
            echo,
        })? {
            Answer::Text(value) => Ok(value),
            other => unreachable!("text prompt answered with a {}", other.kind()),
        }
    }

    /// Ask for a secret and block until it is answered.
    ///
    /// # Panics
    ///
    /// If another request is already pending on this channel.
    pub fn post_secret_prompt(
        &self,
        question: impl Into<String>,
        echo: bool,
    ) -> Result<SecretString, Interrupted> {
        match self.post(InteractionRequest::SecretPrompt {
            question: question.into(),
            echo,
        })? {
            Answer::Secret(value) => Ok(value),
            other => unreachable!("secret prompt answered with a {}", other.kind()),
        }
    }

    fn post(&self, request: InteractionRequest) -> Result<Answer, Interrupted> {
        let mut state = self.lock();
        if let Some(existing) = &state.pending {
            panic!(
                "interaction {} posted while a {} is still pending",
                request.kind(),
                existing.kind()
            );
        }
        if state.interrupted {
            return Err(Interrupted);
        }

        tracing::debug!(kind = request.kind(), "interaction request posted");
        state.pending = Some(request);
        state.answer = None;
        state.waiting = true;

        let mut state = self
            .answered
            .wait_while(state, |s| s.answer.is_none() && !s.interrupted)
            .unwrap_or_else(PoisonError::into_inner);
        state.waiting = false;

        // An interrupt wins over an answer that arrived in the same window.
        if state.interrupted {
            state.pending = None;
            state.answer = None;
            tracing::debug!("interaction wait interrupted");
            return Err(Interrupted);
        }
        let Some(answer) = state.answer.take() else {
            unreachable!("interaction wait ended without an answer");
        };
        match state.pending.take() {
            Some(pending) if answer.answers(&pending) => Ok(answer),
            Some(pending) => panic!(
                "pending {} was answered with a {}",
                pending.kind(),
                answer.kind()
            ),
            None => panic!("interaction answered after its request was cleared"),
        }
    }

    /// Append an informational message, evicting the oldest beyond capacity.
    pub fn log(&self, message: impl Into<String>) {
        let mut state = self.lock();
        state.messages.push_back(message.into());
        state.trim();
    }

    // -- Front-end side -------------------------------------------------------

    /// The pending, unanswered request of any kind. Nothing is reported once
    /// the channel has been interrupted.
    pub fn pending(&self) -> Option<InteractionRequest> {
        let state = self.lock();
        if state.interrupted {
            return None;
        }
        match (&state.pending, &state.answer) {
            (Some(request), None) => Some(request.clone()),
            _ => None,
        }
    }

    pub fn pending_confirmation(&self) -> Option<String> {
        match self.pending() {
            Some(InteractionRequest::Confirmation { question }) => Some(question),
            _ => None,
        }
    }

    pub fn pending_text_prompt(&self) -> Option<Prompt> {
        match self.pending() {
            Some(InteractionRequest::TextPrompt { question, echo }) => Some(Prompt { question, echo }),
            _ => None,
        }
    }

    pub fn pending_secret_prompt(&self) -> Option<Prompt> {
        match self.pending() {
            Some(InteractionRequest::SecretPrompt { question, echo }) => {
                Some(Prompt { question, echo })
            }
            _ => None,
        }
    }

    /// # Panics
    ///
    /// If no confirmation is pending, it was already answered, or the channel
    /// was interrupted.
    pub fn answer_confirmation(&self, value: bool) {
        self.answer(Answer::Confirmation(value));
    }

    /// # Panics
    ///
    /// If no text prompt is pending, it was already answered, or the channel
    /// was interrupted.
    pub fn answer_text_prompt(&self, value: impl Into<String>) {
        self.answer(Answer::Text(value.into()));
    }

    /// # Panics
    ///
    /// If no secret prompt is pending, it was already answered, or the
    /// channel was interrupted.
    pub fn answer_secret_prompt(&self, value: SecretString) {
        self.answer(Answer::Secret(value));
    }

    /// Answer the pending confirmation if there is one. Returns false, leaving
    /// the channel untouched, when nothing matching can take the answer.
    pub fn try_answer_confirmation(&self, value: bool) -> bool {
        self.store(Answer::Confirmation(value)).is_ok()
    }

    pub fn try_answer_text_prompt(&self, value: impl Into<String>) -> bool {
        self.store(Answer::Text(value.into())).is_ok()
    }

    pub fn try_answer_secret_prompt(&self, value: SecretString) -> bool {
        self.store(Answer::Secret(value)).is_ok()
    }

    fn answer(&self, answer: Answer) {
        let kind = answer.kind();
        match self.store(answer) {
            Ok(()) => {}
            Err(Refusal::Interrupted) => {
                panic!("cannot answer a {kind}: the channel was interrupted")
            }
            Err(Refusal::NothingPending) => panic!("cannot answer a {kind}: nothing is pending"),
            Err(Refusal::WrongKind(pending)) => {
                panic!("cannot answer a {kind}: the pending request is a {pending}")
            }
            Err(Refusal::AlreadyAnswered) => panic!("pending {kind} was already answered"),
        }
    }

    /// Check and store under one lock so an interrupt cannot slip in between.
    fn store(&self, answer: Answer) -> Result<(), Refusal> {
        let mut state = self.lock();
        if state.interrupted {
            return Err(Refusal::Interrupted);
        }
        match &state.pending {
            Some(pending) if answer.answers(pending) => {}
            Some(pending) => return Err(Refusal::WrongKind(pending.kind())),
            None => return Err(Refusal::NothingPending),
        }
        if state.answer.is_some() {
            return Err(Refusal::AlreadyAnswered);
        }
        tracing::debug!(kind = answer.kind(), "interaction request answered");
        state.answer = Some(answer);
        drop(state);
        self.answered.notify_all();
        Ok(())
    }

    /// Snapshot of the message log, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.lock().messages.iter().cloned().collect()
    }

    pub fn set_log_capacity(&self, capacity: usize) {
        let mut state = self.lock();
        state.capacity = capacity.max(1);
        state.trim();
    }

    // -- Supervisor side ------------------------------------------------------

    /// Wake any parked job with [`Interrupted`] and refuse further posts until
    /// [`reset`](Self::reset).
    pub fn interrupt(&self) {
        let mut state = self.lock();
        state.interrupted = true;
        drop(state);
        self.answered.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.lock().interrupted
    }

    /// True while a job thread is parked in a `post_*` call.
    pub fn is_waiting(&self) -> bool {
        self.lock().waiting
    }

    /// Clear pending, answered and interrupted state plus the message log.
    ///
    /// # Panics
    ///
    /// If a job thread is still parked in a `post_*` call.
    pub fn reset(&self) {
        let mut state = self.lock();
        assert!(
            !state.waiting,
            "interaction channel reset while a job is waiting for an answer"
        );
        state.pending = None;
        state.answer = None;
        state.interrupted = false;
        state.messages.clear();
    }
}

impl Default for InteractionChannel {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_LOG_CAPACITY)
    }
}
