//! One answer request per user turn.
//!
//! Per session the orchestrator moves `Idle -> Sending -> {Succeeded, Failed} -> Idle`.
//! A submit that finds its session anywhere but `Idle` is rejected without
//! touching the timeline. A failed exchange rolls the optimistic user message
//! back and raises a failure notice. A turn abandoned mid-flight leaves its
//! user message unanswered; the next submit for that session removes it first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::answering::{AnswerRequest, AnsweringService, ChatRequest, DocumentChatRequest, FALLBACK_ANSWER};
use crate::documents::DocumentLibrary;
use crate::error::{RepositoryError, TurnError};
use crate::notice::{Notice, Notifier};
use crate::repository::SessionRepository;
use crate::reveal::{AnswerRevealer, RevealSink};
use crate::session::Message;
use crate::settings::EmptyAnswerPolicy;
use crate::timeline::normalize_input;

pub const SEND_FAILED_NOTICE: &str = "Failed to send message. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    Succeeded,
    Failed,
}

/// Where answers come from.
#[derive(Clone)]
pub enum ChatMode {
    /// Free-form Q&A with no context.
    Free,
    /// Q&A grounded in the user's documents, read at submit time.
    Document(Arc<DocumentLibrary>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub session_id: Uuid,
    pub user: Message,
    pub assistant: Message,
    /// The service gave no usable output and the fallback reply was committed.
    pub degraded: bool,
}

struct Answer {
    text: String,
    degraded: bool,
}

type FlightTable = Mutex<HashMap<Uuid, TurnState>>;

fn lock(table: &FlightTable) -> MutexGuard<'_, HashMap<Uuid, TurnState>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

fn state_of(flights: &HashMap<Uuid, TurnState>, session_id: Uuid) -> TurnState {
    flights.get(&session_id).copied().unwrap_or(TurnState::Idle)
}

/// Marks a session busy; dropping it returns the session to `Idle`.
struct Flight<'a> {
    table: &'a FlightTable,
    session_id: Uuid,
}

impl<'a> Flight<'a> {
    fn begin(table: &'a FlightTable, session_id: Uuid) -> Option<Self> {
        let mut flights = lock(table);
        if state_of(&flights, session_id) != TurnState::Idle {
            return None;
        }
        flights.insert(session_id, TurnState::Sending);
        Some(Self { table, session_id })
    }

    fn set(&self, state: TurnState) {
        lock(self.table).insert(self.session_id, state);
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        lock(self.table).remove(&self.session_id);
    }
}

fn record(outcome: &'static str) {
    metrics::counter!("docchat_turns_total", "outcome" => outcome).increment(1);
}

pub struct RequestOrchestrator {
    repo: Arc<SessionRepository>,
    service: Arc<dyn AnsweringService>,
    mode: ChatMode,
    notifier: Arc<dyn Notifier>,
    revealer: AnswerRevealer,
    empty_answer: EmptyAnswerPolicy,
    flights: FlightTable,
}

impl RequestOrchestrator {
    pub fn new(
        repo: Arc<SessionRepository>,
        service: Arc<dyn AnsweringService>,
        mode: ChatMode,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            repo,
            service,
            mode,
            notifier,
            revealer: AnswerRevealer::default(),
            empty_answer: EmptyAnswerPolicy::default(),
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_revealer(mut self, revealer: AnswerRevealer) -> Self {
        self.revealer = revealer;
        self
    }

    pub fn with_empty_answer(mut self, policy: EmptyAnswerPolicy) -> Self {
        self.empty_answer = policy;
        self
    }

    pub fn repository(&self) -> &Arc<SessionRepository> {
        &self.repo
    }

    #[cfg(test)]
    pub fn state(&self, session_id: Uuid) -> TurnState {
        state_of(&lock(&self.flights), session_id)
    }

    /// Removes a user message left unanswered by an abandoned turn.
    ///
    /// Does nothing while a turn for the session is in flight.
    pub async fn discard_unanswered(&self, session_id: Uuid) -> Result<bool, RepositoryError> {
        let Some(_flight) = Flight::begin(&self.flights, session_id) else {
            return Ok(false);
        };
        self.discard_pending(session_id).await
    }

    /// Runs one turn in the current session, creating a session if none is selected.
    ///
    /// The user message is committed before the request goes out. On success the
    /// assistant message is committed as soon as the answer is known, and the
    /// answer is then revealed through `sink` before the session returns to `Idle`.
    pub async fn submit(&self, prompt: &str, sink: &mut dyn RevealSink) -> Result<TurnOutcome, TurnError> {
        let text = match normalize_input(prompt) {
            Ok(t) => t,
            Err(e) => {
                record("rejected");
                return Err(e.into());
            }
        };
        let session_id = self.repo.ensure_current().await.map_err(|e| self.fail(e.into()))?;
        let Some(flight) = Flight::begin(&self.flights, session_id) else {
            record("rejected");
            tracing::debug!(%session_id, "submit ignored, turn already in flight");
            return Err(TurnError::Busy(session_id));
        };
        self.discard_pending(session_id).await.map_err(|e| self.fail(e.into()))?;

        let user = self
            .repo
            .update(session_id, |s| s.messages.append_user(text))
            .await
            .map_err(|e| self.fail(e.into()))??;
        tracing::info!(%session_id, message_id = %user.id, "turn submitted");

        let answer = match self.exchange(text).await {
            Ok(answer) => answer,
            Err(err) => {
                flight.set(TurnState::Failed);
                self.roll_back(session_id, &user).await;
                tracing::warn!(%session_id, error = %err, "turn failed, user message rolled back");
                return Err(self.fail(err));
            }
        };
        flight.set(TurnState::Succeeded);

        let committed = self
            .repo
            .update(session_id, |s| s.messages.append_assistant(&answer.text))
            .await;
        let assistant = match committed {
            Ok(m) => m,
            Err(e) => {
                flight.set(TurnState::Failed);
                self.roll_back(session_id, &user).await;
                tracing::warn!(%session_id, error = %e, "could not commit answer");
                return Err(self.fail(e.into()));
            }
        };

        self.revealer.play(&assistant.content, sink).await;
        record(if answer.degraded { "degraded" } else { "succeeded" });
        tracing::info!(%session_id, degraded = answer.degraded, chars = assistant.content.chars().count(), "turn completed");
        Ok(TurnOutcome { session_id, user, assistant, degraded: answer.degraded })
    }

    async fn exchange(&self, text: &str) -> Result<Answer, TurnError> {
        let request = match &self.mode {
            ChatMode::Free => AnswerRequest::Chat(ChatRequest { message: text.to_string() }),
            ChatMode::Document(library) => AnswerRequest::Document(DocumentChatRequest {
                file_id: library.context().await,
                message: text.to_string(),
                user_id: library.user_id().to_string(),
            }),
        };
        let payload = self.service.ask(&request).await?;
        match payload.output() {
            Some(output) => Ok(Answer { text: output.to_string(), degraded: false }),
            None => match self.empty_answer {
                EmptyAnswerPolicy::Degrade => {
                    tracing::warn!("answer had no usable output, committing fallback reply");
                    Ok(Answer { text: FALLBACK_ANSWER.to_string(), degraded: true })
                }
                EmptyAnswerPolicy::Rollback => Err(TurnError::NoUsableAnswer),
            },
        }
    }

    /// Caller must hold the session's flight.
    async fn discard_pending(&self, session_id: Uuid) -> Result<bool, RepositoryError> {
        let pending = self
            .repo
            .get(session_id)
            .await
            .and_then(|s| s.messages.pending_user().map(|m| m.id));
        let Some(message_id) = pending else {
            return Ok(false);
        };
        let removed = self.repo.update(session_id, |s| s.rollback_turn(message_id)).await?;
        if removed {
            tracing::info!(%session_id, %message_id, "discarded unanswered message from an abandoned turn");
        }
        Ok(removed)
    }

    async fn roll_back(&self, session_id: Uuid, user: &Message) {
        match self
            .repo
            .update(session_id, |s| s.rollback_turn(user.id))
            .await
        {
            Ok(true) => tracing::debug!(%session_id, message_id = %user.id, "user message rolled back"),
            Ok(false) | Err(RepositoryError::NotFound(_)) => {}
            Err(e) => tracing::warn!(%session_id, error = %e, "rollback could not be persisted"),
        }
    }

    fn fail(&self, err: TurnError) -> TurnError {
        record("failed");
        self.notifier.notify(Notice::Failure(SEND_FAILED_NOTICE.to_string()));
        err
    }
}
