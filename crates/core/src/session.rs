use crate::chat::ChatService;
use crate::conversation::ConversationEngine;
use crate::error::ServiceError;
use crate::models::{ChatMessage, ConversationHistory, RetrievedChunk};
use crate::traits::Retriever;
use std::fmt;
use std::sync::Arc;

/// Shown to the user instead of calling any service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionWarning {
    NoCollection,
    EmptyQuestion,
}

impl fmt::Display for SessionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCollection => write!(f, "Upload and process at least one PDF before asking a question."),
            Self::EmptyQuestion => write!(f, "Type a question first."),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AskOutcome {
    Answered {
        answer: String,
        sources: Vec<RetrievedChunk>,
        history: Vec<ChatMessage>,
    },
    Warning(SessionWarning),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No collection bound; questions are refused.
    Uninitialized,
    /// Collection bound, engine not created yet.
    Unbound,
    Ready,
}

pub struct SessionState<R, C> {
    engine: Option<ConversationEngine<R, C>>,
    history: ConversationHistory,
    index: Option<Arc<R>>,
}

impl<R, C> Default for SessionState<R, C> {
    fn default() -> Self {
        Self {
            engine: None,
            history: ConversationHistory::new(),
            index: None,
        }
    }
}

/// One user's conversation. Only `ask`, `bind_index` and `clear` mutate it,
/// and `ask` takes `&mut self`, so questions are answered one at a time.
pub struct SessionStore<R, C> {
    state: SessionState<R, C>,
    chat: Arc<C>,
    top_k: usize,
    engine_bindings: u64,
}

impl<R, C> SessionStore<R, C>
where
    R: Retriever,
    C: ChatService,
{
    pub fn new(chat: Arc<C>, top_k: usize) -> Self {
        Self {
            state: SessionState::default(),
            chat,
            top_k,
            engine_bindings: 0,
        }
    }

    /// Attaches a collection handle. Any engine bound to a previous handle is dropped.
    pub fn bind_index(&mut self, index: Arc<R>) {
        self.state.index = Some(index);
        self.state.engine = None;
    }

    /// Binds `index` only when its collection already exists, so a session
    /// pointed at a never-populated collection keeps warning instead of
    /// failing against the backend. Returns whether the handle was bound.
    pub async fn attach(&mut self, index: Arc<R>) -> Result<bool, ServiceError> {
        if !index.is_available().await? {
            tracing::warn!("collection does not exist yet; session left unbound");
            return Ok(false);
        }
        self.bind_index(index);
        Ok(true)
    }

    pub fn phase(&self) -> SessionPhase {
        match (&self.state.index, &self.state.engine) {
            (None, _) => SessionPhase::Uninitialized,
            (Some(_), None) => SessionPhase::Unbound,
            (Some(_), Some(_)) => SessionPhase::Ready,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.state.history
    }

    /// How many times an engine has been created for this session.
    pub fn engine_bindings(&self) -> u64 {
        self.engine_bindings
    }

    /// Answers `question` and appends the pair to history. Without a bound
    /// collection this returns a warning and touches nothing. Service errors
    /// propagate and leave history as it was.
    pub async fn ask(&mut self, question: &str) -> Result<AskOutcome, ServiceError> {
        if question.trim().is_empty() {
            return Ok(AskOutcome::Warning(SessionWarning::EmptyQuestion));
        }
        let Some(index) = self.state.index.clone() else {
            tracing::warn!("question asked before any collection was bound");
            return Ok(AskOutcome::Warning(SessionWarning::NoCollection));
        };

        let chat = Arc::clone(&self.chat);
        let top_k = self.top_k;
        let bindings = &mut self.engine_bindings;
        let engine = self.state.engine.get_or_insert_with(|| {
            *bindings += 1;
            tracing::info!(binding = *bindings, "binding conversation engine");
            ConversationEngine::new(index, chat, top_k)
        });

        let reply = engine.answer(question, &self.state.history).await?;
        self.state.history.push_turn(question, reply.answer.clone());

        Ok(AskOutcome::Answered {
            answer: reply.answer,
            sources: reply.sources,
            history: self.state.history.messages().to_vec(),
        })
    }

    /// Empties history and drops the engine; the collection stays bound, so
    /// the next question re-creates an engine against it.
    pub fn clear(&mut self) {
        self.state.history = ConversationHistory::new();
        self.state.engine = None;
        tracing::info!("session cleared");
    }
}
