use crate::chat::ChatService;
use crate::error::ServiceError;
use crate::models::{ChatMessage, ConversationHistory, RetrievedChunk};
use crate::traits::Retriever;
use std::sync::Arc;

const CONTEXT_PREAMBLE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

#[derive(Debug, Clone)]
pub struct EngineReply {
    pub answer: String,
    pub sources: Vec<RetrievedChunk>,
}

/// Answers one question against a bound collection: retrieve, build the
/// prompt from history and context, make exactly one chat call.
pub struct ConversationEngine<R, C> {
    retriever: Arc<R>,
    chat: Arc<C>,
    top_k: usize,
}

impl<R, C> ConversationEngine<R, C>
where
    R: Retriever,
    C: ChatService,
{
    pub fn new(retriever: Arc<R>, chat: Arc<C>, top_k: usize) -> Self {
        Self {
            retriever,
            chat,
            top_k,
        }
    }

    pub async fn answer(
        &self,
        question: &str,
        history: &ConversationHistory,
    ) -> Result<EngineReply, ServiceError> {
        let sources = self.retriever.retrieve(question, self.top_k).await?;
        let messages = build_messages(question, history, &sources);
        let completion = self.chat.complete(&messages).await?;

        Ok(EngineReply {
            answer: completion.answer,
            sources,
        })
    }
}

/// System prompt carrying the retrieved context, then prior turns in order,
/// then the new question.
pub fn build_messages(
    question: &str,
    history: &ConversationHistory,
    context: &[RetrievedChunk],
) -> Vec<ChatMessage> {
    let context_block = context
        .iter()
        .map(|chunk| chunk.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(format!("{CONTEXT_PREAMBLE}\n\n{context_block}")));
    messages.extend(history.messages().iter().cloned());
    messages.push(ChatMessage::user(question));
    messages
}
