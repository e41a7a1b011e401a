//! Answer assembly: retrieved multimodal context folded into one prompt for the text model.

use crate::fragment::{ContentRecord, FragmentKind};
use crate::llm::{ChatClient, ChatRequest, ContentBlock};
use crate::processing::retriever::Retriever;
use crate::processing::types::AnswerError;
use crate::session::Session;
use std::path::PathBuf;
use std::sync::Arc;

/// Reply given when a query arrives before any document was ingested.
pub const NO_DOCUMENT_MESSAGE: &str = "Please insert a proper file";

const INSTRUCTION: &str = "You are given a query and you need to answer the query using the context documents (text, tables and images) below.";

/// Retrieved payloads grouped by kind, each group in retrieval order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PartitionedContext {
    /// Text payloads.
    pub text: Vec<String>,
    /// Table payloads.
    pub tables: Vec<String>,
    /// Image payloads (file references).
    pub images: Vec<String>,
}

impl PartitionedContext {
    /// Split records by kind.
    pub fn from_records(records: impl IntoIterator<Item = ContentRecord>) -> Self {
        let mut context = Self::default();
        for record in records {
            match record.kind {
                FragmentKind::Text => context.text.push(record.payload),
                FragmentKind::Table => context.tables.push(record.payload),
                FragmentKind::Image => context.images.push(record.payload),
            }
        }
        context
    }
}

/// Build the three-block prompt: instruction, query and text context; tables; images.
pub fn build_prompt(query: &str, context: &PartitionedContext) -> ChatRequest {
    let text_block = format!(
        "\n{INSTRUCTION}\nQuery: {query}\n\nContext documents:\n{}\n",
        context.text.join("\n\n")
    );
    let table_block = format!("\n{}\n", context.tables.join("\n\n"));
    let image_block = format!("\n{}\n", context.images.join("\n\n"));

    ChatRequest {
        blocks: vec![
            ContentBlock::Text(text_block),
            ContentBlock::Text(table_block),
            ContentBlock::Text(image_block),
        ],
    }
}

/// Query with optional image attachments that are summarized before retrieval.
#[derive(Debug, Clone, Default)]
pub struct Question {
    /// User query.
    pub query: String,
    /// Images whose summaries are prepended to the query.
    pub attachments: Vec<PathBuf>,
}

impl Question {
    /// Plain text question.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            attachments: Vec::new(),
        }
    }
}

/// Retrieves context for a query and asks the text model to answer from it.
pub struct AnswerOrchestrator {
    retriever: Arc<Retriever>,
    chat: Arc<dyn ChatClient>,
    top_k: usize,
}

impl AnswerOrchestrator {
    /// Orchestrator retrieving `top_k` records per query.
    pub fn new(retriever: Arc<Retriever>, chat: Arc<dyn ChatClient>, top_k: usize) -> Self {
        Self {
            retriever,
            chat,
            top_k,
        }
    }

    /// Answer `query` from the session's active collection.
    pub async fn answer(&self, session: &Session, query: &str) -> Result<String, AnswerError> {
        self.answer_question(session, &Question::new(query)).await
    }

    /// Answer a question, folding summaries of any attached images into the query text.
    pub async fn answer_question(
        &self,
        session: &Session,
        question: &Question,
    ) -> Result<String, AnswerError> {
        if !session.is_active() {
            return Ok(NO_DOCUMENT_MESSAGE.to_string());
        }

        let query = self.compose_query(question).await?;
        let records = self.retriever.retrieve(session, &query, self.top_k).await?;
        let context =
            PartitionedContext::from_records(records.into_iter().map(|hit| hit.record));
        tracing::info!(
            text = context.text.len(),
            tables = context.tables.len(),
            images = context.images.len(),
            "Assembled query context"
        );

        Ok(self.chat.invoke(build_prompt(&query, &context)).await?)
    }

    async fn compose_query(&self, question: &Question) -> Result<String, AnswerError> {
        let query = question.query.trim();
        if question.attachments.is_empty() {
            return Ok(query.to_string());
        }

        let mut summaries = String::new();
        for path in &question.attachments {
            summaries.push_str(&self.retriever.summarizer().summarize_image(path).await?);
        }
        Ok(format!(
            "Here is a summarized version of the provided image:{summaries}\nHere is the user query : {query}\n"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: FragmentKind, payload: &str) -> ContentRecord {
        ContentRecord {
            id: payload.into(),
            kind,
            payload: payload.into(),
        }
    }

    #[test]
    fn partition_keeps_order_within_each_kind() {
        let context = PartitionedContext::from_records(vec![
            record(FragmentKind::Image, "figures/b.png"),
            record(FragmentKind::Text, "first"),
            record(FragmentKind::Table, "| t |"),
            record(FragmentKind::Text, "second"),
        ]);
        assert_eq!(context.text, vec!["first", "second"]);
        assert_eq!(context.tables, vec!["| t |"]);
        assert_eq!(context.images, vec!["figures/b.png"]);
    }

    #[test]
    fn prompt_has_three_text_blocks() {
        let context = PartitionedContext {
            text: vec!["alpha".into(), "beta".into()],
            tables: vec!["| a |".into(), "| b |".into()],
            images: vec![],
        };
        let request = build_prompt("what is alpha?", &context);

        assert_eq!(request.blocks.len(), 3);
        let ContentBlock::Text(first) = &request.blocks[0] else {
            panic!("expected text block");
        };
        assert!(first.contains("Query: what is alpha?"));
        assert!(first.contains("Context documents:\nalpha\n\nbeta"));
        assert_eq!(request.blocks[1], ContentBlock::Text("\n| a |\n\n| b |\n".into()));
        assert_eq!(request.blocks[2], ContentBlock::Text("\n\n".into()));
    }
}
