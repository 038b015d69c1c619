//! Retrieval-augmented answer pipeline.
//!
//! One turn runs: rewrite the conversation into a standalone search query →
//! embed it and fetch the top-k chunks → stream the persona-grounded answer.
//! [`AnswerStream::finalize`] is the explicit commit step: it drains the
//! stream to completion and returns the exact fragment concatenation, which
//! the caller appends to the session history.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::{EmbeddingConfig, RetrievalConfig};
use crate::embedding;
use crate::error::ChatError;
use crate::index;
use crate::llm::{CompletionClient, PromptMessage};
use crate::models::{ChatMessage, RetrievedChunk, Role};

/// Fixed assistant persona: a muscle-building nutrition coach with
/// prescribed response shapes for the common query kinds.
pub const PERSONA: &str = "\
You are a knowledgeable and enthusiastic muscle-building assistant focused on \
nutrition and fitness. Your primary task is to recommend high-protein meals \
tailored specifically for muscle growth, strength enhancement, and recovery.

Guidelines for your responses:

- Prioritize recommending meals that are high in protein, balanced in \
carbohydrates and healthy fats, and aligned with the user's dietary \
preferences (e.g., vegetarian, vegan, keto, or general omnivore).

Interaction instructions:

- General queries: respond normally and informatively.
- Ingredient-based queries (\"I have x ingredients, what can I make?\"): \
provide a bulleted list of possible recipes that match the ingredients listed.
- Recipe selection queries (\"How do I make [recipe]?\" or when a user picks \
a recipe): provide a structured response containing:
    1. A brief summary of the dish
    2. Bulleted ingredients list (with quantities)
    3. Numbered step-by-step preparation instructions
    4. Additional tips highlighting nutritional value and benefits
- Meal-time queries (\"What can I make for breakfast/lunch/dinner?\"): \
provide a bulleted list of meal options suitable for that meal time.

General guidelines for all responses:

- Maintain an encouraging, informative, and supportive tone, motivating \
users to stay consistent with their muscle-building goals.
- Prioritize bulleted or numbered lists to maintain clarity.
- Provide additional fitness and nutrition insights when appropriate, \
including meal timing advice (pre-workout, post-workout, rest days), portion \
control tips, and ingredient substitutions or adjustments.";

const QUERY_REWRITE_INSTRUCTION: &str = "\
Given the above conversation, generate a search query to look up in order to \
get information relevant to the conversation, focusing on the most recent \
messages. Reply with the search query only.";

/// Reject empty input and malformed history before any network call.
pub fn validate_turn(history: &[ChatMessage], input: &str) -> Result<(), ChatError> {
    if input.trim().is_empty() {
        return Err(ChatError::UnsupportedMessageFormat(
            "empty input message".to_string(),
        ));
    }
    for msg in history {
        if msg.content.is_empty() {
            return Err(ChatError::UnsupportedMessageFormat(
                "history entry with empty content".to_string(),
            ));
        }
    }
    Ok(())
}

fn history_to_prompt(history: &[ChatMessage]) -> impl Iterator<Item = PromptMessage> + '_ {
    history.iter().map(|m| match m.role {
        Role::User => PromptMessage::user(m.content.clone()),
        Role::Assistant => PromptMessage::assistant(m.content.clone()),
    })
}

/// Rewrite the latest turn into a standalone search query.
///
/// With no prior history the message already stands alone, so it is used
/// directly without a model call.
pub async fn rewrite_query(
    llm: &dyn CompletionClient,
    history: &[ChatMessage],
    input: &str,
) -> Result<String> {
    if history.is_empty() {
        return Ok(input.to_string());
    }

    let mut messages: Vec<PromptMessage> = history_to_prompt(history).collect();
    messages.push(PromptMessage::user(input));
    messages.push(PromptMessage::user(QUERY_REWRITE_INSTRUCTION));

    let rewritten = llm.complete(&messages).await?;
    let rewritten = rewritten.trim();

    if rewritten.is_empty() {
        Ok(input.to_string())
    } else {
        Ok(rewritten.to_string())
    }
}

/// Embed the query and fetch the top-k chunks from the index.
pub async fn retrieve(
    pool: &SqlitePool,
    embedding_config: &EmbeddingConfig,
    retrieval_config: &RetrievalConfig,
    query: &str,
) -> Result<Vec<RetrievedChunk>> {
    let query_vec = embedding::embed_query(embedding_config, query).await?;
    let chunks = index::similarity_search(pool, &query_vec, retrieval_config.top_k).await?;
    debug!(query = %query, matched = chunks.len(), "retrieved context chunks");
    Ok(chunks)
}

/// Assemble persona + retrieved context + history + newest message.
fn build_answer_prompt(
    history: &[ChatMessage],
    input: &str,
    chunks: &[RetrievedChunk],
) -> Vec<PromptMessage> {
    let context = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let system = format!("{}\n\nContext:\n{}", PERSONA, context);

    let mut messages = vec![PromptMessage::system(system)];
    messages.extend(history_to_prompt(history));
    messages.push(PromptMessage::user(input));
    messages
}

/// A lazily-pulled, finite, non-restartable stream of answer fragments.
///
/// Pull fragments with [`next_fragment`](Self::next_fragment) to render them
/// incrementally, then call [`finalize`](Self::finalize). Finalize drains
/// whatever has not been pulled yet, so the returned answer is always the
/// complete concatenation regardless of how far the caller iterated.
pub struct AnswerStream {
    rx: mpsc::Receiver<String>,
    task: tokio::task::JoinHandle<Result<()>>,
    collected: String,
}

impl AnswerStream {
    /// Next fragment, or `None` once the stream is exhausted.
    pub async fn next_fragment(&mut self) -> Option<String> {
        let fragment = self.rx.recv().await?;
        self.collected.push_str(&fragment);
        Some(fragment)
    }

    /// Drain to completion and return the full answer text.
    pub async fn finalize(mut self) -> Result<String> {
        while let Some(fragment) = self.rx.recv().await {
            self.collected.push_str(&fragment);
        }
        self.task
            .await
            .map_err(|e| anyhow::anyhow!("streaming task panicked: {}", e))??;
        Ok(self.collected)
    }
}

/// Start streaming an answer for the newest message.
pub fn stream_answer(
    llm: Arc<dyn CompletionClient>,
    history: Vec<ChatMessage>,
    input: String,
    chunks: Vec<RetrievedChunk>,
) -> AnswerStream {
    let prompt = build_answer_prompt(&history, &input, &chunks);
    let (tx, rx) = mpsc::channel(32);

    let task = tokio::spawn(async move { llm.complete_streaming(&prompt, tx).await });

    AnswerStream {
        rx,
        task,
        collected: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Scripted completion client: fixed rewrite reply, fixed fragments.
    struct FakeLlm {
        complete_reply: String,
        fragments: Vec<String>,
    }

    #[async_trait]
    impl CompletionClient for FakeLlm {
        async fn complete(&self, _messages: &[PromptMessage]) -> Result<String> {
            Ok(self.complete_reply.clone())
        }

        async fn complete_streaming(
            &self,
            _messages: &[PromptMessage],
            tx: mpsc::Sender<String>,
        ) -> Result<()> {
            for f in &self.fragments {
                tx.send(f.clone()).await.ok();
            }
            Ok(())
        }
    }

    /// Fails the test if any model call is made.
    struct PanickingLlm;

    #[async_trait]
    impl CompletionClient for PanickingLlm {
        async fn complete(&self, _messages: &[PromptMessage]) -> Result<String> {
            panic!("unexpected completion call");
        }

        async fn complete_streaming(
            &self,
            _messages: &[PromptMessage],
            _tx: mpsc::Sender<String>,
        ) -> Result<()> {
            panic!("unexpected streaming call");
        }
    }

    #[test]
    fn test_validate_rejects_empty_input() {
        let err = validate_turn(&[], "   ").unwrap_err();
        assert!(matches!(err, ChatError::UnsupportedMessageFormat(_)));
    }

    #[test]
    fn test_validate_rejects_empty_history_content() {
        let history = vec![ChatMessage::user("")];
        let err = validate_turn(&history, "hello").unwrap_err();
        assert!(matches!(err, ChatError::UnsupportedMessageFormat(_)));
    }

    #[tokio::test]
    async fn test_rewrite_skips_model_on_empty_history() {
        let query = rewrite_query(&PanickingLlm, &[], "protein content of chicken")
            .await
            .unwrap();
        assert_eq!(query, "protein content of chicken");
    }

    #[tokio::test]
    async fn test_rewrite_uses_model_with_history() {
        let llm = FakeLlm {
            complete_reply: "  high protein breakfast options  ".to_string(),
            fragments: vec![],
        };
        let history = vec![
            ChatMessage::user("I want to bulk up"),
            ChatMessage::assistant("Great, let's talk meals."),
        ];
        let query = rewrite_query(&llm, &history, "what about breakfast?")
            .await
            .unwrap();
        assert_eq!(query, "high protein breakfast options");
    }

    #[tokio::test]
    async fn test_rewrite_falls_back_on_blank_model_reply() {
        let llm = FakeLlm {
            complete_reply: "   ".to_string(),
            fragments: vec![],
        };
        let history = vec![ChatMessage::user("hi")];
        let query = rewrite_query(&llm, &history, "eggs or oats?").await.unwrap();
        assert_eq!(query, "eggs or oats?");
    }

    #[test]
    fn test_answer_prompt_shape() {
        let history = vec![
            ChatMessage::user("I train at 6am"),
            ChatMessage::assistant("Early sessions need a light pre-workout meal."),
        ];
        let chunks = vec![
            RetrievedChunk {
                chunk_id: "c1".to_string(),
                document_id: "d1".to_string(),
                text: "Chicken breast has about 31g of protein per 100g.".to_string(),
                score: 0.9,
                source_id: "foods.txt".to_string(),
            },
            RetrievedChunk {
                chunk_id: "c2".to_string(),
                document_id: "d1".to_string(),
                text: "Greek yogurt is a high-protein breakfast base.".to_string(),
                score: 0.8,
                source_id: "foods.txt".to_string(),
            },
        ];

        let prompt = build_answer_prompt(&history, "what should I eat first?", &chunks);

        assert_eq!(prompt.len(), 4);
        assert_eq!(prompt[0].role, "system");
        assert!(prompt[0].content.starts_with(PERSONA));
        assert!(prompt[0].content.contains("31g of protein"));
        assert!(prompt[0].content.contains("Greek yogurt"));
        assert_eq!(prompt[1].role, "user");
        assert_eq!(prompt[2].role, "assistant");
        assert_eq!(prompt[3].role, "user");
        assert_eq!(prompt[3].content, "what should I eat first?");
    }

    #[tokio::test]
    async fn test_stream_fragments_in_order_and_finalize() {
        let llm = Arc::new(FakeLlm {
            complete_reply: String::new(),
            fragments: vec!["Oats ".to_string(), "with ".to_string(), "whey.".to_string()],
        });

        let mut stream = stream_answer(llm, vec![], "breakfast?".to_string(), vec![]);

        let mut seen = Vec::new();
        while let Some(f) = stream.next_fragment().await {
            seen.push(f);
        }
        assert_eq!(seen, vec!["Oats ", "with ", "whey."]);

        let answer = stream.finalize().await.unwrap();
        assert_eq!(answer, "Oats with whey.");
    }

    #[tokio::test]
    async fn test_finalize_drains_unconsumed_fragments() {
        let llm = Arc::new(FakeLlm {
            complete_reply: String::new(),
            fragments: vec!["Lean ".to_string(), "beef ".to_string(), "bowl.".to_string()],
        });

        let mut stream = stream_answer(llm, vec![], "dinner?".to_string(), vec![]);

        // Pull only the first fragment, then commit.
        let first = stream.next_fragment().await.unwrap();
        assert_eq!(first, "Lean ");

        let answer = stream.finalize().await.unwrap();
        assert_eq!(answer, "Lean beef bowl.");
    }

    #[tokio::test]
    async fn test_finalize_surfaces_stream_errors() {
        struct FailingLlm;

        #[async_trait]
        impl CompletionClient for FailingLlm {
            async fn complete(&self, _messages: &[PromptMessage]) -> Result<String> {
                unreachable!()
            }

            async fn complete_streaming(
                &self,
                _messages: &[PromptMessage],
                tx: mpsc::Sender<String>,
            ) -> Result<()> {
                tx.send("partial".to_string()).await.ok();
                anyhow::bail!("connection reset")
            }
        }

        let stream = stream_answer(Arc::new(FailingLlm), vec![], "q".to_string(), vec![]);
        let err = stream.finalize().await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
