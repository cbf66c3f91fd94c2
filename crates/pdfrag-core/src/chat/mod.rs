use crate::error::CoreResult;
use crate::retrieval::{ChunkRetriever, RetrievedChunk};
use crate::synthesis::{Synthesizer, Usage};
use crate::util::tokens::estimate_tokens;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";
const PREVIEW_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You are an assistant answering questions about the user's documents. \
Answer only from the provided context. \
If the context does not contain the information needed, say so plainly instead of guessing.";

const NO_CONTEXT_ANSWER: &str =
    "I could not find any relevant information in your documents to answer this question.";

#[derive(Debug, Clone, Serialize)]
pub struct ChatSource {
    pub document_id: i32,
    pub filename: String,
    pub chunk_index: i32,
    pub similarity: f32,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<ChatSource>,
    pub chunks_found: usize,
    pub model: String,
    pub usage: Usage,
}

/// Composes retrieved chunks into a bounded context and asks the synthesizer
/// for a grounded answer. No conversational memory: every question stands
/// alone.
pub struct ChatOrchestrator {
    retriever: Arc<dyn ChunkRetriever>,
    synthesizer: Arc<dyn Synthesizer>,
    model: String,
    context_budget_tokens: usize,
}

impl ChatOrchestrator {
    pub fn new(
        retriever: Arc<dyn ChunkRetriever>,
        synthesizer: Arc<dyn Synthesizer>,
        model: String,
        context_budget_tokens: usize,
    ) -> Self {
        Self {
            retriever,
            synthesizer,
            model,
            context_budget_tokens,
        }
    }

    pub async fn answer(
        &self,
        user_id: i32,
        question: &str,
        top_k: usize,
        document_id: Option<i32>,
        model_override: Option<&str>,
    ) -> CoreResult<ChatAnswer> {
        info!("Chat question from user {} (top_k={})", user_id, top_k);

        let chunks = self
            .retriever
            .retrieve(user_id, question, top_k, document_id)
            .await?;

        if chunks.is_empty() {
            debug!("No chunks retrieved; returning canned response");
            return Ok(ChatAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                chunks_found: 0,
                model: model_override.unwrap_or(&self.model).to_string(),
                usage: Usage::default(),
            });
        }

        let sources: Vec<ChatSource> = chunks.iter().map(source_of).collect();
        let chunks_found = chunks.len();
        let context = build_context(&chunks, self.context_budget_tokens);

        let output = self
            .synthesizer
            .synthesize(
                SYSTEM_PROMPT,
                &context,
                question,
                model_override.map(str::to_string),
            )
            .await?;

        Ok(ChatAnswer {
            answer: output.answer,
            sources,
            chunks_found,
            model: output.model,
            usage: output.usage,
        })
    }
}

fn source_of(chunk: &RetrievedChunk) -> ChatSource {
    ChatSource {
        document_id: chunk.document_id,
        filename: chunk.filename.clone(),
        chunk_index: chunk.chunk_index,
        similarity: chunk.similarity,
        preview: chunk.text_content.chars().take(PREVIEW_CHARS).collect(),
    }
}

/// Join chunk texts in rank order, each annotated with its source filename.
/// Chunks are never truncated individually; once the budget is hit the rest
/// of the list is dropped from the tail.
fn build_context(chunks: &[RetrievedChunk], budget_tokens: usize) -> String {
    let mut context = String::new();
    let mut used_tokens = 0usize;
    let mut included = 0usize;

    for chunk in chunks {
        let block = format!("[source: {}]\n{}", chunk.filename, chunk.text_content);
        let block_tokens = estimate_tokens(&block);

        if included > 0 && used_tokens + block_tokens > budget_tokens {
            debug!(
                "Context truncated after {} of {} chunks ({} tokens)",
                included,
                chunks.len(),
                used_tokens
            );
            break;
        }

        if included > 0 {
            context.push_str(CONTEXT_SEPARATOR);
        }
        context.push_str(&block);
        used_tokens += block_tokens;
        included += 1;
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::MockChunkRetriever;
    use crate::synthesis::{MockSynthesizer, SynthesisOutput};

    fn chunk(document_id: i32, chunk_index: i32, text: &str, similarity: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: (document_id as i64) * 100 + chunk_index as i64,
            document_id,
            filename: format!("doc-{}.pdf", document_id),
            chunk_index,
            text_content: text.to_string(),
            similarity,
        }
    }

    fn orchestrator(
        retriever: MockChunkRetriever,
        synthesizer: MockSynthesizer,
        budget: usize,
    ) -> ChatOrchestrator {
        ChatOrchestrator::new(
            Arc::new(retriever),
            Arc::new(synthesizer),
            "test-chat-model".to_string(),
            budget,
        )
    }

    #[tokio::test]
    async fn no_hits_short_circuits_without_calling_the_synthesizer() {
        let mut retriever = MockChunkRetriever::new();
        retriever
            .expect_retrieve()
            .times(1)
            .returning(|_, _, _, _| Ok(Vec::new()));

        let mut synthesizer = MockSynthesizer::new();
        synthesizer.expect_synthesize().times(0);

        let answer = orchestrator(retriever, synthesizer, 12_000)
            .answer(1, "What is the capital of France?", 5, None, None)
            .await
            .unwrap();

        assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
        assert!(answer.sources.is_empty());
        assert_eq!(answer.chunks_found, 0);
        assert_eq!(answer.model, "test-chat-model");
        assert_eq!(answer.usage, Usage::default());
    }

    #[tokio::test]
    async fn context_carries_filenames_and_separator() {
        let mut retriever = MockChunkRetriever::new();
        retriever.expect_retrieve().returning(|_, _, _, _| {
            Ok(vec![
                chunk(1, 0, "cats are mammals", 0.9),
                chunk(2, 3, "dogs are loyal", 0.8),
            ])
        });

        let mut synthesizer = MockSynthesizer::new();
        synthesizer
            .expect_synthesize()
            .withf(|_system, context, question, _model| {
                context.contains("[source: doc-1.pdf]")
                    && context.contains("[source: doc-2.pdf]")
                    && context.contains(CONTEXT_SEPARATOR)
                    && question == "tell me about pets"
            })
            .times(1)
            .returning(|_, _, _, _| {
                Ok(SynthesisOutput {
                    answer: "Cats and dogs.".to_string(),
                    model: "remote-model".to_string(),
                    usage: Usage {
                        prompt_tokens: 50,
                        completion_tokens: 10,
                        total_tokens: 60,
                    },
                })
            });

        let answer = orchestrator(retriever, synthesizer, 12_000)
            .answer(1, "tell me about pets", 5, None, None)
            .await
            .unwrap();

        assert_eq!(answer.answer, "Cats and dogs.");
        assert_eq!(answer.chunks_found, 2);
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(answer.model, "remote-model");
        assert_eq!(answer.usage.total_tokens, 60);
    }

    #[tokio::test]
    async fn oversized_context_is_truncated_from_the_tail() {
        let long_text = "word ".repeat(300); // ~400 tokens per chunk
        let chunks = vec![
            chunk(1, 0, &long_text, 0.9),
            chunk(1, 1, &long_text, 0.8),
            chunk(1, 2, &long_text, 0.7),
        ];

        let mut retriever = MockChunkRetriever::new();
        let chunks_clone = chunks.clone();
        retriever
            .expect_retrieve()
            .returning(move |_, _, _, _| Ok(chunks_clone.clone()));

        let mut synthesizer = MockSynthesizer::new();
        synthesizer
            .expect_synthesize()
            .withf(|_, context, _, _| {
                // Budget of 500 tokens fits exactly one ~400-token block.
                context.matches("[source:").count() == 1
            })
            .times(1)
            .returning(|_, _, _, _| {
                Ok(SynthesisOutput {
                    answer: "ok".to_string(),
                    model: "remote-model".to_string(),
                    usage: Usage::default(),
                })
            });

        let answer = orchestrator(retriever, synthesizer, 500)
            .answer(1, "question", 5, None, None)
            .await
            .unwrap();

        // Sources still report everything retrieved, truncation only affects context.
        assert_eq!(answer.sources.len(), 3);
        assert_eq!(answer.chunks_found, 3);
    }

    #[tokio::test]
    async fn the_first_chunk_is_never_truncated() {
        let huge = "word ".repeat(5_000);
        let mut retriever = MockChunkRetriever::new();
        let huge_clone = huge.clone();
        retriever
            .expect_retrieve()
            .returning(move |_, _, _, _| Ok(vec![chunk(1, 0, &huge_clone, 0.9)]));

        let mut synthesizer = MockSynthesizer::new();
        synthesizer
            .expect_synthesize()
            .withf(|_, context, _, _| context.contains("[source: doc-1.pdf]"))
            .times(1)
            .returning(|_, _, _, _| {
                Ok(SynthesisOutput {
                    answer: "ok".to_string(),
                    model: "remote-model".to_string(),
                    usage: Usage::default(),
                })
            });

        orchestrator(retriever, synthesizer, 100)
            .answer(1, "question", 5, None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retriever_errors_propagate() {
        let mut retriever = MockChunkRetriever::new();
        retriever
            .expect_retrieve()
            .returning(|_, _, _, _| Err(crate::error::CoreError::NotFound("document 9".into())));

        let synthesizer = MockSynthesizer::new();

        let result = orchestrator(retriever, synthesizer, 12_000)
            .answer(2, "question", 5, Some(9), None)
            .await;

        assert!(matches!(result, Err(crate::error::CoreError::NotFound(_))));
    }

    #[test]
    fn previews_are_capped_at_200_chars() {
        let text = "x".repeat(500);
        let source = source_of(&chunk(1, 0, &text, 0.5));
        assert_eq!(source.preview.chars().count(), 200);
    }
}
