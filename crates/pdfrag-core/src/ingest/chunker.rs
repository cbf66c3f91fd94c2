use crate::config::ChunkingConfig;
use crate::error::{CoreError, CoreResult};
use crate::util::tokens::estimate_tokens;
use text_splitter::{ChunkConfig, ChunkSizer, TextSplitter};
use tracing::debug;

/// Sizer driving the splitter by estimated token count rather than bytes.
#[derive(Debug, Clone, Copy)]
struct WordTokenSizer;

impl ChunkSizer for WordTokenSizer {
    fn size(&self, chunk: &str) -> usize {
        estimate_tokens(chunk)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChunk {
    pub chunk_index: i32,
    pub text: String,
    pub token_count: usize,
}

/// Deterministic splitter of parsed markdown into overlapping, size-bounded
/// chunks. Pure: same input and parameters always yield byte-identical
/// output, no I/O, no shared state.
///
/// Splitting prefers sentence boundaries and falls back to word boundaries
/// for oversized sentences (the splitter's semantic level descent).
pub struct ChunkPlanner {
    size_tokens: usize,
    overlap_tokens: usize,
}

impl ChunkPlanner {
    pub fn new(config: &ChunkingConfig) -> CoreResult<Self> {
        if config.overlap_tokens >= config.size_tokens {
            return Err(CoreError::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                config.overlap_tokens, config.size_tokens
            )));
        }

        Ok(Self {
            size_tokens: config.size_tokens,
            overlap_tokens: config.overlap_tokens,
        })
    }

    pub fn plan(&self, text: &str) -> Vec<PlannedChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // with_overlap only fails when overlap >= capacity, checked in new()
        let config = ChunkConfig::new(self.size_tokens)
            .with_sizer(WordTokenSizer)
            .with_overlap(self.overlap_tokens)
            .expect("overlap < size validated in constructor");

        let splitter = TextSplitter::new(config);

        let chunks: Vec<PlannedChunk> = splitter
            .chunks(text)
            .enumerate()
            .map(|(i, content)| PlannedChunk {
                chunk_index: i as i32,
                text: content.to_string(),
                token_count: estimate_tokens(content),
            })
            .collect();

        debug!("Planned {} chunks from {} chars", chunks.len(), text.len());

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner(size: usize, overlap: usize) -> ChunkPlanner {
        ChunkPlanner::new(&ChunkingConfig {
            size_tokens: size,
            overlap_tokens: overlap,
        })
        .expect("valid chunking config")
    }

    fn distinct_words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{:04}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let planner = planner(1024, 200);
        assert!(planner.plan("").is_empty());
        assert!(planner.plan("   \n\t  ").is_empty());
    }

    #[test]
    fn short_input_yields_one_chunk() {
        let planner = planner(1024, 200);
        let chunks = planner.plan("alpha beta gamma");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "alpha beta gamma");
        assert_eq!(chunks[0].token_count, 4);
    }

    #[test]
    fn indexes_are_dense_and_zero_based() {
        let planner = planner(128, 32);
        let chunks = planner.plan(&distinct_words(600));
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i32);
            assert!(!chunk.text.trim().is_empty());
        }
    }

    #[test]
    fn chunks_respect_the_token_budget() {
        let planner = planner(128, 32);
        let chunks = planner.plan(&distinct_words(600));
        for chunk in &chunks {
            assert!(
                chunk.token_count <= 128,
                "chunk {} has {} tokens",
                chunk.chunk_index,
                chunk.token_count
            );
        }
    }

    #[test]
    fn long_documents_split_into_multiple_overlapping_chunks() {
        // ~2500 tokens of repeated text, the upload happy-path shape.
        let text = "alpha beta gamma ".repeat(625);
        let planner = planner(1024, 200);
        let chunks = planner.plan(&text);
        assert!(chunks.len() >= 2, "expected >= 2 chunks, got {}", chunks.len());
    }

    #[test]
    fn adjacent_chunks_overlap() {
        let planner = planner(128, 32);
        let chunks = planner.plan(&distinct_words(600));
        assert!(chunks.len() >= 2);

        // The second chunk starts inside the tail of the first one.
        let first_word_of_second = chunks[1].text.split_whitespace().next().unwrap();
        assert!(
            chunks[0].text.contains(first_word_of_second),
            "chunk 1 should start within chunk 0's tail"
        );
    }

    #[test]
    fn planning_is_deterministic() {
        let text = distinct_words(900);
        let planner = planner(256, 64);
        let a = planner.plan(&text);
        let b = planner.plan(&text);
        assert_eq!(a, b);
    }

    #[test]
    fn oversized_overlap_is_rejected() {
        let result = ChunkPlanner::new(&ChunkingConfig {
            size_tokens: 100,
            overlap_tokens: 100,
        });
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
