use crate::config::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::error::IngestError;
use crate::models::Chunk;
use std::collections::VecDeque;

pub const SEPARATOR: char = '\n';

/// Chunk geometry, counted in chars rather than bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_SIZE,
            overlap_chars: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Splits on newlines, then greedily packs lines into windows of at most
    /// `max_chars`. When a window is emitted, its trailing lines (up to
    /// `overlap_chars`) seed the next one. A single line longer than the
    /// window is cut into fixed windows stepping by `max - overlap`.
    pub fn split(&self, text: &str) -> Vec<String> {
        let ChunkingConfig {
            max_chars,
            overlap_chars,
        } = self.config;
        let separator_len = SEPARATOR.len_utf8();

        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for line in text.split(SEPARATOR).filter(|line| !line.is_empty()) {
            let len = char_len(line);

            if len > max_chars {
                push_joined(&mut chunks, &window);
                window.clear();
                total = 0;
                chunks.extend(hard_split(line, max_chars, overlap_chars));
                continue;
            }

            let joiner = if window.is_empty() { 0 } else { separator_len };
            if total + len + joiner > max_chars && !window.is_empty() {
                push_joined(&mut chunks, &window);

                while total > overlap_chars || (total > 0 && total + len + separator_len > max_chars) {
                    let Some(first) = window.pop_front() else {
                        break;
                    };
                    let joined = if window.is_empty() { 0 } else { separator_len };
                    total -= char_len(first) + joined;
                }
            }

            window.push_back(line);
            total += len + if window.len() > 1 { separator_len } else { 0 };
        }

        push_joined(&mut chunks, &window);
        chunks
    }

    pub fn chunk(&self, source: &str, text: &str) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = self
            .split(text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                text,
                source: source.to_string(),
                index,
            })
            .collect();

        tracing::debug!(source, chunk_count = chunks.len(), "chunked text");
        chunks
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    if window.is_empty() {
        return;
    }
    let joined = window.iter().copied().collect::<Vec<_>>().join("\n");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn hard_split(line: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let step = max_chars.saturating_sub(overlap_chars).max(1);

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_chars: usize, overlap_chars: usize) -> TextChunker {
        TextChunker::new(ChunkingConfig {
            max_chars,
            overlap_chars,
        })
        .expect("valid config")
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = TextChunker::new(ChunkingConfig::default()).expect("valid config");
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("\n\n\n").is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = TextChunker::new(ChunkingConfig::default()).expect("valid config");
        let chunks = chunker.split("Roland TR-8S manual\nRhythm Performer\n");
        assert_eq!(chunks, vec!["Roland TR-8S manual\nRhythm Performer".to_string()]);
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let result = TextChunker::new(ChunkingConfig {
            max_chars: 10,
            overlap_chars: 10,
        });
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
        assert!(TextChunker::new(ChunkingConfig {
            max_chars: 0,
            overlap_chars: 0,
        })
        .is_err());
    }

    #[test]
    fn chunks_respect_max_size_and_are_non_empty() {
        let text = (0..200)
            .map(|index| format!("line {index} {}", "x".repeat(index % 37)))
            .collect::<Vec<_>>()
            .join("\n");
        let chunker = chunker(100, 30);

        let chunks = chunker.split(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(!chunk.trim().is_empty());
            assert!(chunk.chars().count() <= 100, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn every_line_is_covered_by_some_chunk() {
        let lines = (0..120).map(|index| format!("entry-{index:03}")).collect::<Vec<_>>();
        let text = lines.join("\n");
        let chunks = chunker(64, 20).split(&text);

        for line in &lines {
            assert!(
                chunks.iter().any(|chunk| chunk.lines().any(|candidate| candidate == line)),
                "{line} missing from chunks"
            );
        }
    }

    #[test]
    fn consecutive_line_windows_share_trailing_lines() {
        let text = (0..40).map(|index| format!("row {index:02}")).collect::<Vec<_>>().join("\n");
        let chunks = chunker(50, 20).split(&text);

        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let last_line = pair[0].lines().last().expect("non-empty chunk");
            let first_line = pair[1].lines().next().expect("non-empty chunk");
            assert!(pair[1].contains(last_line), "`{}` should carry `{last_line}`", pair[1]);
            assert!(pair[0].lines().any(|line| line == first_line));
        }
    }

    #[test]
    fn oversized_line_is_windowed_with_exact_overlap() {
        let text: String = (0..2_500).map(|index| char::from(b'a' + (index % 26) as u8)).collect();
        let chunks = chunker(1_000, 200).split(&text);

        assert_eq!(chunks.len(), 3);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().skip(pair[0].chars().count() - 200).collect();
            assert!(pair[1].starts_with(&tail));
        }
        let last = chunks.last().expect("chunks");
        assert!(text.ends_with(last.as_str()));
    }

    #[test]
    fn windowed_pieces_are_trimmed_like_packed_chunks() {
        let text = format!("{}{}", " b  efg ".repeat(6), "wxyzabc ".repeat(6));
        let chunks = chunker(16, 4).split(&text);

        assert!(chunks.len() > 2);
        for chunk in &chunks {
            assert_eq!(chunk.as_str(), chunk.trim(), "untrimmed chunk `{chunk}`");
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn multibyte_text_is_measured_in_chars() {
        let text = "é".repeat(150);
        let chunks = chunker(100, 10).split(&text);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 100));
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn chunk_carries_source_and_index() {
        let chunks = chunker(20, 5).chunk("tr8s.pdf", "alpha beta\ngamma delta\nepsilon zeta");
        assert!(chunks.len() >= 2);
        for (expected, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.source, "tr8s.pdf");
            assert_eq!(chunk.index, expected);
        }
    }
}
