//! Paragraph-based text chunking for document ingestion.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
}

/// Packs blank-line separated paragraphs into chunks of at most `max_chars`
/// characters. Over-long paragraphs are split on whitespace; a single word
/// longer than the limit is truncated.
#[derive(Debug, Clone, Copy)]
pub struct ParagraphChunker {
    max_chars: usize,
}

impl ParagraphChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn chunk(&self, content: &str) -> Vec<Chunk> {
        let mut builder = ChunkBuilder::new(self.max_chars);

        for paragraph in paragraphs(content) {
            if char_len(&paragraph) > self.max_chars {
                for piece in self.split_long_paragraph(&paragraph) {
                    builder.append(&piece);
                }
            } else {
                builder.append(&paragraph);
            }
        }

        builder.finish()
    }

    fn split_long_paragraph(&self, paragraph: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for word in paragraph.split_whitespace() {
            let word_len = char_len(word);
            if current.is_empty() {
                current.push_str(word);
                current_len = word_len;
            } else if current_len + 1 + word_len > self.max_chars {
                pieces.push(std::mem::take(&mut current));
                current.push_str(word);
                current_len = word_len;
            } else {
                current.push(' ');
                current.push_str(word);
                current_len += 1 + word_len;
            }
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }
}

impl Default for ParagraphChunker {
    fn default() -> Self {
        Self::new(crate::defaults::CHUNK_MAX_CHARS)
    }
}

struct ChunkBuilder {
    max_chars: usize,
    chunks: Vec<Chunk>,
    current: String,
    current_len: usize,
}

impl ChunkBuilder {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
        }
    }

    fn append(&mut self, piece: &str) {
        let piece_len = char_len(piece);

        if piece_len > self.max_chars {
            self.flush();
            let truncated: String = piece.chars().take(self.max_chars).collect();
            self.push(truncated);
            return;
        }

        if self.current.is_empty() {
            self.current.push_str(piece);
            self.current_len = piece_len;
        } else if self.current_len + 2 + piece_len > self.max_chars {
            self.flush();
            self.current.push_str(piece);
            self.current_len = piece_len;
        } else {
            self.current.push_str("\n\n");
            self.current.push_str(piece);
            self.current_len += 2 + piece_len;
        }
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            let content = std::mem::take(&mut self.current);
            self.current_len = 0;
            self.push(content);
        }
    }

    fn push(&mut self, content: String) {
        self.chunks.push(Chunk {
            index: self.chunks.len(),
            content,
        });
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush();
        self.chunks
    }
}

/// Splits on runs of blank (whitespace-only) lines, stripping each paragraph.
fn paragraphs(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut lines: Vec<&str> = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            push_paragraph(&mut out, &lines);
            lines.clear();
        } else {
            lines.push(line);
        }
    }
    push_paragraph(&mut out, &lines);
    out
}

fn push_paragraph(out: &mut Vec<String>, lines: &[&str]) {
    let paragraph = lines.join("\n");
    let paragraph = paragraph.trim();
    if !paragraph.is_empty() {
        out.push(paragraph.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.content.as_str()).collect()
    }

    #[test]
    fn blank_content_has_no_chunks() {
        let chunker = ParagraphChunker::new(100);
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("  \n\n \t \n").is_empty());
    }

    #[test]
    fn packs_paragraphs_up_to_the_limit() {
        let chunker = ParagraphChunker::new(12);
        let chunks = chunker.chunk("alpha\n\nbeta\n   \ngamma delta");
        assert_eq!(contents(&chunks), vec!["alpha\n\nbeta", "gamma delta"]);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn keeps_single_newlines_inside_a_paragraph() {
        let chunker = ParagraphChunker::new(100);
        let chunks = chunker.chunk("  line one\nline two  \n\n\n\nnext");
        assert_eq!(contents(&chunks), vec!["line one\nline two\n\nnext"]);
    }

    #[test]
    fn splits_long_paragraphs_on_words() {
        let chunker = ParagraphChunker::new(10);
        let chunks = chunker.chunk("one two three four five");
        assert_eq!(contents(&chunks), vec!["one two", "three four", "five"]);
    }

    #[test]
    fn truncates_words_longer_than_the_limit() {
        let chunker = ParagraphChunker::new(4);
        let chunks = chunker.chunk("ab abcdefgh cd");
        assert_eq!(contents(&chunks), vec!["ab", "abcd", "cd"]);
    }

    #[test]
    fn never_exceeds_limit_and_indices_are_contiguous() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.\n\n\
                    Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.\n\n\
                    Ut enim ad minim veniam, quis nostrud exercitation ullamco laboris.\n\n\
                    Supercalifragilisticexpialidocious words appear here too.";
        for max in [1, 5, 16, 40, 80, 500] {
            let chunks = ParagraphChunker::new(max).chunk(text);
            assert!(!chunks.is_empty());
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.index, i);
                assert!(chunk.content.chars().count() <= max, "max={max} chunk={chunk:?}");
                assert!(!chunk.content.is_empty());
            }
        }
    }

    #[test]
    fn counts_characters_not_bytes() {
        let chunker = ParagraphChunker::new(5);
        let chunks = chunker.chunk("ééééé\n\nüü");
        assert_eq!(contents(&chunks), vec!["ééééé", "üü"]);
    }

    #[test]
    fn zero_limit_is_clamped() {
        assert_eq!(ParagraphChunker::new(0).max_chars(), 1);
    }
}
