//! Deterministic chunking of debate transcripts.
//!
//! A debate is walked depth-first (its own items first, then each child
//! debate) and every attributed contribution is cleaned and split into
//! sentence-aligned chunks. Chunk ids are `{debate_ext_id}-{index:05}`
//! with a single index sequence over the whole debate, so reindexing the
//! same document always produces the same keys.

use unicode_segmentation::UnicodeSegmentation;

use crate::api::models::{Debate, DebateItem};
use crate::types::RagError;

/// One embeddable slice of a debate contribution.
#[derive(Clone, Debug, PartialEq)]
pub struct DebateChunk {
    /// Stable key: `{debate_ext_id}-{chunk_index:05}`.
    pub id: String,
    pub debate_ext_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub member_id: i64,
    pub attributed_to: Option<String>,
    pub item_id: Option<i64>,
}

/// Splits debates into bounded chunks.
#[derive(Clone, Debug)]
pub struct DebateChunker {
    max_chunk_chars: usize,
    min_chunk_chars: usize,
}

impl DebateChunker {
    pub fn new(min_chunk_chars: usize, max_chunk_chars: usize) -> Result<Self, RagError> {
        if min_chunk_chars >= max_chunk_chars {
            return Err(RagError::Chunking(format!(
                "min chunk size {min_chunk_chars} must be below max {max_chunk_chars}"
            )));
        }
        Ok(Self {
            max_chunk_chars,
            min_chunk_chars,
        })
    }

    /// Produces the full chunk sequence for a debate. Items without an
    /// attributed member or without text are skipped; procedural markers
    /// contribute nothing to the index.
    pub fn chunk_debate(&self, debate: &Debate, ext_id: &str) -> Vec<DebateChunk> {
        let mut chunks = Vec::new();
        let mut index = 0usize;
        self.walk(debate, ext_id, &mut chunks, &mut index);
        chunks
    }

    fn walk(
        &self,
        debate: &Debate,
        ext_id: &str,
        chunks: &mut Vec<DebateChunk>,
        index: &mut usize,
    ) {
        for item in &debate.items {
            self.chunk_item(item, ext_id, chunks, index);
        }
        for child in &debate.child_debates {
            self.walk(child, ext_id, chunks, index);
        }
    }

    fn chunk_item(
        &self,
        item: &DebateItem,
        ext_id: &str,
        chunks: &mut Vec<DebateChunk>,
        index: &mut usize,
    ) {
        let Some(member_id) = item.member_id else {
            return;
        };
        let Some(raw) = item.value.as_deref() else {
            return;
        };
        let text = normalize(raw);
        if text.is_empty() {
            return;
        }

        for piece in self.split_text(&text) {
            chunks.push(DebateChunk {
                id: chunk_id(ext_id, *index),
                debate_ext_id: ext_id.to_string(),
                chunk_index: *index,
                content: piece,
                member_id,
                attributed_to: item.attributed_to.clone(),
                item_id: item.item_id,
            });
            *index += 1;
        }
    }

    /// Splits normalized text on sentence boundaries, packing sentences
    /// into pieces of at most `max_chunk_chars`. Undersized trailing
    /// pieces are merged into their predecessor where the merged piece
    /// still fits the max bound.
    fn split_text(&self, text: &str) -> Vec<String> {
        if text.chars().count() <= self.max_chunk_chars {
            return vec![text.to_string()];
        }

        let mut pieces: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0usize;

        for sentence in text.split_sentence_bounds() {
            let sentence_chars = sentence.chars().count();
            if current_chars + sentence_chars > self.max_chunk_chars && !current.is_empty() {
                pieces.push(std::mem::take(&mut current).trim().to_string());
                current_chars = 0;
            }
            if sentence_chars > self.max_chunk_chars {
                // A single run-on sentence: hard-split on the char bound.
                for fragment in hard_split(sentence, self.max_chunk_chars) {
                    pieces.push(fragment);
                }
                continue;
            }
            current.push_str(sentence);
            current_chars += sentence_chars;
        }
        if !current.trim().is_empty() {
            pieces.push(current.trim().to_string());
        }

        merge_small(pieces, self.min_chunk_chars, self.max_chunk_chars)
    }
}

/// Stable chunk key for a debate position.
pub fn chunk_id(ext_id: &str, index: usize) -> String {
    format!("{ext_id}-{index:05}")
}

/// Strips HTML tags and collapses whitespace runs to single spaces.
fn normalize(raw: &str) -> String {
    let mut stripped = String::with_capacity(raw.len());
    let mut in_tag = false;
    for ch in raw.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                stripped.push(' ');
            }
            _ if !in_tag => stripped.push(ch),
            _ => {}
        }
    }
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    chars
        .chunks(max_chars)
        .map(|window| window.iter().collect::<String>().trim().to_string())
        .filter(|fragment| !fragment.is_empty())
        .collect()
}

/// Folds pieces shorter than `min_chars` into the preceding piece, but
/// never past `max_chars`. An undersized piece that cannot be absorbed
/// stands alone; the max bound is the hard invariant.
fn merge_small(pieces: Vec<String>, min_chars: usize, max_chars: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if piece.chars().count() < min_chars {
            if let Some(last) = merged.last_mut() {
                if last.chars().count() + 1 + piece.chars().count() <= max_chars {
                    last.push(' ');
                    last.push_str(&piece);
                    continue;
                }
            }
        }
        merged.push(piece);
    }
    merged
}
