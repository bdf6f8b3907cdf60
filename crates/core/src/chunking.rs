use crate::config::ChunkingConfig;
use crate::extractor::ExtractedText;
use crate::models::Chunk;

/// Byte range of one chunk inside the normalized document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

pub fn chunk_document(document_id: &str, extracted: &ExtractedText, config: ChunkingConfig) -> Vec<Chunk> {
    chunk_windows(&extracted.text, config)
        .into_iter()
        .enumerate()
        .map(|(index, window)| Chunk {
            document_id: document_id.to_string(),
            order_index: index as u32,
            page_number: extracted.page_at(window.start),
            text: extracted.text[window.start..window.end].to_string(),
            start_offset: window.start,
            end_offset: window.end,
            embedding: None,
        })
        .collect()
}

/// Splits `text` into windows of about `target_chars` characters.
///
/// A window ends at the last paragraph break, then sentence end, then whitespace before the
/// limit, so no word is ever cut. Consecutive windows share up to `overlap_chars` characters,
/// always starting the next window on a word boundary.
pub fn chunk_windows(text: &str, config: ChunkingConfig) -> Vec<Window> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let scan = Scan {
        text,
        chars: &chars,
    };
    let target = config.target_chars.max(1);
    let overlap = config.overlap_chars.min(target / 2);
    let content_end = scan.trim_back(chars.len(), 0);

    let mut windows = Vec::new();
    let mut start = (0..chars.len()).find(|&ci| !scan.is_ws(ci));

    while let Some(first) = start {
        let limit = first + target;
        let end = if limit >= content_end {
            content_end
        } else {
            scan.trim_back(scan.break_before(first, limit, target / 2), first)
        };
        windows.push(Window {
            start: scan.byte_at(first),
            end: scan.byte_at(end),
        });
        if end >= content_end {
            break;
        }

        let overlap_from = end.saturating_sub(overlap).max(first + 1);
        start = (overlap_from..end)
            .find(|&ci| scan.is_word_start(ci))
            .or_else(|| (end..chars.len()).find(|&ci| !scan.is_ws(ci)));
    }

    windows
}

struct Scan<'a> {
    text: &'a str,
    chars: &'a [(usize, char)],
}

impl Scan<'_> {
    fn byte_at(&self, ci: usize) -> usize {
        self.chars.get(ci).map_or(self.text.len(), |(byte, _)| *byte)
    }

    fn char_at(&self, ci: usize) -> Option<char> {
        self.chars.get(ci).map(|(_, ch)| *ch)
    }

    fn is_ws(&self, ci: usize) -> bool {
        self.char_at(ci).map_or(true, char::is_whitespace)
    }

    fn is_word_start(&self, ci: usize) -> bool {
        !self.is_ws(ci) && (ci == 0 || self.is_ws(ci - 1))
    }

    fn trim_back(&self, mut end: usize, floor: usize) -> usize {
        while end > floor && self.is_ws(end - 1) {
            end -= 1;
        }
        end
    }

    /// Exclusive end of the best break in `(first, limit]`.
    fn break_before(&self, first: usize, limit: usize, min_span: usize) -> usize {
        let preferred = first + min_span.max(1);

        let paragraph = (preferred..=limit)
            .rev()
            .find(|&ci| self.char_at(ci) == Some('\n') && self.char_at(ci + 1) == Some('\n'));
        if let Some(ci) = paragraph {
            return ci;
        }

        let sentence = (preferred..=limit).rev().find(|&ci| {
            self.is_ws(ci) && matches!(self.char_at(ci - 1), Some('.' | '?' | '!'))
        });
        if let Some(ci) = sentence {
            return ci;
        }

        let space = (first + 1..=limit).rev().find(|&ci| self.is_ws(ci));
        if let Some(ci) = space {
            return ci;
        }

        // A single token longer than the window stays whole.
        (limit..self.chars.len())
            .find(|&ci| self.is_ws(ci))
            .unwrap_or(self.chars.len())
    }
}

/// Rebuilds the document text from ordered chunks by dropping each overlap.
///
/// Whitespace between non-overlapping chunks is reduced to a single space.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|chunk| chunk.order_index);

    let mut out = String::new();
    let mut covered = 0usize;

    for chunk in ordered {
        if chunk.end_offset <= covered {
            continue;
        }
        if chunk.start_offset >= covered {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&chunk.text);
        } else {
            out.push_str(&chunk.text[covered - chunk.start_offset..]);
        }
        covered = chunk.end_offset;
    }

    out
}
