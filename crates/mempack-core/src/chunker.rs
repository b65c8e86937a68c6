//! Deterministic sliding-window text chunker.
//!
//! The splitter is a pure function: the same input and parameters always
//! produce a byte-identical sequence of chunk strings. Sizes are measured in
//! characters, not bytes.
//!
//! Soft-break rule: a segment ends at a sentence terminator (`.`, `?`, `!`)
//! immediately followed by whitespace, or at any newline run. Segments are
//! greedily accumulated (joined by a single space) until the next one would
//! push the chunk past `chunk_size`; the following chunk is seeded with the
//! last `chunk_overlap` characters of the emitted chunk, aligned to the
//! nearest preceding whitespace. A single segment longer than `chunk_size`
//! is split hard at `chunk_size` characters.

/// Split `text` into overlapping chunks.
///
/// Empty or whitespace-only input yields zero chunks. `chunk_overlap` must be
/// smaller than `chunk_size`; callers validate via `MemPackConfig::validate`.
#[must_use]
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let segments = split_segments(text);
    if segments.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;
    // Whether `current` holds anything beyond an overlap seed.
    let mut has_content = false;

    for segment in segments {
        let segment_chars = segment.chars().count();

        // Oversized sentence: flush, then split hard at chunk_size.
        if segment_chars > chunk_size {
            if has_content {
                chunks.push(std::mem::take(&mut current));
            }
            for piece in hard_split(segment, chunk_size) {
                chunks.push(piece);
            }
            current = overlap_seed(chunks.last().expect("hard split emits"), chunk_overlap);
            current_chars = current.chars().count();
            has_content = false;
            continue;
        }

        let separator = usize::from(!current.is_empty());
        if has_content && current_chars + separator + segment_chars > chunk_size {
            chunks.push(current.clone());
            current = overlap_seed(&current, chunk_overlap);
            current_chars = current.chars().count();
            has_content = false;
        }

        if !current.is_empty() {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(segment);
        current_chars += segment_chars;
        has_content = true;
    }

    if has_content {
        chunks.push(current);
    }
    chunks
}

/// Collapse whitespace: runs of spaces/tabs become one space, blank lines are
/// dropped, every line is trimmed.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(collapse_spaces)
        .filter(|line| !line.is_empty())
        .collect();
    lines.join("\n")
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_gap = true; // leading whitespace is dropped
    for ch in line.chars() {
        if ch == ' ' || ch == '\t' {
            if !in_gap {
                out.push(' ');
                in_gap = true;
            }
        } else {
            out.push(ch);
            in_gap = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Split into sentence-level segments, trimmed, empties dropped.
fn split_segments(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let is_newline = b == b'\n';
        let is_terminator = matches!(b, b'.' | b'?' | b'!')
            && bytes
                .get(i + 1)
                .is_some_and(|&next| next.is_ascii_whitespace());
        if is_newline || is_terminator {
            let end = if is_terminator { i + 1 } else { i };
            push_segment(&mut segments, &text[start..end]);
            start = end;
            i = end;
            // Consume the whitespace run between segments.
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            start = i;
        } else {
            i += 1;
        }
    }
    push_segment(&mut segments, &text[start..]);
    segments
}

fn push_segment<'a>(segments: &mut Vec<&'a str>, raw: &'a str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed);
    }
}

/// Last `overlap` characters of `chunk`, start aligned backward to the
/// nearest whitespace. Falls back to an exact cut when the chunk has no
/// usable whitespace, and to the whole chunk when it is shorter than the
/// overlap.
fn overlap_seed(chunk: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = chunk.chars().collect();
    if chars.len() <= overlap {
        return chunk.to_string();
    }
    let cut = chars.len() - overlap;
    let start = chars[..cut]
        .iter()
        .rposition(|c| c.is_whitespace())
        .map_or(cut, |ws| ws + 1);
    chars[start..].iter().collect()
}

fn hard_split(segment: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = segment.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|piece| piece.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_zero_chunks() {
        assert!(chunk_text("", 100, 20).is_empty());
        assert!(chunk_text("   \n\n  ", 100, 20).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("Just one short sentence.", 100, 20);
        assert_eq!(chunks, vec!["Just one short sentence.".to_string()]);
    }

    #[test]
    fn chunking_is_reproducible() {
        let text = "First sentence here. Second sentence follows! Third one asks? \
                    Fourth statement ends. Fifth keeps going with more words.";
        let a = chunk_text(text, 60, 15);
        let b = chunk_text(text, 60, 15);
        assert_eq!(a, b);
        assert!(a.len() > 1);
    }

    #[test]
    fn oversized_sentence_splits_hard() {
        let long = "x".repeat(250);
        let chunks = chunk_text(&long, 100, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 100);
        assert_eq!(chunks[1].chars().count(), 100);
        assert_eq!(chunks[2].chars().count(), 50);
    }

    #[test]
    fn newline_runs_break_segments() {
        let text = "alpha beta\n\n\ngamma delta";
        let chunks = chunk_text(text, 100, 0);
        assert_eq!(chunks, vec!["alpha beta gamma delta".to_string()]);
    }

    #[test]
    fn consecutive_chunks_share_overlap() {
        // Seed scenario: three short docs, chunk_size=80, chunk_overlap=20.
        let docs = [
            "Alpha begins the story with a measured introduction. The narrative \
             continues through several developments. Each sentence adds detail to \
             the account. The closing line wraps up document a.",
            "Bravo opens with context about the second document. More sentences \
             describe the middle part in detail. A final remark concludes b.",
            "Charlie describes the third document briefly. Additional material \
             extends the text past one chunk. The last words finish document c.",
        ];
        for doc in docs {
            let chunks = chunk_text(doc, 80, 20);
            assert!(chunks.len() >= 2, "doc should span multiple chunks");
            for pair in chunks.windows(2) {
                let prev_chars: Vec<char> = pair[0].chars().collect();
                // The next chunk must start with a >=20-char suffix of the
                // previous chunk, aligned to whitespace.
                let found = (0..prev_chars.len()).any(|start| {
                    let suffix: String = prev_chars[start..].iter().collect();
                    suffix.chars().count() >= 20 && pair[1].starts_with(&suffix)
                });
                assert!(
                    found,
                    "chunks {:?} / {:?} lack a 20-char overlap",
                    pair[0], pair[1]
                );
            }
        }
    }

    #[test]
    fn overlap_seed_aligns_to_whitespace() {
        let seed = overlap_seed("the quick brown fox jumps over the lazy dog", 10);
        assert!(seed.chars().count() >= 10);
        assert!(!seed.starts_with(' '));
        // Starts at a word boundary.
        assert!("the quick brown fox jumps over the lazy dog".ends_with(&seed));
        assert_eq!(seed, "the lazy dog");
    }

    #[test]
    fn overlap_seed_exact_cut_without_whitespace() {
        let seed = overlap_seed("abcdefghijklmnop", 5);
        assert_eq!(seed, "lmnop");
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  Hello,   World!  \n\n  "), "Hello, World!");
        let n = normalize_text("Multiple    spaces   and\n\n\nnewlines");
        assert!(!n.contains("  "));
        assert!(!n.contains("\n\n"));
        assert_eq!(n, "Multiple spaces and\nnewlines");
    }
}
