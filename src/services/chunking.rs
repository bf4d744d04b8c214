//! Character-window text splitting for indexing

/// Characters per chunk
pub const CHUNK_SIZE: usize = 1000;
/// Characters shared by consecutive chunks
pub const CHUNK_OVERLAP: usize = 200;

/// Split `text` into windows of at most `size` characters, each starting
/// `size - overlap` characters after the previous one. Counts characters,
/// not bytes, so CJK text is never cut inside a code point. Whitespace-only
/// windows are dropped.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let step = size.saturating_sub(overlap).max(1);
    let chars: Vec<char> = text.chars().collect();

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
