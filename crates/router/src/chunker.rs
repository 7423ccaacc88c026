//! Character-window chunking with overlap.

/// Split `text` into windows of at most `chunk_size` bytes that overlap by
/// roughly `overlap` bytes.
///
/// Window ends are pulled back to the last whitespace when one exists in
/// the second half of the window, so words are rarely cut. Windows are
/// trimmed; empty ones are skipped.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let step = if chunk_size > overlap {
        chunk_size - overlap
    } else {
        chunk_size
    };

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end < text.len() {
            if let Some(space) = text[start..end].rfind(char::is_whitespace) {
                if space > chunk_size / 2 {
                    end = start + space;
                }
            }
        }
        if end == start {
            break;
        }

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        if end == text.len() {
            break;
        }

        let mut next = (start + step).min(end);
        if next <= start {
            next = end;
        }
        while next < text.len() && !text.is_char_boundary(next) {
            next += 1;
        }
        start = next;
    }

    tracing::debug!(
        chunks = chunks.len(),
        chunk_size,
        overlap,
        "chunked text"
    );
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        assert_eq!(chunk_text("  hello world  ", 100, 10), vec!["hello world"]);
    }

    #[test]
    fn test_empty() {
        assert!(chunk_text("", 100, 10).is_empty());
        assert!(chunk_text("   \n", 100, 10).is_empty());
    }

    #[test]
    fn test_no_overlap_covers_text() {
        let text = "a".repeat(300);
        let chunks = chunk_text(&text, 100, 0);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == 100));
    }

    #[test]
    fn test_overlap_repeats_tail() {
        let text = "abcdefghijklmnopqrstuvwxyz".repeat(4);
        let chunks = chunk_text(&text, 50, 10);
        assert!(chunks.len() >= 2);
        let tail = &chunks[0][40..];
        assert!(chunks[1].starts_with(tail));
    }

    #[test]
    fn test_breaks_on_whitespace() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = chunk_text(text, 20, 0);
        assert!(chunks.iter().all(|c| !c.starts_with(' ') && !c.ends_with(' ')));
        assert_eq!(chunks[0], "alpha beta gamma");
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "年假政策规定员工每年享有十五天带薪休假".repeat(5);
        let chunks = chunk_text(&text, 40, 8);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.len() <= 40));
    }
}
