//! Splitting a code body into upload chunks.

/// Split `code` into pieces of at most `chunk_size` bytes.
///
/// Boundaries are moved back to the nearest character boundary so no chunk
/// carries half of a multi-byte character. An empty body yields one empty
/// chunk, since the device still needs a write to create the code buffer.
pub fn chunk_code(code: &str, chunk_size: usize) -> Vec<&str> {
    let chunk_size = chunk_size.max(1);
    if code.is_empty() {
        return vec![""];
    }

    let mut chunks = Vec::with_capacity(code.len().div_ceil(chunk_size));
    let mut rest = code;
    while !rest.is_empty() {
        let mut end = chunk_size.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // A single character wider than the chunk size.
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_sizes() {
        let code = "a".repeat(10_000);
        let lens: Vec<usize> = chunk_code(&code, 4096).iter().map(|c| c.len()).collect();
        assert_eq!(lens, vec![4096, 4096, 1808]);
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_chunk() {
        let code = "a".repeat(8192);
        assert_eq!(chunk_code(&code, 4096).len(), 2);
    }

    #[test]
    fn empty_body_is_one_empty_chunk() {
        assert_eq!(chunk_code("", 4096), vec![""]);
    }

    #[test]
    fn multibyte_characters_are_not_split() {
        // "é" is two bytes; a 3-byte chunk size would otherwise split the second one.
        let code = "éé";
        let chunks = chunk_code(code, 3);
        assert_eq!(chunks, vec!["é", "é"]);
        assert_eq!(chunks.concat(), code);
    }

    #[test]
    fn wide_character_larger_than_chunk() {
        let code = "a€b";
        let chunks = chunk_code(code, 2);
        assert_eq!(chunks, vec!["a", "€", "b"]);
    }
}
