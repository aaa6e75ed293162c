/// Clamp a string to at most `max_bytes`, cutting at the last character
/// boundary that still fits.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let cut = s
        .char_indices()
        .map(|(offset, _)| offset)
        .take_while(|&offset| offset <= max_bytes)
        .last()
        .unwrap_or(0);
    &s[..cut]
}

/// Remove a surrounding markdown code fence, if any, from a model reply.
pub fn strip_code_blocks(response: &str) -> &str {
    let mut body = response.trim();
    if let Some(inner) = body.strip_prefix("```") {
        // Drop an optional language tag such as ```json.
        body = inner.strip_prefix("json").unwrap_or(inner).trim_start();
    }
    if let Some(inner) = body.strip_suffix("```") {
        body = inner.trim_end();
    }
    body.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_multibyte_chars() {
        // 'é' is two bytes; a cut through it lands on the previous boundary.
        assert_eq!(truncate_to_char_boundary("déjà vu", 3), "dé");
        assert_eq!(truncate_to_char_boundary("déjà vu", 2), "d");
        assert_eq!(truncate_to_char_boundary("déjà vu", 0), "");
    }

    #[test]
    fn test_truncate_is_noop_when_short_enough() {
        assert_eq!(truncate_to_char_boundary("short", 64), "short");
        assert_eq!(truncate_to_char_boundary("exact", 5), "exact");
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_blocks("```\nplain fence\n```"), "plain fence");
        assert_eq!(strip_code_blocks("  no fences here  "), "no fences here");
    }
}
