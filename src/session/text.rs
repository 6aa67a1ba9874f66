//! Reply text helpers

/// Prefix of every error reply
pub const ERROR_MARKER: &str = "[error] ";

/// If `text` starts with one of `prefixes` (first match in list order wins),
/// return the trimmed remainder.
///
/// Matching works on whole strings, so multi-byte prefixes such as `/问`
/// never split a character. Empty prefixes are ignored.
pub fn match_command_prefix<'a>(text: &'a str, prefixes: &[String]) -> Option<(&'a str, &'a str)> {
    prefixes
        .iter()
        .filter(|p| !p.is_empty())
        .find_map(|p| {
            text.strip_prefix(p.as_str())
                .map(|rest| (&text[..p.len()], rest.trim()))
        })
}

/// Split `text` into chunks of at most `max_chars` characters, in order.
///
/// Counts `char`s, not bytes. A zero limit yields the whole text as a
/// single chunk; empty text yields no chunks.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    if max_chars == 0 {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    chunks.push(&text[start..]);
    chunks
}

/// Cost annotation appended to successful replies
pub fn format_cost(cost: f64) -> String {
    format!("\n\n[cost] ${:.4}", cost)
}

/// Error reply for `reason`
pub fn format_error(reason: &str) -> String {
    format!("{}{}", ERROR_MARKER, reason)
}
