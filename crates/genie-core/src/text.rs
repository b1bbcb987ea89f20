//! Text utilities shared by the reply pipeline.
//!
//! Terminal output arrives decorated with ANSI sequences and has to be cut at
//! echo anchors and previewed in logs; the helpers here keep those operations
//! UTF-8 safe.

/// Removes ANSI escape sequences from terminal text.
pub fn strip_ansi(text: &str) -> String {
    let stripped = strip_ansi_escapes::strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).into_owned()
}

/// Returns the text after the last occurrence of `needle`, if any.
pub fn after_last<'a>(haystack: &'a str, needle: &str) -> Option<&'a str> {
    if needle.is_empty() {
        return Some(haystack);
    }
    haystack
        .rfind(needle)
        .map(|idx| &haystack[idx + needle.len()..])
}

/// Truncates a string to a maximum number of characters, adding "..." if truncated.
///
/// Never splits a multi-byte character. Used to keep log lines short when a
/// whole terminal buffer would otherwise be printed.
///
/// # Examples
///
/// ```
/// use genie_core::truncate_with_ellipsis;
///
/// assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
/// assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
/// assert_eq!(truncate_with_ellipsis("ééé", 2), "éé...");
/// ```
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
        None => s.to_string(),
    }
}
