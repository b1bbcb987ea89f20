//! Whitespace squeeze applied to a reply before extraction.
//!
//! Terminal rendering pads replies with runs of spaces. Collapsing them keeps
//! the JSON block compact, but code samples inside `$$$` fences must survive
//! byte for byte.

use std::sync::LazyLock;

use regex::Regex;

/// Fence the chat uses around code inside GenIE_json string values.
pub const CODE_FENCE: &str = "$$$";

static FENCED_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\$\$\$.*?\$\$\$").expect("static regex"));

static HORIZONTAL_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\r\n]+").expect("static regex"));

/// Collapses horizontal whitespace runs to one space outside fenced segments.
///
/// Newlines are kept. The result is trimmed at both ends. An unterminated
/// fence is treated as ordinary text.
pub fn squeeze_preserving_code(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for fenced in FENCED_SEGMENT.find_iter(text) {
        out.push_str(&squeeze_spaces(&text[cursor..fenced.start()]));
        out.push_str(fenced.as_str());
        cursor = fenced.end();
    }
    out.push_str(&squeeze_spaces(&text[cursor..]));

    out.trim().to_string()
}

fn squeeze_spaces(text: &str) -> std::borrow::Cow<'_, str> {
    HORIZONTAL_WHITESPACE.replace_all(text, " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_spaces_and_tabs() {
        assert_eq!(squeeze_preserving_code("a    b\t\t c"), "a b c");
    }

    #[test]
    fn test_keeps_newlines() {
        assert_eq!(squeeze_preserving_code("a  \n   b\r\nc"), "a \n b\r\nc");
    }

    #[test]
    fn test_fenced_code_untouched() {
        let text = "intro    text $$$\nfn main() {\n    println!(\"hi\");\n}\n$$$   outro   end";
        assert_eq!(
            squeeze_preserving_code(text),
            "intro text $$$\nfn main() {\n    println!(\"hi\");\n}\n$$$ outro end"
        );
    }

    #[test]
    fn test_multiple_fences() {
        let text = "$$$a    b$$$  mid  $$$c    d$$$";
        assert_eq!(squeeze_preserving_code(text), "$$$a    b$$$ mid $$$c    d$$$");
    }

    #[test]
    fn test_unterminated_fence_is_squeezed() {
        assert_eq!(squeeze_preserving_code("$$$ open    only"), "$$$ open only");
    }

    #[test]
    fn test_trims_ends() {
        assert_eq!(squeeze_preserving_code("   \n x  \n  "), "x");
    }
}
