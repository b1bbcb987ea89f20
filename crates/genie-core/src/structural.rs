//! Structural JSON repair.
//!
//! A single left-to-right pass that fixes the mistakes a chat model makes when
//! it hand-writes JSON: unbalanced or mismatched brackets, trailing and
//! missing commas, single-quoted or unterminated strings, bare keys, unescaped
//! inner quotes and Python-style literals. Valid JSON passes through with the
//! same meaning.

/// Repairs the structure of a JSON object or array.
///
/// Text before the first `{`/`[` and after the root value closes is dropped.
pub fn repair_structure(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if closers.is_empty() && !out.is_empty() {
            break;
        }
        if closers.is_empty() && c != '{' && c != '[' {
            i += 1;
            continue;
        }

        match c {
            '"' | '\'' => {
                insert_missing_comma(&mut out);
                i = copy_string(&chars, i, &mut out);
                continue;
            }
            '{' | '[' => {
                insert_missing_comma(&mut out);
                out.push(c);
                closers.push(if c == '{' { '}' } else { ']' });
            }
            '}' | ']' => {
                if let Some(pos) = closers.iter().rposition(|&closer| closer == c) {
                    while closers.len() > pos {
                        if let Some(closer) = closers.pop() {
                            close_container(&mut out, closer);
                        }
                    }
                }
            }
            ',' => {
                if !matches!(last_significant(&out), None | Some(',' | '{' | '[' | ':')) {
                    out.push(',');
                }
            }
            ':' => out.push(':'),
            c if c.is_whitespace() => out.push(c),
            c if c == '-' || c.is_ascii_digit() => {
                insert_missing_comma(&mut out);
                let end = scan_while(&chars, i, |ch| {
                    ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E' | '+' | '-')
                });
                out.extend(&chars[i..end]);
                i = end;
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                i = copy_bare_word(&chars, i, &mut out);
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    drop_trailing_comma(&mut out);
    while let Some(closer) = closers.pop() {
        close_container(&mut out, closer);
    }
    out
}

/// Copies a string starting at the quote at `start`, re-quoting it with `"`.
///
/// Returns the index just past the closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            match chars.get(i + 1) {
                Some('\'') => out.push('\''),
                Some(&next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => {}
            }
            i += 2;
            continue;
        }
        if c == quote {
            if closes_string(chars, i + 1, quote) {
                out.push('"');
                return i + 1;
            }
            out.push_str(if quote == '"' { "\\\"" } else { "'" });
        } else if c == '"' {
            out.push_str("\\\"");
        } else {
            out.push(c);
        }
        i += 1;
    }

    out.push('"');
    chars.len()
}

/// A quote closes its string when what follows can continue the structure.
fn closes_string(chars: &[char], from: usize, quote: char) -> bool {
    chars[from.min(chars.len())..]
        .iter()
        .find(|c| !c.is_whitespace())
        .is_none_or(|&c| c == quote || matches!(c, ':' | ',' | '}' | ']' | '"'))
}

fn copy_bare_word(chars: &[char], start: usize, out: &mut String) -> usize {
    let end = scan_while(chars, start, |ch| {
        ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.')
    });
    let word: String = chars[start..end].iter().collect();

    let literal = match word.as_str() {
        "true" | "True" | "TRUE" => Some("true"),
        "false" | "False" | "FALSE" => Some("false"),
        "null" | "None" | "none" | "NULL" | "undefined" => Some("null"),
        _ => None,
    };
    let in_value_position = last_significant(out) == Some(':');

    insert_missing_comma(out);
    if let Some(literal) = literal {
        out.push_str(literal);
        return end;
    }

    if in_value_position {
        // Unquoted prose runs until the next delimiter.
        let stop = scan_while(chars, start, |ch| !matches!(ch, ',' | '}' | ']' | '\n'));
        let value: String = chars[start..stop].iter().collect();
        push_quoted(out, value.trim_end());
        return stop;
    }

    push_quoted(out, &word);
    end
}

fn push_quoted(out: &mut String, text: &str) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

fn scan_while(chars: &[char], start: usize, keep: impl Fn(char) -> bool) -> usize {
    chars[start..]
        .iter()
        .position(|&c| !keep(c))
        .map_or(chars.len(), |offset| start + offset)
}

fn close_container(out: &mut String, closer: char) {
    drop_trailing_comma(out);
    if last_significant(out) == Some(':') {
        out.push_str("null");
    }
    out.push(closer);
}

/// Inserts a comma when a new value starts right after a finished one.
fn insert_missing_comma(out: &mut String) {
    if let Some(prev) = last_significant(out)
        && (matches!(prev, '"' | '}' | ']') || prev.is_ascii_alphanumeric())
    {
        out.push(',');
    }
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end().len();
    if out[..trimmed].ends_with(',') {
        out.truncate(trimmed - 1);
    }
}

fn last_significant(out: &str) -> Option<char> {
    out.trim_end().chars().last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn parse(text: &str) -> Value {
        serde_json::from_str(&repair_structure(text)).unwrap()
    }

    #[test]
    fn test_valid_json_is_unchanged() {
        let text = r#"{"response": "a, {b}: \"c\"", "n": [1, 2.5e3, -3], "ok": true}"#;
        assert_eq!(repair_structure(text), text);
    }

    #[test]
    fn test_trailing_commas() {
        assert_eq!(
            repair_structure(r#"{"a": 1, "b": [1, 2,],}"#),
            r#"{"a": 1, "b": [1, 2]}"#
        );
    }

    #[test]
    fn test_unterminated_string_and_object() {
        assert_eq!(parse(r#"{"response": "cut off"#), json!({"response": "cut off"}));
    }

    #[test]
    fn test_dangling_key() {
        assert_eq!(
            parse(r#"{"response": "x", "tool_use":"#),
            json!({"response": "x", "tool_use": null})
        );
    }

    #[test]
    fn test_single_quotes_and_python_literals() {
        assert_eq!(
            parse("{'response': 'hi', 'tool_use': None, 'approval_required': False}"),
            json!({"response": "hi", "tool_use": null, "approval_required": false})
        );
    }

    #[test]
    fn test_apostrophe_inside_single_quoted_string() {
        assert_eq!(parse("{'response': 'it's fine'}"), json!({"response": "it's fine"}));
    }

    #[test]
    fn test_missing_comma_between_members() {
        assert_eq!(
            parse(r#"{"response": "a" "tool_use": null}"#),
            json!({"response": "a", "tool_use": null})
        );
    }

    #[test]
    fn test_unescaped_inner_quotes() {
        assert_eq!(
            parse(r#"{"response": "He said "hi" ok"}"#),
            json!({"response": "He said \"hi\" ok"})
        );
    }

    #[test]
    fn test_bare_keys_and_values() {
        assert_eq!(
            parse("{response: Hello there, approval_required: true}"),
            json!({"response": "Hello there", "approval_required": true})
        );
    }

    #[test]
    fn test_mismatched_closer() {
        assert_eq!(parse(r#"{"a": [1, 2}"#), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_noise_around_root_is_dropped() {
        assert_eq!(parse(r#"json: {"a": 1} trailing text"#), json!({"a": 1}));
    }

    #[test]
    fn test_repair_is_idempotent() {
        let once = repair_structure("{'a': [1, 2,, 'b' 'c'], response: x");
        assert_eq!(repair_structure(&once), once);
    }
}
