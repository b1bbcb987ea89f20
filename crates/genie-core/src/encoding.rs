//! Best-effort encoding repair for terminal text.
//!
//! Two passes: [`fix_mojibake`] undoes UTF-8 that was decoded as
//! Windows-1252/Latin-1 somewhere between the chat and the terminal, and
//! [`transliterate_ascii`] folds what is left into plain ASCII.

/// Re-decodes UTF-8 byte sequences that were mis-read as Windows-1252.
///
/// Works sequence by sequence: every run of characters whose Windows-1252
/// bytes form one valid multi-byte UTF-8 character is replaced by that
/// character. Everything else passes through, so correctly decoded text
/// (including accented Latin letters) is left alone.
pub fn fix_mojibake(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if let Some((decoded, consumed)) = decode_sequence(&chars[i..]) {
            out.push(decoded);
            i += consumed;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }

    out
}

fn decode_sequence(chars: &[char]) -> Option<(char, usize)> {
    let lead = cp1252_byte(*chars.first()?)?;
    let len = match lead {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    if chars.len() < len {
        return None;
    }

    let mut bytes = [0u8; 4];
    bytes[0] = lead;
    for (slot, c) in bytes[1..len].iter_mut().zip(&chars[1..len]) {
        let byte = cp1252_byte(*c)?;
        if !(0x80..=0xBF).contains(&byte) {
            return None;
        }
        *slot = byte;
    }

    let decoded = std::str::from_utf8(&bytes[..len]).ok()?.chars().next()?;
    Some((decoded, len))
}

/// Maps a character to its single Windows-1252 byte.
///
/// The five code points Windows-1252 leaves undefined fall back to their
/// Latin-1 meaning, which is how lenient decoders produce them.
fn cp1252_byte(c: char) -> Option<u8> {
    let byte = match c {
        '\u{0}'..='\u{7f}' | '\u{a0}'..='\u{ff}' => c as u8,
        '\u{81}' | '\u{8d}' | '\u{8f}' | '\u{90}' | '\u{9d}' => c as u8,
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

/// Folds text into ASCII.
///
/// Typographic punctuation, accented letters and non-Latin scripts are
/// romanized; characters with no ASCII spelling are dropped.
pub fn transliterate_ascii(text: &str) -> String {
    deunicode::deunicode_with_tofu(text, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixes_smart_quote_mojibake() {
        // "it’s" encoded as UTF-8 and decoded as Windows-1252
        assert_eq!(fix_mojibake("itâ€™s"), "it’s");
    }

    #[test]
    fn test_fixes_latin1_mojibake() {
        assert_eq!(fix_mojibake("cafÃ©"), "café");
    }

    #[test]
    fn test_fixes_emoji_mojibake() {
        assert_eq!(fix_mojibake("done âœ…"), "done ✅");
    }

    #[test]
    fn test_leaves_correct_text_alone() {
        for text in ["café", "naïve résumé", "plain ascii", "日本語", "✅ ok"] {
            assert_eq!(fix_mojibake(text), text);
        }
    }

    #[test]
    fn test_mojibake_fix_is_idempotent() {
        let once = fix_mojibake("itâ€™s cafÃ©");
        assert_eq!(fix_mojibake(&once), once);
    }

    #[test]
    fn test_transliterates_punctuation_and_letters() {
        assert_eq!(
            transliterate_ascii("“Smart” – quotes… café"),
            "\"Smart\" - quotes... cafe"
        );
    }

    #[test]
    fn test_transliteration_romanizes_other_scripts() {
        assert_eq!(transliterate_ascii("Привет мир"), "Privet mir");

        let cjk = transliterate_ascii("日本語");
        assert!(cjk.is_ascii());
        assert!(cjk.chars().any(|c| c.is_ascii_alphabetic()), "{cjk:?}");
    }

    #[test]
    fn test_transliteration_keeps_ascii_and_newlines() {
        assert_eq!(transliterate_ascii("plain {\"a\": 1}\nnext"), "plain {\"a\": 1}\nnext");
    }
}
