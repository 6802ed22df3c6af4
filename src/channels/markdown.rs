//! Telegram legacy `Markdown` formatting.
//!
//! Outside an entity `_ * ` [` must be backslash-escaped. Inside a code span
//! nothing can be escaped, so a backtick can never appear there.

use std::fmt::Display;

/// Escape free text so it renders literally.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inline code span, or escaped plain text when the value holds a backtick.
pub fn code(value: impl Display) -> String {
    let value = value.to_string();
    if value.contains('`') {
        escape(&value)
    } else {
        format!("`{value}`")
    }
}

/// True when every entity opened in `text` is closed and no link syntax leaks.
#[cfg(test)]
pub(crate) fn is_well_formed(text: &str) -> bool {
    let mut open: Option<char> = None;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match open {
            Some('`') => {
                if c == '`' {
                    open = None;
                }
            }
            Some(delim) => {
                if c == '\\' {
                    chars.next();
                } else if c == delim {
                    open = None;
                } else if c == '[' {
                    return false;
                }
            }
            None => match c {
                '\\' => {
                    chars.next();
                }
                '_' | '*' | '`' => open = Some(c),
                '[' => return false,
                _ => {}
            },
        }
    }
    open.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_entity_delimiters() {
        assert_eq!(escape("a_b*c`d[e]"), "a\\_b\\*c\\`d\\[e]");
        assert_eq!(escape("plain text"), "plain text");
    }

    #[test]
    fn code_spans_fall_back_for_backticks() {
        assert_eq!(code("user_1"), "`user_1`");
        assert_eq!(code(22), "`22`");
        assert_eq!(code("pa`ss_1"), "pa\\`ss\\_1");
        assert!(is_well_formed(&code("pa`ss_1")));
    }

    #[test]
    fn detects_unbalanced_entities() {
        assert!(is_well_formed("*bold* `co_de` a\\_b"));
        assert!(!is_well_formed("Username 'a_b' taken"));
        assert!(!is_well_formed("`pa`ss`"));
        assert!(!is_well_formed("see [docs"));
    }
}
