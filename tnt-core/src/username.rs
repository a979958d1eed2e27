//! Username validation and normalization, run once before roster insertion.

use crate::utf8::truncate_to_width;
use crate::DISPLAY_NAME_MAX_WIDTH;

const FORBIDDEN_CHARS: &[char] = &[
    '|', ';', '&', '$', '`', '\n', '\r', '<', '>', '(', ')', '{', '}', '[', ']', '"', '\'', '\\',
];

/// Rejects names starting with space/dot/dash, any control byte other than
/// tab, and a fixed set of shell/markup metacharacters.
pub fn is_valid(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let first = name.chars().next().expect("non-empty");
    if first == ' ' || first == '.' || first == '-' {
        return false;
    }
    for c in name.chars() {
        if FORBIDDEN_CHARS.contains(&c) {
            return false;
        }
        if c.is_control() && c != '\t' {
            return false;
        }
    }
    true
}

/// Resolves a raw username submission into a display name and whether it
/// was accepted as typed. Blank input is `anonymous` (accepted); input
/// that fails validation also becomes `anonymous`, but is reported as
/// rejected so the caller can tell the user and slow down a retry. Valid
/// names are truncated to [`DISPLAY_NAME_MAX_WIDTH`] display columns.
pub fn resolve(raw: &str) -> (String, bool) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ("anonymous".to_string(), true);
    }
    if !is_valid(trimmed) {
        return ("anonymous".to_string(), false);
    }
    (truncate_to_width(trimmed, DISPLAY_NAME_MAX_WIDTH).to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_becomes_anonymous_and_is_accepted() {
        assert_eq!(resolve("   "), ("anonymous".to_string(), true));
        assert_eq!(resolve(""), ("anonymous".to_string(), true));
    }

    #[test]
    fn rejects_leading_space_dot_dash() {
        assert!(!is_valid(" bob"));
        assert!(!is_valid(".bob"));
        assert!(!is_valid("-bob"));
    }

    #[test]
    fn rejects_shell_metacharacters() {
        for bad in ["a|b", "a;b", "a&b", "a$b", "a`b", "a<b", "a>b", "a(b"] {
            assert!(!is_valid(bad), "{bad} should be rejected");
        }
    }

    #[test]
    fn accepts_plain_name_and_truncates_wide_name() {
        let (name, ok) = resolve("alice");
        assert_eq!(name, "alice");
        assert!(ok);

        let long_cjk: String = std::iter::repeat('中').take(15).collect();
        let (name, ok) = resolve(&long_cjk);
        assert!(ok);
        assert_eq!(crate::utf8::string_width(&name), 20);
    }

    #[test]
    fn rejected_name_falls_back_to_anonymous() {
        let (name, ok) = resolve("bad|name");
        assert_eq!(name, "anonymous");
        assert!(!ok);
    }
}
