//! Key patterns for bulk invalidation.

/// Match a key against a glob pattern.
///
/// Supports:
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
/// - `\\*`, `\\?` and `\\\\` match the literal character
pub fn glob_match(key: &str, pattern: &str) -> bool {
    let mut chars = key.chars().peekable();
    let mut pattern_chars = pattern.chars().peekable();

    glob_match_recursive(&mut chars, &mut pattern_chars)
}

fn glob_match_recursive(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    pattern: &mut std::iter::Peekable<std::str::Chars>,
) -> bool {
    loop {
        match (pattern.peek().copied(), chars.peek().copied()) {
            (None, None) => return true,
            (None, Some(_)) => return false,
            (Some('*'), _) => {
                pattern.next();

                if pattern.peek().is_none() {
                    return true;
                }

                loop {
                    let mut pattern_clone = pattern.clone();
                    let mut chars_clone = chars.clone();

                    if glob_match_recursive(&mut chars_clone, &mut pattern_clone) {
                        return true;
                    }

                    if chars.next().is_none() {
                        return false;
                    }
                }
            }
            (Some('?'), Some(_)) => {
                pattern.next();
                chars.next();
            }
            (Some('?'), None) => return false,
            (Some('\\'), _) => {
                pattern.next();
                match (pattern.peek().copied(), chars.peek().copied()) {
                    (Some(p), Some(c)) if p == c => {
                        pattern.next();
                        chars.next();
                    }
                    _ => return false,
                }
            }
            (Some(p), Some(c)) if p == c => {
                pattern.next();
                chars.next();
            }
            _ => return false,
        }
    }
}

/// Literal prefix of a pattern, up to its first wildcard.
pub fn literal_prefix(pattern: &str) -> &str {
    let end = pattern
        .find(|c| c == '*' || c == '?' || c == '\\')
        .unwrap_or(pattern.len());
    &pattern[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(glob_match("sequences:all", "sequences:all"));
        assert!(!glob_match("sequences:all", "sequences:al"));
        assert!(!glob_match("sequences:al", "sequences:all"));
    }

    #[test]
    fn test_star() {
        assert!(glob_match("print_history:from=2024-01-01:page=1", "print_history:*"));
        assert!(glob_match("print_history:", "print_history:*"));
        assert!(!glob_match("print_log:x", "print_history:*"));
        assert!(glob_match("a:b:c", "a:*:c"));
        assert!(glob_match("anything", "*"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match("page=1", "page=?"));
        assert!(!glob_match("page=10", "page=?"));
        assert!(!glob_match("page=", "page=?"));
    }

    #[test]
    fn test_escape() {
        assert!(glob_match("a*b", "a\\*b"));
        assert!(!glob_match("axb", "a\\*b"));
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("print_history:*"), "print_history:");
        assert_eq!(literal_prefix("sequences:all"), "sequences:all");
        assert_eq!(literal_prefix("*"), "");
    }
}
