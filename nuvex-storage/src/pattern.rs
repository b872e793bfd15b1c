//! Glob matching for key enumeration.
//!
//! Patterns support `*` (any run of characters) and `?` (exactly one
//! character). Everything else matches literally. This is the dialect shared
//! by all three layers so that `keys(pattern)` behaves identically wherever a
//! key happens to live.

/// Match `text` against a glob `pattern`.
///
/// Iterative matcher with single-star backtracking; no allocation.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            // Backtrack: let the last star consume one more character.
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// The literal prefix of a glob, up to the first metacharacter.
pub fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?']) {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}

/// Translate a glob into a SQL `LIKE` expression that over-approximates it:
/// the literal prefix with `%` appended, with LIKE metacharacters escaped.
///
/// Returns `None` when the glob has no literal prefix (no narrowing
/// possible). Callers must still glob-filter the rows; LIKE only prunes.
pub fn like_prefix(pattern: &str) -> Option<String> {
    let prefix = literal_prefix(pattern);
    if prefix.is_empty() {
        return None;
    }
    let mut escaped = String::with_capacity(prefix.len() + 4);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    Some(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_patterns() {
        assert!(glob_match("user:1", "user:1"));
        assert!(!glob_match("user:1", "user:2"));
        assert!(!glob_match("user:1", "user:10"));
    }

    #[test]
    fn test_star() {
        assert!(glob_match("user:*", "user:1"));
        assert!(glob_match("user:*", "user:"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*c", "ac"));
        assert!(glob_match("a*b*c", "aXbYc"));
        assert!(!glob_match("user:*", "session:1"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match("user:?", "user:1"));
        assert!(!glob_match("user:?", "user:10"));
        assert!(!glob_match("user:?", "user:"));
    }

    #[test]
    fn test_star_backtracking() {
        assert!(glob_match("*:1", "ns:sub:1"));
        assert!(glob_match("a*a", "aba"));
        assert!(glob_match("a*a*", "abacus"));
        assert!(!glob_match("a*z", "abc"));
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("user:*"), "user:");
        assert_eq!(literal_prefix("user:?x"), "user:");
        assert_eq!(literal_prefix("plain"), "plain");
        assert_eq!(literal_prefix("*all"), "");
    }

    #[test]
    fn test_like_prefix_escapes_metacharacters() {
        assert_eq!(like_prefix("user:*"), Some("user:%".to_string()));
        assert_eq!(like_prefix("100%_a*"), Some("100\\%\\_a%".to_string()));
        assert_eq!(like_prefix("*"), None);
        assert_eq!(like_prefix("?x"), None);
    }
}
