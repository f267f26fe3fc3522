//! Wildcard patterns for `like` and `contains` filters.
//!
//! Both operators end up as full-match regular expressions, but the two
//! backends speak different dialects: PostgreSQL's `~` operator needs explicit
//! `^...$` anchors, Lucene `regexp` queries are implicitly anchored and have
//! their own set of reserved characters.

/// One piece of a parsed pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSegment {
    /// Text matched verbatim; escaped for the target dialect.
    Literal(String),
    /// Any run of characters, including none.
    AnyRun,
    /// Regex syntax passed through untouched (`like` only).
    Raw(String),
}

/// Characters Lucene treats as regexp operators.
const LUCENE_RESERVED: &[char] = &[
    '.', '?', '+', '*', '|', '{', '}', '[', ']', '(', ')', '"', '\\', '#', '@', '&', '<', '>',
    '~',
];

/// `like` values are regexes where a bare `*` means "anything". A `*` already
/// preceded by `.` or `\` is left alone.
pub fn parse_like(value: &str) -> Vec<PatternSegment> {
    let mut segments = Vec::new();
    let mut raw = String::new();
    let mut prev: Option<char> = None;

    for c in value.chars() {
        if c == '*' && !matches!(prev, Some('.') | Some('\\')) {
            if !raw.is_empty() {
                segments.push(PatternSegment::Raw(std::mem::take(&mut raw)));
            }
            segments.push(PatternSegment::AnyRun);
        } else {
            raw.push(c);
        }
        prev = Some(c);
    }
    if !raw.is_empty() {
        segments.push(PatternSegment::Raw(raw));
    }
    segments
}

/// `contains` values are literal text where `*` means "anything" and `\*` is
/// a literal asterisk.
pub fn parse_contains(value: &str) -> Vec<PatternSegment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'*') => {
                chars.next();
                literal.push('*');
            }
            '*' => {
                if !literal.is_empty() {
                    segments.push(PatternSegment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(PatternSegment::AnyRun);
            }
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(PatternSegment::Literal(literal));
    }
    segments
}

/// Anchored expression for PostgreSQL's `~` operator.
pub fn to_posix_regex(segments: &[PatternSegment]) -> String {
    let mut out = String::from("^");
    for segment in segments {
        match segment {
            PatternSegment::Literal(text) => out.push_str(&regex::escape(text)),
            PatternSegment::AnyRun => out.push_str(".*"),
            PatternSegment::Raw(text) => out.push_str(text),
        }
    }
    out.push('$');
    out
}

/// Expression for an Elasticsearch `regexp` query (anchoring is implicit).
pub fn to_lucene_regex(segments: &[PatternSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            PatternSegment::Literal(text) => out.push_str(&escape_lucene(text)),
            PatternSegment::AnyRun => out.push_str(".*"),
            PatternSegment::Raw(text) => out.push_str(text),
        }
    }
    out
}

pub fn escape_lucene(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if LUCENE_RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Rejects patterns whose raw parts do not form a valid expression, or that
/// use syntax only some backends understand: `(?...)` groups and flags, and
/// backslash escapes of letters or digits (`\d`, `\p{L}`, back-references).
/// Escaped punctuation such as `\.` works everywhere and is allowed.
pub fn check_syntax(segments: &[PatternSegment]) -> Result<(), String> {
    for segment in segments {
        if let PatternSegment::Raw(text) = segment {
            check_portable(text)?;
        }
    }
    regex::Regex::new(&to_posix_regex(segments))
        .map(|_| ())
        .map_err(|e| format!("invalid pattern: {}", e))
}

fn check_portable(text: &str) -> Result<(), String> {
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) if escaped.is_ascii_alphanumeric() => {
                    return Err(format!(
                        "invalid pattern: escape '\\{}' is not supported",
                        escaped
                    ));
                }
                _ => {}
            },
            '(' if chars.peek() == Some(&'?') => {
                return Err("invalid pattern: '(?' groups are not supported".to_string());
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    const NAMES: [&str; 4] = ["1 Test", "Test 2 z", "Test 3", "Te*st 3"];

    fn contains_matches(value: &str) -> Vec<&'static str> {
        let re = Regex::new(&to_posix_regex(&parse_contains(value))).unwrap();
        NAMES.iter().copied().filter(|n| re.is_match(n)).collect()
    }

    #[test]
    fn test_contains_wildcards() {
        assert!(contains_matches("Test").is_empty());
        assert_eq!(contains_matches("*Test*"), vec!["1 Test", "Test 2 z", "Test 3"]);
        assert_eq!(contains_matches("Test*"), vec!["Test 2 z", "Test 3"]);
        assert_eq!(contains_matches("*Test"), vec!["1 Test"]);
        assert_eq!(contains_matches("*Te\\*st*"), vec!["Te*st 3"]);
    }

    #[test]
    fn test_contains_escapes_regex_characters() {
        let segments = parse_contains("a.b(c)");
        let re = Regex::new(&to_posix_regex(&segments)).unwrap();
        assert!(re.is_match("a.b(c)"));
        assert!(!re.is_match("axb(c)"));
    }

    #[test]
    fn test_like_segments() {
        assert_eq!(
            parse_like("Te*t"),
            vec![
                PatternSegment::Raw("Te".into()),
                PatternSegment::AnyRun,
                PatternSegment::Raw("t".into()),
            ]
        );
        // Already a regex repetition or an escaped star.
        assert_eq!(parse_like("a.*b"), vec![PatternSegment::Raw("a.*b".into())]);
        assert_eq!(parse_like("a\\*"), vec![PatternSegment::Raw("a\\*".into())]);
    }

    #[test]
    fn test_like_is_anchored() {
        let re = Regex::new(&to_posix_regex(&parse_like("Test [0-9]"))).unwrap();
        assert!(re.is_match("Test 3"));
        assert!(!re.is_match("Test 2 z"));
        assert!(!re.is_match("1 Test 3"));
    }

    #[test]
    fn test_lucene_dialect() {
        let segments = parse_contains("*a@b.com*");
        assert_eq!(to_lucene_regex(&segments), ".*a\\@b\\.com.*");
        assert_eq!(escape_lucene("<x> ~\"y\""), "\\<x\\> \\~\\\"y\\\"");
        assert_eq!(to_lucene_regex(&parse_like("Te*t")), "Te.*t");
    }

    #[test]
    fn test_check_syntax() {
        assert!(check_syntax(&parse_like("Test (1|2)")).is_ok());
        assert!(check_syntax(&parse_like("Test (1")).is_err());
        assert!(check_syntax(&parse_contains("Test (1")).is_ok());
    }

    #[test]
    fn test_check_syntax_rejects_engine_specific_syntax() {
        for pattern in ["(?P<n>a)", "(?i)test", "\\p{L}*", "\\d+", "a\\1"] {
            let err = check_syntax(&parse_like(pattern)).unwrap_err();
            assert!(err.starts_with("invalid pattern"), "{}: {}", pattern, err);
        }
        assert!(check_syntax(&parse_like("1\\.5*")).is_ok());
        assert!(check_syntax(&parse_like("Te\\*st")).is_ok());
        // Literal text is escaped per backend, so letters after a backslash are fine.
        assert!(check_syntax(&parse_contains("C:\\dir*")).is_ok());
    }
}
