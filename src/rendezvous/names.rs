//! Connection, path and daemon name validation
//!
//! A connection is addressed as `<owner email>?<path>`, e.g.
//! `alice@example.com?/office/printer`. Names are validated before any
//! repository or registry lookup.

use std::fmt;

const MAX_EMAIL_LEN: usize = 254;
const MAX_PATH_LEN: usize = 512;
const MAX_DAEMON_NAME_LEN: usize = 64;

/// Parsed `<email>?<path>` connection name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionName {
    pub email: String,
    pub path: String,
}

impl ConnectionName {
    pub fn new(email: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ConnectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?{}", self.email, self.path)
    }
}

/// Split on the first `?` and validate both halves
pub fn validate_connection_name(raw: &str) -> Option<ConnectionName> {
    let (email, path) = raw.split_once('?')?;
    if !validate_email(email) || !validate_path(path) {
        return None;
    }
    Some(ConnectionName::new(email.to_lowercase(), path))
}

pub fn validate_email(email: &str) -> bool {
    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return false;
    }
    if email.chars().any(|c| c.is_whitespace() || c == '?' || c == '/') {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }

    // at least one dot with non-empty labels on both sides
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

/// `/segment[/segment...]` made of `[A-Za-z0-9._-]`, no empty segments
pub fn validate_path(path: &str) -> bool {
    if path.len() > MAX_PATH_LEN {
        return false;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    if rest.is_empty() {
        return false;
    }
    rest.split('/').all(|segment| {
        !segment.is_empty()
            && segment != "."
            && segment != ".."
            && segment.chars().all(is_name_char)
    })
}

pub fn validate_daemon_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_DAEMON_NAME_LEN && name.chars().all(is_name_char)
}

/// True for `path` itself and every path below it
pub fn is_within(path: &str, ancestor: &str) -> bool {
    match path.strip_prefix(ancestor) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_connection_name() {
        assert_eq!(
            validate_connection_name("a@b.com?/foo/bar"),
            Some(ConnectionName::new("a@b.com", "/foo/bar"))
        );
    }

    #[test]
    fn test_invalid_connection_names() {
        assert_eq!(validate_connection_name("not-valid"), None);
        assert_eq!(validate_connection_name("?/foo"), None);
        assert_eq!(validate_connection_name("a@b.com?"), None);
        assert_eq!(validate_connection_name("a@b.com?foo"), None);
        assert_eq!(validate_connection_name("ab.com?/foo"), None);
        assert_eq!(validate_connection_name("a@b?/foo"), None);
        assert_eq!(validate_connection_name("a@b.com?/foo//bar"), None);
        assert_eq!(validate_connection_name("a@b.com?/foo/"), None);
    }

    #[test]
    fn test_split_happens_on_first_separator() {
        // the path half may not contain another '?'
        assert_eq!(validate_connection_name("a@b.com?/foo?bar"), None);
    }

    #[test]
    fn test_email_is_normalized() {
        let name = validate_connection_name("Alice@Example.com?/x").unwrap();
        assert_eq!(name.email, "alice@example.com");
        assert_eq!(name.to_string(), "alice@example.com?/x");
    }

    #[test]
    fn test_daemon_names() {
        assert!(validate_daemon_name("laptop-01"));
        assert!(!validate_daemon_name(""));
        assert!(!validate_daemon_name("has space"));
        assert!(!validate_daemon_name("a?b"));
        assert!(!validate_daemon_name(&"x".repeat(65)));
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/a", "/a"));
        assert!(is_within("/a/b/c", "/a"));
        assert!(!is_within("/ab", "/a"));
        assert!(!is_within("/b", "/a"));
    }
}
