//! Decoding of the YAML payloads returned by `list-tubes` and `stats-*`.
//!
//! ```text
//! ---
//! - default
//! - emails
//! ```
//!
//! ```text
//! ---
//! name: default
//! current-jobs-ready: 3
//! ```
//!
//! Scalars are kept as the server wrote them: a tube named `007` stays
//! `"007"` and `rusage-utime: 0.010000` keeps its trailing zeros.

use std::collections::HashMap;

use super::error::{ProtocolError, ProtocolResult};

fn malformed(what: &str, err: serde_yaml::Error) -> ProtocolError {
    ProtocolError::UnexpectedReply(format!("malformed {} payload: {}", what, err))
}

/// Decode a YAML sequence of names.
pub fn parse_list(data: &[u8]) -> ProtocolResult<Vec<String>> {
    serde_yaml::from_slice::<Option<Vec<String>>>(data)
        .map(Option::unwrap_or_default)
        .map_err(|e| malformed("list", e))
}

/// Decode a flat YAML mapping.
pub fn parse_dict(data: &[u8]) -> ProtocolResult<HashMap<String, String>> {
    serde_yaml::from_slice::<Option<HashMap<String, String>>>(data)
        .map(Option::unwrap_or_default)
        .map_err(|e| malformed("dictionary", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let tubes = parse_list(b"---\n- default\n- emails\n- 007\n").unwrap();
        assert_eq!(tubes, vec!["default", "emails", "007"]);

        assert!(parse_list(b"---\nnot a list\n").is_err());
    }

    #[test]
    fn test_parse_dict() {
        let stats = parse_dict(
            b"---\r\nname: \"work\"\r\ncurrent-jobs-ready: 3\r\nrusage-utime: 0.010000\r\n",
        )
        .unwrap();

        assert_eq!(stats["name"], "work");
        assert_eq!(stats["current-jobs-ready"], "3");
        assert_eq!(stats["rusage-utime"], "0.010000");
        assert_eq!(stats.len(), 3);
    }

    #[test]
    fn test_parse_dict_rejects_nested_values() {
        let err = parse_dict(b"---\nname:\n  - nested\n").unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedReply(_)));
    }
}
