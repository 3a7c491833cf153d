use log::debug;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;

/// Characters of a path segment that stay literal under RFC 2396: the
/// unreserved marks plus the pchar extras. Everything else is
/// percent-encoded as UTF-8. The colon stays literal on purpose; some URL
/// libraries refuse to handle segments with encoded colons.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b',');

/// A path segment carried in both its raw and its URL-encoded form, so the
/// HTTP-facing layers never re-encode. Printing uses the raw form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlPathWrapper {
    path: String,
    encoded: String,
}

impl UrlPathWrapper {
    /// The wrapper of the empty path.
    pub fn for_empty_path() -> Self {
        UrlPathWrapper {
            path: String::new(),
            encoded: String::new(),
        }
    }

    /// Wraps a raw, unencoded path segment.
    pub fn for_path(path: &str) -> Self {
        let encoded = utf8_percent_encode(path, SEGMENT).to_string();
        debug!("building string-pair '{}' and '{}'", path, encoded);
        UrlPathWrapper {
            path: path.to_string(),
            encoded,
        }
    }

    /// Wraps every element of a raw path.
    pub fn for_paths(path_elements: &[&str]) -> Vec<Self> {
        path_elements
            .iter()
            .map(|element| UrlPathWrapper::for_path(element))
            .collect()
    }

    /// The path segment without any URL-encoding.
    pub fn unencoded(&self) -> &str {
        &self.path
    }

    /// The path segment in its URL-encoded form.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for UrlPathWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_segment_is_unchanged() {
        let wrapper = UrlPathWrapper::for_path("data.raw");
        assert_eq!(wrapper.unencoded(), "data.raw");
        assert_eq!(wrapper.encoded(), "data.raw");
        assert_eq!(wrapper.to_string(), "data.raw");
    }

    #[test]
    fn test_space_and_percent_are_encoded() {
        let wrapper = UrlPathWrapper::for_path("run 2026 100%");
        assert_eq!(wrapper.unencoded(), "run 2026 100%");
        assert_eq!(wrapper.encoded(), "run%202026%20100%25");
    }

    #[test]
    fn test_colon_is_preserved() {
        let wrapper = UrlPathWrapper::for_path("vo:atlas:prod");
        assert_eq!(wrapper.encoded(), "vo:atlas:prod");
    }

    #[test]
    fn test_pchar_extras_are_preserved() {
        let wrapper = UrlPathWrapper::for_path("a@b&c=d+e$f,g");
        assert_eq!(wrapper.encoded(), "a@b&c=d+e$f,g");
    }

    #[test]
    fn test_non_ascii_is_utf8_encoded() {
        let wrapper = UrlPathWrapper::for_path("dané");
        assert_eq!(wrapper.encoded(), "dan%C3%A9");
    }

    #[test]
    fn test_reserved_separators_are_encoded() {
        let wrapper = UrlPathWrapper::for_path("a/b?c#d");
        assert_eq!(wrapper.encoded(), "a%2Fb%3Fc%23d");
    }

    #[test]
    fn test_empty_and_bulk() {
        assert_eq!(UrlPathWrapper::for_empty_path().encoded(), "");
        let wrapped = UrlPathWrapper::for_paths(&["a b", "c"]);
        assert_eq!(wrapped.len(), 2);
        assert_eq!(wrapped[0].encoded(), "a%20b");
        assert_eq!(wrapped[1].encoded(), "c");
    }
}
