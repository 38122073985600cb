//! Shared utilities for the gateway.
//!
//! Provides extension lookup, range-header parsing, query injection, path
//! encoding, and HTML escaping.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::error::CoreError;

/// Characters escaped inside a single path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

// ---------------------------------------------------------------------------
// Names and paths
// ---------------------------------------------------------------------------

/// Return the lowercase extension of a file name, without the leading dot.
///
/// Returns an empty string when the name has no extension.
///
/// # Examples
///
/// ```
/// use relaygate_core::utils::ext;
///
/// assert_eq!(ext("Report.SCCGPDF"), "sccgpdf");
/// assert_eq!(ext("README"), "");
/// ```
#[must_use]
pub fn ext(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) => name[idx + 1..].to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Return the last segment of a slash-separated path.
///
/// # Examples
///
/// ```
/// use relaygate_core::utils::base_name;
///
/// assert_eq!(base_name("/docs/notes.md"), "notes.md");
/// assert_eq!(base_name("/"), "");
/// ```
#[must_use]
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Return the parent directory of a slash-separated path (always rooted).
#[must_use]
pub fn parent_dir(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &trimmed[..idx],
    }
}

/// Percent-encode every segment of a path, keeping the separators.
///
/// # Examples
///
/// ```
/// use relaygate_core::utils::encode_path;
///
/// assert_eq!(encode_path("/my docs/a#1.md"), "/my%20docs/a%231.md");
/// ```
#[must_use]
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parse a string as a boolean. True spellings are `1`, `t`, `T`, `true`,
/// `True` and `TRUE`; anything else is false.
#[must_use]
pub fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "t" | "T" | "true" | "True" | "TRUE")
}

/// Split a comma-separated settings value into trimmed, lowercase entries.
#[must_use]
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

// ---------------------------------------------------------------------------
// Range header parsing
// ---------------------------------------------------------------------------

/// Parse an HTTP `Range` header value and return the inclusive byte range.
///
/// Supported formats:
/// - `bytes=0-499` -- first 500 bytes
/// - `bytes=-500` -- last 500 bytes
/// - `bytes=500-` -- from byte 500 to the end
///
/// # Errors
///
/// Returns [`CoreError::InvalidRange`] if the header is malformed or the
/// range is unsatisfiable for `content_length`.
///
/// # Examples
///
/// ```
/// use relaygate_core::utils::parse_range_header;
///
/// let (start, end) = parse_range_header("bytes=0-499", 1000).unwrap();
/// assert_eq!((start, end), (0, 499));
/// ```
pub fn parse_range_header(range: &str, content_length: u64) -> Result<(u64, u64), CoreError> {
    let range = range
        .trim()
        .strip_prefix("bytes=")
        .ok_or(CoreError::InvalidRange)?;

    if content_length == 0 || range.contains(',') {
        return Err(CoreError::InvalidRange);
    }

    if let Some(suffix) = range.strip_prefix('-') {
        // bytes=-N  (last N bytes, clamped to the whole object)
        let n: u64 = suffix.parse().map_err(|_| CoreError::InvalidRange)?;
        if n == 0 {
            return Err(CoreError::InvalidRange);
        }
        let start = content_length.saturating_sub(n);
        Ok((start, content_length - 1))
    } else if let Some(prefix) = range.strip_suffix('-') {
        // bytes=N-  (from N to end)
        let start: u64 = prefix.parse().map_err(|_| CoreError::InvalidRange)?;
        if start >= content_length {
            return Err(CoreError::InvalidRange);
        }
        Ok((start, content_length - 1))
    } else {
        // bytes=N-M
        let (start, end) = range.split_once('-').ok_or(CoreError::InvalidRange)?;
        let start: u64 = start.parse().map_err(|_| CoreError::InvalidRange)?;
        let end: u64 = end.parse().map_err(|_| CoreError::InvalidRange)?;
        if start > end || start >= content_length {
            return Err(CoreError::InvalidRange);
        }
        Ok((start, end.min(content_length - 1)))
    }
}

// ---------------------------------------------------------------------------
// Query strings
// ---------------------------------------------------------------------------

/// Encode query pairs, sorted by key (values keep their relative order).
#[must_use]
pub fn encode_query(pairs: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = pairs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in sorted {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}

/// Append query pairs to a URL, keeping any query it already carries.
///
/// # Errors
///
/// Returns [`CoreError::InvalidUrl`] if `raw` is not an absolute URL.
///
/// # Examples
///
/// ```
/// use relaygate_core::utils::inject_query;
///
/// let pairs = vec![("b".to_owned(), "2".to_owned())];
/// let url = inject_query("http://origin/f.bin?a=1", &pairs).unwrap();
/// assert_eq!(url, "http://origin/f.bin?a=1&b=2");
/// ```
pub fn inject_query(raw: &str, pairs: &[(String, String)]) -> Result<String, CoreError> {
    let param = encode_query(pairs);
    if param.is_empty() {
        return Ok(raw.to_owned());
    }

    let uri: http::Uri = raw.parse().map_err(|e: http::uri::InvalidUri| CoreError::InvalidUrl {
        url: raw.to_owned(),
        reason: e.to_string(),
    })?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(CoreError::InvalidUrl {
            url: raw.to_owned(),
            reason: "url is not absolute".to_owned(),
        });
    }

    let (base, fragment) = match raw.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (raw, None),
    };
    let joiner = match uri.query() {
        Some(q) if !q.is_empty() => "&",
        Some(_) => "",
        None => "?",
    };
    let mut out = format!("{base}{joiner}{param}");
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// HTML escaping
// ---------------------------------------------------------------------------

/// Escape special HTML characters in a string.
///
/// # Examples
///
/// ```
/// use relaygate_core::utils::html_escape;
///
/// assert_eq!(html_escape("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
/// ```
#[must_use]
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_bool_spellings() {
        for yes in ["1", "t", "T", "true", "True", "TRUE"] {
            assert!(parse_bool(yes), "{yes}");
        }
        for no in ["", "0", "f", "false", "yes", "tRuE", " true"] {
            assert!(!parse_bool(no), "{no}");
        }
    }

    #[test]
    fn test_should_extract_lowercase_extension() {
        assert_eq!(ext("notes.MD"), "md");
        assert_eq!(ext("archive.tar.gz"), "gz");
        assert_eq!(ext("noext"), "");
        assert_eq!(ext(".hidden"), "hidden");
    }

    #[test]
    fn test_should_return_parent_dir() {
        assert_eq!(parent_dir("/a/b/c.txt"), "/a/b");
        assert_eq!(parent_dir("/c.txt"), "/");
        assert_eq!(parent_dir("c.txt"), "/");
    }

    #[test]
    fn test_should_split_list_values() {
        assert_eq!(split_list("md, TXT,,json "), vec!["md", "txt", "json"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_should_parse_range_start_end() {
        let (s, e) = parse_range_header("bytes=0-499", 1000).expect("test parse");
        assert_eq!((s, e), (0, 499));
    }

    #[test]
    fn test_should_parse_range_suffix() {
        let (s, e) = parse_range_header("bytes=-500", 1000).expect("test parse");
        assert_eq!((s, e), (500, 999));
    }

    #[test]
    fn test_should_clamp_suffix_longer_than_content() {
        let (s, e) = parse_range_header("bytes=-2000", 1000).expect("test parse");
        assert_eq!((s, e), (0, 999));
    }

    #[test]
    fn test_should_parse_range_from_offset() {
        let (s, e) = parse_range_header("bytes=500-", 1000).expect("test parse");
        assert_eq!((s, e), (500, 999));
    }

    #[test]
    fn test_should_clamp_range_end_to_content_length() {
        let (s, e) = parse_range_header("bytes=0-9999", 100).expect("test parse");
        assert_eq!((s, e), (0, 99));
    }

    #[test]
    fn test_should_reject_invalid_ranges() {
        assert!(parse_range_header("0-499", 1000).is_err());
        assert!(parse_range_header("bytes=1000-", 1000).is_err());
        assert!(parse_range_header("bytes=500-100", 1000).is_err());
        assert!(parse_range_header("bytes=0-0", 0).is_err());
        assert!(parse_range_header("bytes=-0", 1000).is_err());
        assert!(parse_range_header("bytes=0-1,5-6", 1000).is_err());
    }

    #[test]
    fn test_should_encode_query_sorted_by_key() {
        let pairs = vec![
            ("z".to_owned(), "1".to_owned()),
            ("a".to_owned(), "x y".to_owned()),
            ("z".to_owned(), "0".to_owned()),
        ];
        assert_eq!(encode_query(&pairs), "a=x+y&z=1&z=0");
    }

    #[test]
    fn test_should_inject_query_into_url_without_query() {
        let pairs = vec![("raw".to_owned(), "true".to_owned())];
        let url = inject_query("http://origin/a.md", &pairs).expect("inject");
        assert_eq!(url, "http://origin/a.md?raw=true");
    }

    #[test]
    fn test_should_keep_fragment_when_injecting_query() {
        let pairs = vec![("k".to_owned(), "v".to_owned())];
        let url = inject_query("http://origin/a.md#top", &pairs).expect("inject");
        assert_eq!(url, "http://origin/a.md?k=v#top");
    }

    #[test]
    fn test_should_leave_url_unchanged_for_empty_query() {
        let url = inject_query("not a url", &[]).expect("inject");
        assert_eq!(url, "not a url");
    }

    #[test]
    fn test_should_reject_relative_url_when_injecting() {
        let pairs = vec![("k".to_owned(), "v".to_owned())];
        assert!(inject_query("/relative/path", &pairs).is_err());
    }

    #[test]
    fn test_should_escape_html() {
        assert_eq!(html_escape("a'b"), "a&#39;b");
        assert_eq!(html_escape("plain"), "plain");
    }
}
