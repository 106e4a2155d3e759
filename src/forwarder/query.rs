//! Query-string allow-listing.

use url::form_urlencoded;

/// Re-encode `raw`, keeping only parameters named in `allowed`.
///
/// Order and repeated keys are preserved. Returns `None` when nothing survives.
pub fn filter_query(raw: Option<&str>, allowed: &[&str]) -> Option<String> {
    let raw = raw?;
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut kept = 0usize;

    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        if allowed.iter().any(|name| *name == key) {
            serializer.append_pair(&key, &value);
            kept += 1;
        } else {
            tracing::debug!(param = %key, "Dropping query parameter not allowed for route");
        }
    }

    (kept > 0).then(|| serializer.finish())
}

/// First value of `name` in a raw query string.
pub fn query_param(raw: Option<&str>, name: &str) -> Option<String> {
    form_urlencoded::parse(raw?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH: &[&str] = &["q", "k", "doc_id", "path", "kind"];

    #[test]
    fn test_unlisted_params_dropped() {
        let filtered = filter_query(Some("q=rust&k=3&debug=1&admin=true"), SEARCH).unwrap();
        assert_eq!(filtered, "q=rust&k=3");
    }

    #[test]
    fn test_values_reencoded() {
        let filtered = filter_query(Some("q=a%20b%26c&path=%2Fdocs%2Fx.md"), SEARCH).unwrap();
        assert_eq!(filtered, "q=a+b%26c&path=%2Fdocs%2Fx.md");
    }

    #[test]
    fn test_nothing_allowed() {
        assert_eq!(filter_query(Some("x=1"), SEARCH), None);
        assert_eq!(filter_query(None, SEARCH), None);
        assert_eq!(filter_query(Some("q=1"), &[]), None);
    }

    #[test]
    fn test_query_param() {
        assert_eq!(query_param(Some("k=2&q=hello+world"), "q").as_deref(), Some("hello world"));
        assert_eq!(query_param(Some("k=2"), "q"), None);
    }
}
