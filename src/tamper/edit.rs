// src/tamper/edit.rs
//! Field edits for held requests and replay overrides

use crate::record::{HeaderList, OutboundRequest};
use bytes::Bytes;

/// Subset of request fields to replace
///
/// Unset fields keep their current value. `headers` replaces the whole
/// header list; `set_headers` entries are applied afterwards, each one
/// replacing every existing header of the same name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestEdit {
    pub method: Option<String>,
    pub url: Option<String>,
    pub headers: Option<HeaderList>,
    pub set_headers: Vec<(String, String)>,
    /// `Some(None)` removes the body
    pub body: Option<Option<Bytes>>,
}

impl RequestEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn headers(mut self, headers: HeaderList) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(Some(body.into()));
        self
    }

    pub fn clear_body(mut self) -> Self {
        self.body = Some(None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Produce the edited copy of `base`; `base` itself is untouched
    pub fn apply_to(&self, base: &OutboundRequest) -> OutboundRequest {
        let mut edited = base.clone();

        if let Some(method) = &self.method {
            edited.method = method.trim().to_ascii_uppercase();
        }
        if let Some(url) = &self.url {
            edited.url = url.trim().to_string();
        }
        if let Some(headers) = &self.headers {
            edited.headers = headers.clone();
        }
        for (name, value) in &self.set_headers {
            edited.headers.set(name.clone(), value.clone());
        }
        if let Some(body) = &self.body {
            edited.body = body.clone();
        }

        edited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_edit() {
        let base = OutboundRequest::get("http://example.test/a")
            .with_header("Accept", "*/*")
            .with_body("x");

        let edited = RequestEdit::new()
            .method("post")
            .set_header("X-Test", "1")
            .apply_to(&base);

        assert_eq!(edited.method, "POST");
        assert_eq!(edited.url, base.url);
        assert_eq!(edited.headers.get("accept"), Some("*/*"));
        assert_eq!(edited.headers.get("x-test"), Some("1"));
        assert_eq!(edited.body, base.body);
    }

    #[test]
    fn test_header_replacement_and_body_removal() {
        let base = OutboundRequest::get("http://example.test/a")
            .with_header("Accept", "*/*")
            .with_body("x");

        let headers: HeaderList = vec![("X-Test", "1")].into_iter().collect();
        let edited = RequestEdit::new()
            .headers(headers)
            .clear_body()
            .apply_to(&base);

        assert!(!edited.headers.contains("accept"));
        assert_eq!(edited.headers.len(), 1);
        assert!(edited.body.is_none());
    }

    #[test]
    fn test_is_empty() {
        assert!(RequestEdit::new().is_empty());
        assert!(!RequestEdit::new().url("http://x.test/").is_empty());
    }
}
