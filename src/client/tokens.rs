//! Anti-forgery token extraction from server-rendered HTML.
//!
//! The page is parsed into a DOM and the first element named `csrf_token` with a
//! non-empty `value` wins, regardless of attribute order. When the DOM pass finds
//! nothing, the raw `name="csrf_token" value="..."` pattern is tried on the text,
//! which also catches tokens emitted inside scripts.

use regex::Regex;
use scraper::{Html, Selector};
use std::fmt;
use std::marker::PhantomData;
use std::sync::OnceLock;

pub const CSRF_FIELD: &str = "csrf_token";

const TOKEN_PATTERN: &str = r#"name="csrf_token" value="([^"]+)""#;

/// Scope marker for the token served with the login form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginScope;

/// Scope marker for the token served to an authenticated session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadScope;

/// An anti-forgery token, tagged with the request it is valid for.
///
/// The scope parameter keeps a login token from ever being submitted with an
/// upload, and vice versa.
#[derive(Clone, PartialEq, Eq)]
pub struct AntiForgeryToken<S> {
    value: String,
    _scope: PhantomData<S>,
}

pub type LoginToken = AntiForgeryToken<LoginScope>;
pub type UploadToken = AntiForgeryToken<UploadScope>;

impl<S> AntiForgeryToken<S> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _scope: PhantomData,
        }
    }

    /// First token found in `html`, if any
    pub fn extract(html: &str) -> Option<Self> {
        find_csrf_token(html).map(Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<S> fmt::Debug for AntiForgeryToken<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AntiForgeryToken(<{} chars>)", self.value.len())
    }
}

pub fn find_csrf_token(html: &str) -> Option<String> {
    token_from_dom(html).or_else(|| token_from_text(html))
}

fn token_from_dom(html: &str) -> Option<String> {
    let selector = Selector::parse(r#"[name="csrf_token"]"#).ok()?;
    let document = Html::parse_document(html);

    document.select(&selector).find_map(|element| {
        element
            .value()
            .attr("value")
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

fn token_from_text(html: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

    let pattern = PATTERN.get_or_init(|| Regex::new(TOKEN_PATTERN).ok()).as_ref()?;
    pattern
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html><body>
<form method="POST" action="/login">
  <input type="hidden" name="csrf_token" value="IjEyMyI.login-token">
  <input type="text" name="username">
</form>
</body></html>"#;

    #[test]
    fn test_extracts_hidden_input_token() {
        assert_eq!(find_csrf_token(LOGIN_PAGE).as_deref(), Some("IjEyMyI.login-token"));
    }

    #[test]
    fn test_attribute_order_does_not_matter() {
        let html = r#"<form><input value="reordered-token" type="hidden" name="csrf_token"></form>"#;
        assert_eq!(find_csrf_token(html).as_deref(), Some("reordered-token"));
    }

    #[test]
    fn test_first_token_in_document_order_wins() {
        let html = r#"
            <form id="search"><input type="hidden" name="csrf_token" value="first"></form>
            <form id="upload"><input type="hidden" name="csrf_token" value="second"></form>
        "#;
        assert_eq!(find_csrf_token(html).as_deref(), Some("first"));
    }

    #[test]
    fn test_empty_values_are_skipped() {
        let html = r#"
            <input type="hidden" name="csrf_token" value="">
            <input type="hidden" name="csrf_token" value="usable">
        "#;
        assert_eq!(find_csrf_token(html).as_deref(), Some("usable"));
    }

    #[test]
    fn test_falls_back_to_raw_pattern_in_scripts() {
        let html = r#"<script>var form = '<input name="csrf_token" value="from-script">';</script>"#;
        assert_eq!(find_csrf_token(html).as_deref(), Some("from-script"));
    }

    #[test]
    fn test_token_value_is_kept_verbatim_on_both_paths() {
        let in_form = r#"<input type="hidden" name="csrf_token" value=" padded ">"#;
        let in_script = r#"<script>var f = '<input name="csrf_token" value=" padded ">';</script>"#;

        assert_eq!(token_from_dom(in_form).as_deref(), Some(" padded "));
        assert_eq!(find_csrf_token(in_script).as_deref(), Some(" padded "));
    }

    #[test]
    fn test_missing_token() {
        let maintenance = "<html><body><h1>Down for maintenance</h1></body></html>";
        assert_eq!(find_csrf_token(maintenance), None);
        assert!(LoginToken::extract(maintenance).is_none());
    }

    #[test]
    fn test_scoped_tokens_expose_value_but_not_in_debug() {
        let token = UploadToken::extract(LOGIN_PAGE).unwrap();
        assert_eq!(token.as_str(), "IjEyMyI.login-token");
        assert!(!format!("{:?}", token).contains("login-token"));
    }
}
