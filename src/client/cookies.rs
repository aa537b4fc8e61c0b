use std::fmt;

use super::transport::HttpResponse;

/// `Set-Cookie` attribute names. Anything else in `name=value` form is a cookie.
const COOKIE_ATTRIBUTES: [&str; 9] = [
    "path",
    "domain",
    "expires",
    "max-age",
    "secure",
    "httponly",
    "samesite",
    "priority",
    "partitioned",
];

/// Session cookies for a single authenticate-then-upload cycle.
///
/// Insertion-ordered; a later value for an existing name replaces the earlier
/// one in place. Never written to disk.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: Vec<(String, String)>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cookies.iter().map(|(n, _)| n.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.cookies.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.cookies.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.cookies.iter().position(|(n, _)| n == name)?;
        Some(self.cookies.remove(index).1)
    }

    /// Merges one `Set-Cookie` header value.
    ///
    /// The leading pair is the cookie itself. Further `name=value` segments that
    /// are not cookie attributes are taken as additional cookies, since some
    /// servers fold several cookies into one header. `Max-Age=0` (or negative)
    /// deletes the leading cookie.
    pub fn merge_set_cookie(&mut self, header: &str) {
        let mut segments = header.split(';').map(str::trim).filter(|s| !s.is_empty());

        let Some((name, value)) = segments.next().and_then(parse_pair) else {
            log::debug!("Ignoring malformed Set-Cookie header");
            return;
        };

        let mut expired = false;
        let mut extra = Vec::new();

        for segment in segments {
            let (key, attr_value) = match segment.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (segment, None),
            };
            let lower = key.to_ascii_lowercase();

            if COOKIE_ATTRIBUTES.contains(&lower.as_str()) {
                if lower == "max-age" {
                    expired = attr_value
                        .and_then(|v| v.parse::<i64>().ok())
                        .is_some_and(|age| age <= 0);
                }
                continue;
            }

            if let Some(pair) = parse_pair(segment) {
                extra.push(pair);
            }
        }

        if expired {
            self.remove(name);
        } else {
            self.insert(name, value);
        }

        for (name, value) in extra {
            self.insert(name, value);
        }
    }

    pub fn merge_response(&mut self, response: &HttpResponse) {
        for header in response.set_cookies() {
            self.merge_set_cookie(header);
        }
    }

    /// Serialises the jar into a single `Cookie` request header value.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }

        Some(
            self.cookies
                .iter()
                .map(|(n, v)| format!("{}={}", n, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

fn parse_pair(segment: &str) -> Option<(&str, &str)> {
    let (name, value) = segment.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

// Cookie values are session credentials; only names are shown.
impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_cookie_overwrites_earlier() {
        let mut jar = CookieJar::new();
        jar.merge_response(&HttpResponse::new(200, "").with_header("Set-Cookie", "a=1"));
        jar.merge_response(&HttpResponse::new(302, "").with_header("Set-Cookie", "a=2; b=3"));

        let header = jar.header_value().unwrap();
        assert!(header.contains("a=2"));
        assert!(header.contains("b=3"));
        assert!(!header.contains("a=1"));
        assert_eq!(header, "a=2; b=3");
    }

    #[test]
    fn test_attributes_are_not_cookies() {
        let mut jar = CookieJar::new();
        jar.merge_set_cookie(
            "session=abc.def; Expires=Thu, 01 Jan 2099 00:00:00 GMT; HttpOnly; Path=/; SameSite=Lax",
        );

        assert_eq!(jar.len(), 1);
        assert_eq!(jar.get("session"), Some("abc.def"));
        assert_eq!(jar.header_value().as_deref(), Some("session=abc.def"));
    }

    #[test]
    fn test_max_age_zero_removes_cookie() {
        let mut jar = CookieJar::new();
        jar.merge_set_cookie("remember_token=xyz; Path=/");
        jar.merge_set_cookie("session=abc; Path=/");
        jar.merge_set_cookie("remember_token=; Max-Age=0; Path=/");

        assert_eq!(jar.get("remember_token"), None);
        assert_eq!(jar.header_value().as_deref(), Some("session=abc"));
    }

    #[test]
    fn test_insertion_order_is_kept_on_overwrite() {
        let mut jar = CookieJar::new();
        jar.insert("first", "1");
        jar.insert("second", "2");
        jar.insert("first", "3");

        assert_eq!(jar.header_value().as_deref(), Some("first=3; second=2"));
    }

    #[test]
    fn test_malformed_headers_are_ignored() {
        let mut jar = CookieJar::new();
        jar.merge_set_cookie("");
        jar.merge_set_cookie("no-equals-sign");
        jar.merge_set_cookie("=value-without-name");

        assert!(jar.is_empty());
        assert_eq!(jar.header_value(), None);
    }

    #[test]
    fn test_debug_does_not_print_values() {
        let mut jar = CookieJar::new();
        jar.insert("session", "very-secret");

        let debug = format!("{:?}", jar);
        assert!(debug.contains("session"));
        assert!(!debug.contains("very-secret"));
    }
}
