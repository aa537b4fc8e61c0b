use regex::Regex;
use reqwest::header::HeaderValue;
use reqwest::Url;
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{AppError, AppResult};

/// Response bodies attached to errors and logs are cut to this many characters
pub const MAX_DIAGNOSTIC_BODY_CHARS: usize = 300;

pub struct InputValidator;

impl InputValidator {
    /// Validates a server base URL and returns it without trailing slashes.
    pub fn validate_base_url(url: &str) -> AppResult<String> {
        let trimmed = url.trim().trim_end_matches('/');

        if trimmed.is_empty() {
            return Err(AppError::validation("base_url", "Base URL cannot be empty"));
        }

        if trimmed.len() > 2048 {
            return Err(AppError::validation("base_url", "Base URL too long"));
        }

        let parsed = Url::parse(trimmed)
            .map_err(|_| AppError::validation("base_url", "Base URL must be an absolute URL"))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::validation(
                "base_url",
                "Base URL must use http or https",
            ));
        }

        if parsed.host_str().is_none() {
            return Err(AppError::validation("base_url", "Base URL must include a host"));
        }

        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(AppError::validation(
                "base_url",
                "Base URL must not contain a query or fragment",
            ));
        }

        if parsed.scheme() == "http" {
            log::warn!("Base URL {} does not use HTTPS; credentials are sent in clear text", trimmed);
        }

        Ok(trimmed.to_string())
    }

    pub fn validate_username(username: &str) -> AppResult<()> {
        if username.trim().is_empty() {
            return Err(AppError::validation("username", "Username cannot be empty"));
        }

        if username.len() > 256 {
            return Err(AppError::validation("username", "Username too long (max 256 characters)"));
        }

        Ok(())
    }

    pub fn validate_password(password: &str) -> AppResult<()> {
        if password.is_empty() {
            return Err(AppError::validation("password", "Password cannot be empty"));
        }

        Ok(())
    }

    pub fn validate_book_path(path: &Path) -> AppResult<()> {
        if path.as_os_str().is_empty() {
            return Err(AppError::validation("file", "File path cannot be empty"));
        }

        if !path.exists() {
            return Err(AppError::validation(
                "file",
                &format!("File not found: {}", path.display()),
            ));
        }

        if !path.is_file() {
            return Err(AppError::validation(
                "file",
                &format!("Path is not a file: {}", path.display()),
            ));
        }

        Ok(())
    }

    /// Accepts `type/subtype` with optional `; name=value` parameters.
    pub fn validate_mime_type(mime_type: &str) -> AppResult<()> {
        let invalid = || {
            AppError::validation("mime_type", &format!("Invalid MIME type: {}", mime_type))
        };

        if HeaderValue::from_str(mime_type).is_err() {
            return Err(invalid());
        }

        let mut parts = mime_type.split(';');
        let essence = parts.next().unwrap_or_default();
        let Some((kind, subtype)) = essence.split_once('/') else {
            return Err(invalid());
        };
        if !is_token(kind) || !is_token(subtype) {
            return Err(invalid());
        }

        for param in parts {
            match param.trim().split_once('=') {
                Some((name, value)) if is_token(name) && !value.is_empty() => {}
                _ => return Err(invalid()),
            }
        }

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        static UNSAFE_CHARS: OnceLock<Option<Regex>> = OnceLock::new();

        let trimmed = filename.trim();
        let sanitized = match UNSAFE_CHARS
            .get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).ok())
            .as_ref()
        {
            Some(unsafe_chars) => unsafe_chars.replace_all(trimmed, "_").into_owned(),
            None => trimmed.to_string(),
        };

        // Limit length, keeping the extension the server uses to detect the format
        if sanitized.chars().count() > 255 {
            let extension = Path::new(&sanitized)
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default();
            let stem: String = sanitized
                .chars()
                .take(255usize.saturating_sub(extension.chars().count()))
                .collect();
            format!("{}{}", stem, extension)
        } else {
            sanitized
        }
    }
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c))
}

/// Cuts a response body down to a size suitable for error messages and logs.
pub fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= MAX_DIAGNOSTIC_BODY_CHARS {
        return body.to_string();
    }

    let mut truncated: String = body.chars().take(MAX_DIAGNOSTIC_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_stripped() {
        let url = InputValidator::validate_base_url("https://calibre.example.com/").unwrap();
        assert_eq!(url, "https://calibre.example.com");

        let nested = InputValidator::validate_base_url(" https://example.com/calibre// ").unwrap();
        assert_eq!(nested, "https://example.com/calibre");
    }

    #[test]
    fn test_base_url_rejects_relative_and_foreign_schemes() {
        assert!(InputValidator::validate_base_url("").is_err());
        assert!(InputValidator::validate_base_url("calibre.example.com").is_err());
        assert!(InputValidator::validate_base_url("ftp://calibre.example.com").is_err());
        assert!(InputValidator::validate_base_url("https://calibre.example.com/?a=b").is_err());
    }

    #[test]
    fn test_credentials_fields_must_be_present() {
        assert!(InputValidator::validate_username("reader").is_ok());
        assert!(InputValidator::validate_username("   ").is_err());
        assert!(InputValidator::validate_password("secret").is_ok());
        assert!(InputValidator::validate_password("").is_err());
    }

    #[test]
    fn test_mime_type_validation() {
        assert!(InputValidator::validate_mime_type("application/epub+zip").is_ok());
        assert!(InputValidator::validate_mime_type("text/plain; charset=utf-8").is_ok());
        assert!(InputValidator::validate_mime_type("application/vnd.amazon.ebook").is_ok());

        assert!(InputValidator::validate_mime_type("not a mime type").is_err());
        assert!(InputValidator::validate_mime_type("epub").is_err());
        assert!(InputValidator::validate_mime_type("application/").is_err());
        assert!(InputValidator::validate_mime_type("text/plain; charset").is_err());
        assert!(InputValidator::validate_mime_type("text/plain\n").is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        let safe = InputValidator::sanitize_filename("My <Book>: Part 1?.epub");
        assert_eq!(safe, "My _Book__ Part 1_.epub");

        let long_name = format!("{}.epub", "a".repeat(400));
        let safe_long = InputValidator::sanitize_filename(&long_name);
        assert_eq!(safe_long.chars().count(), 255);
        assert!(safe_long.ends_with(".epub"));
    }

    #[test]
    fn test_validate_book_path_missing_file() {
        let result = InputValidator::validate_book_path(Path::new("definitely_missing_book.epub"));
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("  short  "), "short");

        let long = "é".repeat(MAX_DIAGNOSTIC_BODY_CHARS + 50);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), MAX_DIAGNOSTIC_BODY_CHARS + 3);
    }
}
