use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::errors::{AppError, AppResult, Step};
use crate::security::{truncate_body, InputValidator};

use super::auth::{with_cookies, SessionHandle};
use super::tokens::{UploadToken, CSRF_FIELD};
use super::transport::{HttpRequest, HttpTransport, MultipartBody, ACCEPT};

pub const DEFAULT_FILE_NAME: &str = "unknown.epub";
pub const DEFAULT_MIME_TYPE: &str = "application/epub+zip";

/// Multipart field the server's upload button posts the file under
pub const FILE_FIELD: &str = "btn-upload";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Number(f64),
    Text(String),
}

impl MetadataValue {
    pub fn is_empty(&self) -> bool {
        match self {
            MetadataValue::Text(text) => text.trim().is_empty(),
            MetadataValue::Number(number) => !number.is_finite(),
        }
    }

    /// Form-field rendering; whole numbers have no fractional part.
    pub fn render(&self) -> String {
        match self {
            MetadataValue::Text(text) => text.clone(),
            MetadataValue::Number(number) if number.fract() == 0.0 && number.abs() < 1e15 => {
                format!("{}", *number as i64)
            }
            MetadataValue::Number(number) => number.to_string(),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<u32> for MetadataValue {
    fn from(value: u32) -> Self {
        MetadataValue::Number(f64::from(value))
    }
}

/// One book file plus the metadata fields to send with it
#[derive(Clone)]
pub struct UploadPayload {
    content: Vec<u8>,
    file_name: String,
    mime_type: String,
    metadata: BTreeMap<String, MetadataValue>,
}

impl UploadPayload {
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            file_name: DEFAULT_FILE_NAME.to_string(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    /// Reads a book from disk; the file name comes from the path and the MIME
    /// type from its extension.
    pub async fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        InputValidator::validate_book_path(path)?;

        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| InputValidator::sanitize_filename(&name.to_string_lossy()))
            .unwrap_or_default();

        log::debug!("Loaded {} ({} bytes)", path.display(), content.len());

        Ok(Self::new(content)
            .with_file_name(file_name)
            .with_mime_type(mime_type_for_path(path)))
    }

    /// Empty names keep the default.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        if !file_name.trim().is_empty() {
            self.file_name = file_name;
        }
        self
    }

    /// Empty types keep the default.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        if !mime_type.trim().is_empty() {
            self.mime_type = mime_type.trim().to_string();
        }
        self
    }

    pub fn with_metadata(mut self, field: &str, value: impl Into<MetadataValue>) -> Self {
        self.set_metadata(field, value);
        self
    }

    pub fn set_metadata(&mut self, field: &str, value: impl Into<MetadataValue>) {
        self.metadata.insert(field.to_string(), value.into());
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn metadata(&self) -> &BTreeMap<String, MetadataValue> {
        &self.metadata
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.content.is_empty() {
            return Err(AppError::validation("file", "missing file"));
        }
        InputValidator::validate_mime_type(&self.mime_type)?;
        Ok(())
    }

    pub fn build_form(&self, token: &UploadToken) -> MultipartBody {
        let mut form = MultipartBody::new();
        form.add_text_field(CSRF_FIELD, token.as_str());
        form.add_file(
            FILE_FIELD,
            self.file_name.clone(),
            self.mime_type.clone(),
            self.content.clone(),
        );

        for (field, value) in &self.metadata {
            if value.is_empty() {
                continue;
            }
            form.add_text_field(field.clone(), value.render());
        }

        form
    }
}

impl fmt::Debug for UploadPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadPayload")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.content.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

pub fn mime_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("epub") => "application/epub+zip",
        Some("pdf") => "application/pdf",
        Some("mobi") => "application/x-mobipocket-ebook",
        Some("azw3") => "application/vnd.amazon.ebook",
        Some("fb2") => "application/x-fictionbook+xml",
        Some("cbz") => "application/vnd.comicbook+zip",
        Some("cbr") => "application/vnd.comicbook-rar",
        Some("txt") => "text/plain",
        Some("rtf") => "application/rtf",
        Some("odt") => "application/vnd.oasis.opendocument.text",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        _ => DEFAULT_MIME_TYPE,
    }
}

/// Upload response body, JSON when the server sent JSON
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip)]
    pub response: ResponseBody,
}

impl UploadResult {
    /// Success is signalled only by a non-empty `location` in a JSON body.
    pub fn from_body(body: &str) -> Self {
        let response = match serde_json::from_str::<serde_json::Value>(body) {
            Ok(json) => ResponseBody::Json(json),
            Err(e) => {
                log::debug!("Upload response is not JSON ({}): {}", e, truncate_body(body));
                ResponseBody::Text(body.to_string())
            }
        };

        let location = match &response {
            ResponseBody::Json(json) => json
                .get("location")
                .and_then(|value| value.as_str())
                .filter(|location| !location.is_empty())
                .map(str::to_string),
            ResponseBody::Text(_) => None,
        };

        Self {
            success: location.is_some(),
            location,
            response,
        }
    }
}

/// Sends one book to `{base_url}/upload` using an authenticated session.
pub struct UploadSubmitter<'a, T: HttpTransport + ?Sized> {
    transport: &'a T,
}

impl<'a, T: HttpTransport + ?Sized> UploadSubmitter<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    pub async fn submit(
        &self,
        session: SessionHandle,
        payload: &UploadPayload,
    ) -> AppResult<UploadResult> {
        payload.validate()?;

        let (base_url, cookies, token) = session.into_parts();
        let url = format!("{}/upload", base_url);

        log::info!(
            "Uploading {} ({}, {} bytes)",
            payload.file_name(),
            payload.mime_type(),
            payload.content().len()
        );

        let request = with_cookies(HttpRequest::post(&url).header(ACCEPT, "*/*"), &cookies)
            .multipart(payload.build_form(&token));

        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| AppError::transport(Step::Upload, e))?;

        if !response.is_success() {
            log::error!(
                "Upload of {} failed with status {}",
                payload.file_name(),
                response.status
            );
            return Err(AppError::http_status(
                Step::Upload,
                response.status,
                &response.body,
            ));
        }

        let result = UploadResult::from_body(&response.body);
        match &result.location {
            Some(location) => log::info!("Uploaded {} to {}", payload.file_name(), location),
            None => log::warn!(
                "Server accepted the upload of {} but returned no location",
                payload.file_name()
            ),
        }

        Ok(result)
    }
}
