//! Drive API v3 file resources, projected to the fields the gateway exposes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata fields that can be requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileField {
    Id,
    Name,
    MimeType,
    ModifiedTime,
    WebViewLink,
}

impl FileField {
    pub const ALL: [FileField; 5] = [
        FileField::Id,
        FileField::Name,
        FileField::MimeType,
        FileField::ModifiedTime,
        FileField::WebViewLink,
    ];

    /// Field name as understood by the Drive API `fields` selector
    pub fn api_name(&self) -> &'static str {
        match self {
            FileField::Id => "id",
            FileField::Name => "name",
            FileField::MimeType => "mimeType",
            FileField::ModifiedTime => "modifiedTime",
            FileField::WebViewLink => "webViewLink",
        }
    }

    /// Accepts the API spelling or snake_case (`mimeType` / `mime_type`)
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().replace('_', "").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|field| field.api_name().to_ascii_lowercase() == normalized)
    }
}

/// Selector for one file resource. `id` is always included.
pub(crate) fn file_selector(fields: &[FileField]) -> String {
    FileField::ALL
        .iter()
        .filter(|field| **field == FileField::Id || fields.contains(field))
        .map(|field| field.api_name())
        .collect::<Vec<_>>()
        .join(",")
}

/// Selector for a files.list page
pub(crate) fn list_selector(fields: &[FileField]) -> String {
    format!("nextPageToken,files({})", file_selector(fields))
}

/// One remote file as returned by the provider. Fields that were not
/// requested are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
}

impl FileMetadata {
    /// Google Docs/Sheets/... have no binary content to download
    pub fn is_google_native(&self) -> bool {
        self.mime_type
            .as_deref()
            .map(|m| m.starts_with("application/vnd.google-apps."))
            .unwrap_or(false)
    }

    /// Name for display; the id when the provider gave none
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.id,
        }
    }

    /// Single path component safe to create in a local directory.
    /// Provider names may contain separators or `..`; those fall back to
    /// their last component, or to the file id.
    pub fn local_file_name(&self) -> String {
        let candidate = self
            .name
            .as_deref()
            .and_then(|name| name.rsplit(['/', '\\']).next())
            .map(str::trim)
            .unwrap_or_default();

        if candidate.is_empty() || candidate == "." || candidate == ".." || candidate.contains('\0') {
            sanitize_component(&self.id)
        } else {
            candidate.to_string()
        }
    }
}

/// One page of a listing, in provider order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileList {
    pub files: Vec<FileMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "download".to_string(),
        other => other.to_string(),
    }
}

/// files.list response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FilesListResponse {
    #[serde(default)]
    pub files: Vec<FileMetadata>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Google JSON error envelope: `{"error": {"code": 404, "message": "..."}}`
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selectors() {
        assert_eq!(list_selector(&[FileField::Name]), "nextPageToken,files(id,name)");
        assert_eq!(
            file_selector(&[FileField::WebViewLink, FileField::Name, FileField::Name]),
            "id,name,webViewLink"
        );
        assert_eq!(
            file_selector(&FileField::ALL),
            "id,name,mimeType,modifiedTime,webViewLink"
        );
    }

    #[test]
    fn test_parse_field_names() {
        assert_eq!(FileField::parse("mimeType"), Some(FileField::MimeType));
        assert_eq!(FileField::parse("modified_time"), Some(FileField::ModifiedTime));
        assert_eq!(FileField::parse(" ID "), Some(FileField::Id));
        assert_eq!(FileField::parse("size"), None);
    }

    #[test]
    fn test_deserialize_partial_file() {
        let file: FileMetadata = serde_json::from_str(r#"{"id": "abc", "name": "notes.txt"}"#).unwrap();
        assert_eq!(file.id, "abc");
        assert_eq!(file.name.as_deref(), Some("notes.txt"));
        assert!(file.mime_type.is_none());
        assert!(file.modified_time.is_none());
    }

    #[test]
    fn test_deserialize_full_file() {
        let json = r#"{
            "id": "1a2b",
            "name": "report.pdf",
            "mimeType": "application/pdf",
            "modifiedTime": "2024-03-01T12:30:00.000Z",
            "webViewLink": "https://drive.google.com/file/d/1a2b/view"
        }"#;

        let file: FileMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(file.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(
            file.modified_time.unwrap().to_rfc3339(),
            "2024-03-01T12:30:00+00:00"
        );
        assert!(!file.is_google_native());
    }

    #[test]
    fn test_unrequested_fields_are_not_serialized() {
        let file: FileMetadata = serde_json::from_str(r#"{"id": "abc"}"#).unwrap();
        assert_eq!(serde_json::to_string(&file).unwrap(), r#"{"id":"abc"}"#);
        assert_eq!(file.display_name(), "abc");
    }

    fn named(name: Option<&str>) -> FileMetadata {
        FileMetadata {
            id: "file-1".to_string(),
            name: name.map(str::to_string),
            mime_type: None,
            modified_time: None,
            web_view_link: None,
        }
    }

    #[test]
    fn test_local_file_name_stays_in_directory() {
        assert_eq!(named(Some("report.pdf")).local_file_name(), "report.pdf");
        assert_eq!(named(Some("../../.bashrc")).local_file_name(), ".bashrc");
        assert_eq!(named(Some("a/../../x")).local_file_name(), "x");
        assert_eq!(named(Some("dir\\evil.txt")).local_file_name(), "evil.txt");
        assert_eq!(named(Some("..")).local_file_name(), "file-1");
        assert_eq!(named(Some("notes/")).local_file_name(), "file-1");
        assert_eq!(named(Some("  ")).local_file_name(), "file-1");
        assert_eq!(named(None).local_file_name(), "file-1");
    }

    #[test]
    fn test_deserialize_error_envelope() {
        let json = r#"{"error": {"code": 404, "message": "File not found: xyz.", "errors": []}}"#;
        let envelope: ApiErrorEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.error.message, "File not found: xyz.");
    }
}
