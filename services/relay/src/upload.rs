use crate::error::ApiError;
use crate::generation::ImagePart;
use axum::extract::Multipart;
use bytes::Bytes;
use tracing::debug;

pub const SUBJECT_MISSING_MESSAGE: &str = "인물 이미지(person)가 필요합니다.";
pub const OVERLAY_MISSING_MESSAGE: &str = "의상 이미지(clothing)가 최소 1개 필요합니다.";

/// One file part of a multipart submission, buffered in memory
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Form field the file arrived under
    pub field_name: String,
    /// Client-supplied file name
    pub file_name: Option<String>,
    /// Declared or inferred media type
    pub content_type: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn to_image_part(&self) -> ImagePart {
        ImagePart {
            mime_type: self.content_type.clone(),
            data: self.data.clone(),
        }
    }
}

/// Field-name convention for try-on submissions
#[derive(Debug, Clone)]
pub struct FieldNames {
    /// Exact name of the subject (person) field
    pub subject: String,
    /// Exact name, and prefix fallback, of the overlay (clothing) fields
    pub overlay: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            subject: "person".to_string(),
            overlay: "clothing".to_string(),
        }
    }
}

/// A validated try-on submission: one subject and at least one overlay
#[derive(Debug)]
pub struct TryOnUpload {
    pub subject: UploadedFile,
    pub overlays: Vec<UploadedFile>,
}

impl TryOnUpload {
    /// Split uploaded files into subject and overlays.
    ///
    /// Overlays are chosen by the first rule that yields anything:
    /// 1. fields named exactly `names.overlay`
    /// 2. fields whose name starts with `names.overlay` (`clothing1`, `clothing[]`)
    /// 3. every file not submitted under the subject field
    ///
    /// Empty files count as absent. Submission order is preserved.
    pub fn from_files(files: Vec<UploadedFile>, names: &FieldNames) -> Result<Self, ApiError> {
        let (subjects, others): (Vec<_>, Vec<_>) = files
            .into_iter()
            .filter(|f| !f.data.is_empty())
            .partition(|f| f.field_name == names.subject);

        let subject = subjects
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::BadRequest(SUBJECT_MISSING_MESSAGE.to_string()))?;

        let overlays = if others.iter().any(|f| f.field_name == names.overlay) {
            others
                .into_iter()
                .filter(|f| f.field_name == names.overlay)
                .collect()
        } else if others.iter().any(|f| f.field_name.starts_with(&names.overlay)) {
            others
                .into_iter()
                .filter(|f| f.field_name.starts_with(&names.overlay))
                .collect()
        } else {
            others
        };

        if overlays.is_empty() {
            return Err(ApiError::BadRequest(OVERLAY_MISSING_MESSAGE.to_string()));
        }

        Ok(Self { subject, overlays })
    }

    /// Subject first, then overlays in submission order
    pub fn image_parts(&self) -> Vec<ImagePart> {
        std::iter::once(&self.subject)
            .chain(self.overlays.iter())
            .map(UploadedFile::to_image_part)
            .collect()
    }
}

/// Buffer every file part of a multipart body. Plain text fields are skipped.
pub async fn read_multipart(mut multipart: Multipart) -> Result<Vec<UploadedFile>, ApiError> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {e}")))?
    {
        if field.file_name().is_none() && field.content_type().is_none() {
            continue;
        }

        let field_name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = resolve_content_type(field.content_type(), file_name.as_deref());

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {e}")))?;

        debug!(
            field = %field_name,
            content_type = %content_type,
            size_bytes = data.len(),
            "Buffered uploaded file"
        );

        files.push(UploadedFile {
            field_name,
            file_name,
            content_type,
            data,
        });
    }

    Ok(files)
}

/// Prefer a declared image type, else infer from the file extension
fn resolve_content_type(declared: Option<&str>, file_name: Option<&str>) -> String {
    match declared {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
        _ => file_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| get_content_type(ext))
            .unwrap_or("image/jpeg")
            .to_string(),
    }
}

/// Get content type for an image file extension
fn get_content_type(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(field: &str, data: &'static [u8]) -> UploadedFile {
        UploadedFile {
            field_name: field.to_string(),
            file_name: Some(format!("{field}.jpg")),
            content_type: "image/jpeg".to_string(),
            data: Bytes::from_static(data),
        }
    }

    fn overlay_fields(upload: &TryOnUpload) -> Vec<&str> {
        upload.overlays.iter().map(|f| f.field_name.as_str()).collect()
    }

    #[test]
    fn test_exact_field_names() {
        let upload = TryOnUpload::from_files(
            vec![
                file("clothing", b"shirt"),
                file("person", b"me"),
                file("clothing", b"pants"),
                file("clothing2", b"ignored"),
            ],
            &FieldNames::default(),
        )
        .unwrap();

        assert_eq!(upload.subject.data, Bytes::from_static(b"me"));
        assert_eq!(overlay_fields(&upload), vec!["clothing", "clothing"]);
        assert_eq!(upload.overlays[1].data, Bytes::from_static(b"pants"));
    }

    #[test]
    fn test_prefix_fallback() {
        let upload = TryOnUpload::from_files(
            vec![
                file("person", b"me"),
                file("clothing1", b"shirt"),
                file("accessory", b"hat"),
                file("clothing[]", b"pants"),
            ],
            &FieldNames::default(),
        )
        .unwrap();

        assert_eq!(overlay_fields(&upload), vec!["clothing1", "clothing[]"]);
    }

    #[test]
    fn test_all_other_files_fallback() {
        let upload = TryOnUpload::from_files(
            vec![file("top", b"shirt"), file("person", b"me"), file("bottom", b"pants")],
            &FieldNames::default(),
        )
        .unwrap();

        assert_eq!(overlay_fields(&upload), vec!["top", "bottom"]);
    }

    #[test]
    fn test_missing_subject() {
        let err = TryOnUpload::from_files(vec![file("clothing", b"shirt")], &FieldNames::default())
            .unwrap_err();

        assert!(matches!(err, ApiError::BadRequest(ref m) if m == SUBJECT_MISSING_MESSAGE));
    }

    #[test]
    fn test_missing_overlays() {
        let err = TryOnUpload::from_files(
            vec![file("person", b"me"), file("person", b"me again")],
            &FieldNames::default(),
        )
        .unwrap_err();

        assert!(matches!(err, ApiError::BadRequest(ref m) if m == OVERLAY_MISSING_MESSAGE));
    }

    #[test]
    fn test_empty_files_count_as_absent() {
        let err = TryOnUpload::from_files(
            vec![file("person", b""), file("clothing", b"shirt")],
            &FieldNames::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == SUBJECT_MISSING_MESSAGE));

        let err = TryOnUpload::from_files(
            vec![file("person", b"me"), file("clothing", b"")],
            &FieldNames::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == OVERLAY_MISSING_MESSAGE));
    }

    #[test]
    fn test_image_parts_order() {
        let upload = TryOnUpload::from_files(
            vec![file("clothing", b"shirt"), file("person", b"me")],
            &FieldNames::default(),
        )
        .unwrap();

        let parts = upload.image_parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].data, Bytes::from_static(b"me"));
        assert_eq!(parts[1].data, Bytes::from_static(b"shirt"));
    }

    #[test]
    fn test_resolve_content_type() {
        assert_eq!(resolve_content_type(Some("image/png"), None), "image/png");
        assert_eq!(
            resolve_content_type(Some("application/octet-stream"), Some("look.WEBP")),
            "image/webp"
        );
        assert_eq!(resolve_content_type(None, Some("IMG_0001.heic")), "image/heic");
        assert_eq!(resolve_content_type(None, Some("noext")), "image/jpeg");
        assert_eq!(resolve_content_type(None, None), "image/jpeg");
    }
}
