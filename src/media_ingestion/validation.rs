use bytes::Bytes;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("File is empty")]
    Empty,
    #[error("File size exceeds maximum allowed size of {limit} bytes")]
    TooLarge { limit: usize },
    #[error("File type {0:?} not supported. Allowed: JPG, JPEG, PNG")]
    UnsupportedExtension(String),
}

/// Cheap checks before any decoding happens.
pub fn validate_file(file_name: &str, file_data: &Bytes, max_size: usize) -> Result<(), ValidationError> {
    if file_data.is_empty() {
        return Err(ValidationError::Empty);
    }

    if file_data.len() > max_size {
        return Err(ValidationError::TooLarge { limit: max_size });
    }

    let extension = file_extension(file_name);
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ValidationError::UnsupportedExtension(extension));
    }

    Ok(())
}

fn file_extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// MIME type implied by the file name, for logging against what the browser sent.
pub fn expected_mime_type(file_name: &str) -> Option<String> {
    mime_guess::from_path(file_name)
        .first()
        .map(|m| m.essence_str().to_string())
}
