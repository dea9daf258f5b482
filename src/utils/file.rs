use image::ImageFormat;

use crate::errors::{AppError, Result};

pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Constraints a selected file must satisfy before it becomes a job.
#[derive(Debug, Clone)]
pub struct FileRules {
    pub max_file_size: usize,
    pub allowed_mime_types: Vec<String>,
}

impl Default for FileRules {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FileRules {
    /// Checks declared type, size and content, returning the sniffed format.
    /// Content must be of the declared type when that type names a known format.
    pub fn validate(&self, media_type: &str, data: &[u8]) -> Result<ImageFormat> {
        let declared = validate_mime_type(media_type, &self.allowed_mime_types)?;
        validate_size(data.len(), self.max_file_size)?;
        let sniffed = sniff_image_format(data)?;

        match declared_format(declared.essence_str()) {
            Some(expected) if expected != sniffed => Err(AppError::InvalidFile(format!(
                "file content is {:?} but was declared as '{}'",
                sniffed,
                declared.essence_str()
            ))),
            _ => Ok(sniffed),
        }
    }
}

/// Format a media type promises, for the types we know how to sniff.
pub fn declared_format(essence: &str) -> Option<ImageFormat> {
    match essence.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
        "image/png" => Some(ImageFormat::Png),
        "image/webp" => Some(ImageFormat::WebP),
        "image/gif" => Some(ImageFormat::Gif),
        "image/bmp" => Some(ImageFormat::Bmp),
        "image/tiff" => Some(ImageFormat::Tiff),
        _ => None,
    }
}

pub fn validate_mime_type(mime_type: &str, allowed_types: &[String]) -> Result<mime::Mime> {
    let parsed: mime::Mime = mime_type
        .parse()
        .map_err(|_| AppError::InvalidFile(format!("unrecognized media type '{}'", mime_type)))?;

    if parsed.type_() != mime::IMAGE {
        return Err(AppError::InvalidFile(format!(
            "only image files are accepted, got '{}'",
            mime_type
        )));
    }

    let essence = parsed.essence_str();
    if !allowed_types.iter().any(|allowed| allowed.eq_ignore_ascii_case(essence)) {
        return Err(AppError::InvalidFile(format!("image type '{}' is not supported", essence)));
    }

    Ok(parsed)
}

pub fn validate_size(size: usize, max_size: usize) -> Result<()> {
    if size == 0 {
        return Err(AppError::InvalidFile("file is empty".to_string()));
    }
    if size > max_size {
        return Err(AppError::InvalidFile(format!(
            "file size {} bytes exceeds limit of {} bytes",
            size, max_size
        )));
    }
    Ok(())
}

pub fn sniff_image_format(data: &[u8]) -> Result<ImageFormat> {
    image::guess_format(data)
        .map_err(|_| AppError::InvalidFile("file content is not a recognized image".to_string()))
}

/// Media type for uploads that arrive without a declared content type.
pub fn guess_media_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub fn get_file_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}
