use bytes::Bytes;
use image::{DynamicImage, ImageFormat, ImageReader, imageops::FilterType};
use std::io::Cursor;

pub const PNG_MIME_TYPE: &str = "image/png";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("file is not a recognizable image")]
    UnknownFormat,
    #[error("image format {0:?} is not supported; upload a JPEG or PNG")]
    UnsupportedFormat(ImageFormat),
    #[error("image could not be decoded: {0}")]
    Malformed(#[source] image::ImageError),
}

#[derive(Debug, thiserror::Error)]
#[error("failed to encode image as PNG: {0}")]
pub struct EncodeError(#[from] image::ImageError);

/// A user upload that decoded successfully.
pub struct UploadedImage {
    raw: Bytes,
    bitmap: DynamicImage,
    format: ImageFormat,
}

impl UploadedImage {
    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn byte_len(&self) -> usize {
        self.raw.len()
    }
}

/// PNG transport buffer built from an [`UploadedImage`].
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
    pub original_format: ImageFormat,
    pub downscaled: bool,
}

impl EncodedImage {
    pub fn mime_type(&self) -> &'static str {
        PNG_MIME_TYPE
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageProcessor {
    max_dimension: u32,
}

impl ImageProcessor {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Sniffs the format from the content and decodes it. Only JPEG and PNG
    /// are accepted, whatever the file name claims.
    pub fn decode(&self, data: Bytes) -> Result<UploadedImage, DecodeError> {
        let reader = ImageReader::new(Cursor::new(&data))
            .with_guessed_format()
            .map_err(|e| DecodeError::Malformed(image::ImageError::IoError(e)))?;

        let format = reader.format().ok_or(DecodeError::UnknownFormat)?;
        if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
            return Err(DecodeError::UnsupportedFormat(format));
        }

        let bitmap = reader.decode().map_err(DecodeError::Malformed)?;

        Ok(UploadedImage {
            raw: data,
            bitmap,
            format,
        })
    }

    /// Re-encodes as PNG, downscaling first when either side exceeds the
    /// configured maximum. Consumes the upload so its buffers are released.
    pub fn encode(&self, image: UploadedImage) -> Result<EncodedImage, EncodeError> {
        let UploadedImage { raw, bitmap, format } = image;
        drop(raw);

        let downscaled = bitmap.width() > self.max_dimension || bitmap.height() > self.max_dimension;
        let bitmap = if downscaled {
            let resized = bitmap.resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3);
            tracing::info!(
                "Downscaled upload from {}x{} to {}x{}",
                bitmap.width(),
                bitmap.height(),
                resized.width(),
                resized.height()
            );
            resized
        } else {
            bitmap
        };

        let mut buf = Vec::new();
        bitmap.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;

        Ok(EncodedImage {
            bytes: Bytes::from(buf),
            width: bitmap.width(),
            height: bitmap.height(),
            original_format: format,
            downscaled,
        })
    }
}

pub fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        _ => "other",
    }
}
