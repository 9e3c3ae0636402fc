pub mod image;

pub use self::image::{DecodeError, EncodeError, EncodedImage, ImageProcessor};
