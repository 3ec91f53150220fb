//! # Image Values
//!
//! The in-memory image representation handed to completion callbacks, and
//! the serializer seam that converts between that representation and the
//! raw bytes kept in the cache.
//!
//! Decoding correctness is a collaborator concern: the engine treats the
//! image as an opaque payload and routes every conversion through an
//! [`ImageSerializer`], so callers can plug in a real codec without the
//! retrieval pipeline knowing about pixel formats.

use bytes::Bytes;

/// An in-memory image.
///
/// Cheap to clone; the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    data: Bytes,
    content_type: Option<String>,
}

impl Image {
    /// Wrap raw bytes together with the content type they were served as.
    pub fn new(data: Bytes, content_type: Option<String>) -> Self {
        Self { data, content_type }
    }

    /// Wrap raw bytes as an image with no declared content type.
    pub fn from_bytes(data: Bytes) -> Self {
        Self::new(data, None)
    }

    /// The image payload.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    /// The content type the image was served or stored with, if known.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Conversion seam between cached bytes and [`Image`] values.
///
/// Both directions are fallible: a serializer backed by a real codec can
/// reject bytes it cannot decode, and the cache treats that as a miss
/// rather than surfacing a corrupt entry.
pub trait ImageSerializer: Send + Sync {
    /// Turn an image back into the bytes persisted on disk.
    fn encode(&self, image: &Image) -> Option<Bytes>;

    /// Build an image from raw bytes.
    fn decode(&self, data: &Bytes, content_type: Option<&str>) -> Option<Image>;
}

/// The default serializer: the raw bytes ARE the image representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSerializer;

impl ImageSerializer for PassthroughSerializer {
    fn encode(&self, image: &Image) -> Option<Bytes> {
        Some(image.as_bytes().clone())
    }

    fn decode(&self, data: &Bytes, content_type: Option<&str>) -> Option<Image> {
        Some(Image::new(data.clone(), content_type.map(str::to_owned)))
    }
}
