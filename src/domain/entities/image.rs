//! Domain types for decoded images and display units.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::domain::errors::BoxError;

/// Identifier the terminal graphics protocol uses for both the transmitted
/// image data and its virtual placement.
pub type PlacementId = i32;

/// Caller-assigned stable identifier for one displayable image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(pub String);

impl ImageId {
    /// Creates a new `ImageId` from any string-like input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates an `ImageId` from a URL by hashing it.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let result = hasher.finalize();
        Self(hex::encode(&result[..16]))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ImageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ImageId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// One raster frame, encoded and stored in the payload cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedImageFrame {
    /// Transmitted pixel width.
    #[serde(rename = "width")]
    pub width_px: u32,
    /// Transmitted pixel height.
    #[serde(rename = "height")]
    pub height_px: u32,
    /// Base64 encoded path of the compressed RGBA payload.
    #[serde(rename = "encoded_path")]
    pub payload_ref: String,
    /// Delay before the next frame, `0` for static images.
    #[serde(rename = "delay_in_ms")]
    pub delay_ms: u32,
}

/// A fully decoded logical image, as persisted in the sidecar file.
///
/// Holds no placement id: ids live only in the session registry, see
/// [`PlacedImage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedImage {
    /// Terminal columns the image occupies, derived from frame 0.
    #[serde(rename = "cols")]
    pub column_span: u32,
    /// Frames in display order.
    #[serde(rename = "images")]
    pub frames: Vec<DecodedImageFrame>,
}

impl DecodedImage {
    /// Returns true if the image has more than one frame.
    #[must_use]
    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }
}

/// A decoded image that has been assigned a placement in this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedImage {
    /// Session-unique placement id.
    pub placement_id: PlacementId,
    /// The placed image.
    pub image: DecodedImage,
}

/// Bytes handed back by a [`Loader`].
pub struct FetchedImage {
    /// Encoded image bytes.
    pub body: Box<dyn Read + Send>,
    /// Declared MIME content type, e.g. `image/gif`.
    pub content_type: String,
}

impl FetchedImage {
    /// Wraps an in-memory buffer.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            body: Box::new(std::io::Cursor::new(bytes.into())),
            content_type: content_type.into(),
        }
    }
}

impl std::fmt::Debug for FetchedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedImage")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Lazy byte source, invoked only on a full cache miss.
pub type Loader = Box<dyn FnOnce() -> Result<FetchedImage, BoxError> + Send>;

/// Request to display one logical image.
pub struct DisplayUnit {
    /// Logical image id.
    pub id: ImageId,
    /// Cache sub-directory under the base directory (e.g. `emote`, `badge`).
    pub directory: String,
    /// Whether the caller expects an animation.
    pub is_animated: bool,
    /// Transparent pixels appended to the right of every frame.
    pub right_padding: u32,
    /// Byte source for the cold path.
    pub loader: Loader,
}

impl DisplayUnit {
    /// Creates a static display unit.
    pub fn new<F>(id: impl Into<ImageId>, directory: impl Into<String>, loader: F) -> Self
    where
        F: FnOnce() -> Result<FetchedImage, BoxError> + Send + 'static,
    {
        Self {
            id: id.into(),
            directory: directory.into(),
            is_animated: false,
            right_padding: 0,
            loader: Box::new(loader),
        }
    }

    /// Marks the unit as animated.
    #[must_use]
    pub fn animated(mut self, is_animated: bool) -> Self {
        self.is_animated = is_animated;
        self
    }

    /// Sets the right padding in pixels.
    #[must_use]
    pub fn with_right_padding(mut self, padding: u32) -> Self {
        self.right_padding = padding;
        self
    }
}

impl std::fmt::Debug for DisplayUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayUnit")
            .field("id", &self.id)
            .field("directory", &self.directory)
            .field("is_animated", &self.is_animated)
            .field("right_padding", &self.right_padding)
            .finish_non_exhaustive()
    }
}

/// Output of a conversion: protocol setup bytes plus the placeholder text.
#[derive(Debug, Default)]
pub struct KittyDisplayUnit {
    /// Transmit/animate/placement commands. Empty when the image was already
    /// placed earlier in this session.
    pub setup_command: String,
    /// Unicode placeholder text standing in for the image.
    pub replacement_text: String,
    /// Set when the image was decoded and placed but its metadata sidecar
    /// could not be persisted.
    pub persist_warning: Option<crate::domain::errors::DisplayError>,
}

impl KittyDisplayUnit {
    /// Returns true if the unit carries commands the terminal has not seen yet.
    #[must_use]
    pub fn needs_setup(&self) -> bool {
        !self.setup_command.is_empty()
    }
}
