//! Disk-based payload cache for persistence across sessions.
//!
//! Layout under `<base>/<directory>/`:
//! - `<id>.<offset>`: zlib compressed RGBA payload of one frame
//! - `<id>.json`: sidecar with column span and frame metadata, written last

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tracing::{debug, trace, warn};

use crate::domain::entities::{DecodedImage, DecodedImageFrame, ImageId};
use crate::domain::errors::{DisplayError, DisplayResult};
use crate::domain::ports::FileSystem;

use super::codec::EncodedImage;

/// Size summary of one cache directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadCacheStats {
    /// Total bytes on disk.
    pub size_bytes: u64,
    /// Number of cached images (sidecar files).
    pub images: usize,
    /// Number of frame payload files.
    pub frames: usize,
}

impl std::fmt::Display for PayloadCacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} images, {} frames, {} bytes",
            self.images, self.frames, self.size_bytes
        )
    }
}

/// Persistent store of encoded frame payloads and their metadata.
pub struct PayloadCache {
    fs: Arc<dyn FileSystem>,
    base_dir: PathBuf,
}

impl std::fmt::Debug for PayloadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCache")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

/// Makes a logical id safe to use as a single file name component.
#[must_use]
pub fn sanitize_id(id: &ImageId) -> String {
    let cleaned: String = id
        .as_str()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

impl PayloadCache {
    /// Creates a cache rooted at `base_dir`.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            base_dir: base_dir.into(),
        }
    }

    /// Returns the base directory all cache directories live under.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the path of a cache directory.
    #[must_use]
    pub fn directory(&self, directory: &str) -> PathBuf {
        self.base_dir.join(directory)
    }

    /// Returns the payload path of one frame.
    #[must_use]
    pub fn frame_path(&self, directory: &str, id: &ImageId, offset: usize) -> PathBuf {
        self.directory(directory)
            .join(format!("{}.{offset}", sanitize_id(id)))
    }

    /// Returns the sidecar metadata path.
    #[must_use]
    pub fn sidecar_path(&self, directory: &str, id: &ImageId) -> PathBuf {
        self.directory(directory)
            .join(format!("{}.json", sanitize_id(id)))
    }

    fn ensure_directory(&self, directory: &str) -> DisplayResult<PathBuf> {
        let path = self.directory(directory);
        match self.fs.create_dir_all(&path) {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(path),
            Err(e) => Err(DisplayError::cache_io(path, e)),
        }
    }

    /// Compresses and stores one frame payload, returning its path.
    ///
    /// # Errors
    /// Returns `CacheIoFailure` if the directory or file cannot be written.
    pub fn write_frame(
        &self,
        directory: &str,
        id: &ImageId,
        offset: usize,
        payload: &[u8],
    ) -> DisplayResult<PathBuf> {
        self.ensure_directory(directory)?;
        let path = self.frame_path(directory, id, offset);

        let compressed = compress(payload).map_err(|e| DisplayError::cache_io(&path, e))?;
        self.fs
            .write(&path, &compressed)
            .map_err(|e| DisplayError::cache_io(&path, e))?;

        trace!(id = %id, path = %path.display(), size = compressed.len(), "Stored frame payload");
        Ok(path)
    }

    /// Reads and decompresses one frame payload.
    ///
    /// # Errors
    /// Returns `CacheIoFailure` if the file is missing or not valid zlib data.
    pub fn read_frame(&self, directory: &str, id: &ImageId, offset: usize) -> DisplayResult<Vec<u8>> {
        let path = self.frame_path(directory, id, offset);
        let compressed = self
            .fs
            .read(&path)
            .map_err(|e| DisplayError::cache_io(&path, e))?;

        let mut payload = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut payload)
            .map_err(|e| DisplayError::cache_io(&path, e))?;
        Ok(payload)
    }

    /// Stores every frame payload of an encoded image and returns the metadata
    /// describing them. The sidecar is not written.
    ///
    /// # Errors
    /// Returns `CacheIoFailure` on the first frame that cannot be stored.
    pub fn write_frames(
        &self,
        directory: &str,
        id: &ImageId,
        encoded: &EncodedImage,
    ) -> DisplayResult<DecodedImage> {
        let frames = encoded
            .frames
            .iter()
            .enumerate()
            .map(|(offset, timed)| {
                let path = self.write_frame(directory, id, offset, &timed.frame.payload)?;
                Ok(DecodedImageFrame {
                    width_px: timed.frame.width,
                    height_px: timed.frame.height,
                    payload_ref: encode_payload_ref(&path),
                    delay_ms: timed.delay_ms,
                })
            })
            .collect::<DisplayResult<Vec<_>>>()?;

        Ok(DecodedImage {
            column_span: encoded.column_span,
            frames,
        })
    }

    /// Writes the sidecar metadata file.
    ///
    /// # Errors
    /// Returns `CacheIoFailure` if serialization or the write fails.
    pub fn write_metadata(
        &self,
        directory: &str,
        id: &ImageId,
        image: &DecodedImage,
    ) -> DisplayResult<()> {
        self.ensure_directory(directory)?;
        let path = self.sidecar_path(directory, id);

        let encoded = serde_json::to_vec(image)
            .map_err(|e| DisplayError::cache_io(&path, io::Error::from(e)))?;
        self.fs
            .write(&path, &encoded)
            .map_err(|e| DisplayError::cache_io(&path, e))?;

        debug!(id = %id, path = %path.display(), frames = image.frames.len(), "Stored image metadata");
        Ok(())
    }

    /// Looks up a persisted image.
    ///
    /// Returns `Ok(None)` when the sidecar is missing, malformed, lists no
    /// frames or refers to frame payloads that no longer exist. Payload refs
    /// always point at the frame files under this cache's base directory.
    ///
    /// # Errors
    /// Returns `CacheIoFailure` when the sidecar exists but cannot be read.
    pub fn open(&self, directory: &str, id: &ImageId) -> DisplayResult<Option<DecodedImage>> {
        let path = self.sidecar_path(directory, id);

        let data = match self.fs.read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(id = %id, "Payload cache miss");
                return Ok(None);
            }
            Err(e) => return Err(DisplayError::cache_io(path, e)),
        };

        let mut image: DecodedImage = match serde_json::from_slice(&data) {
            Ok(image) => image,
            Err(e) => {
                warn!(id = %id, path = %path.display(), error = %e, "Malformed image metadata, ignoring");
                return Ok(None);
            }
        };

        if image.frames.is_empty() {
            warn!(id = %id, path = %path.display(), "Image metadata lists no frames, ignoring");
            return Ok(None);
        }

        // Stored refs may name another base directory; rebuild them from
        // the frame files that actually exist here.
        for (offset, frame) in image.frames.iter_mut().enumerate() {
            let frame_path = self.frame_path(directory, id, offset);
            if !self.fs.exists(&frame_path) {
                warn!(id = %id, path = %frame_path.display(), "Frame payload missing, ignoring metadata");
                return Ok(None);
            }
            frame.payload_ref = encode_payload_ref(&frame_path);
        }

        trace!(id = %id, frames = image.frames.len(), "Payload cache hit");
        Ok(Some(image))
    }

    /// Summarizes a cache directory. A missing directory is empty.
    ///
    /// # Errors
    /// Returns `CacheIoFailure` if the directory cannot be listed.
    pub fn stats(&self, directory: &str) -> DisplayResult<PayloadCacheStats> {
        let path = self.directory(directory);
        let entries = match self.fs.read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(PayloadCacheStats::default());
            }
            Err(e) => return Err(DisplayError::cache_io(path, e)),
        };

        let mut stats = PayloadCacheStats::default();
        for entry in entries {
            if entry.path.extension().is_some_and(|ext| ext == "json") {
                stats.images += 1;
            } else {
                stats.frames += 1;
            }
            stats.size_bytes += entry.len;
        }
        Ok(stats)
    }

    /// Deletes a cache directory and everything in it. A missing directory is
    /// not an error.
    ///
    /// # Errors
    /// Returns `CacheIoFailure` if the directory cannot be removed.
    pub fn clear(&self, directory: &str) -> DisplayResult<()> {
        let path = self.directory(directory);
        match self.fs.remove_dir_all(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Cleared payload cache directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DisplayError::cache_io(path, e)),
        }
    }
}

fn compress(payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

/// Encodes a payload path the way the graphics protocol expects file
/// references: base64 of the path bytes.
#[must_use]
pub fn encode_payload_ref(path: &Path) -> String {
    STANDARD.encode(path.to_string_lossy().as_bytes())
}
