//! Image display pipeline.
//!
//! This module provides:
//! - Codec selection and frame decoding
//! - Cell-based scaling and RGBA encoding
//! - A persistent payload cache and a session placement registry
//! - Kitty graphics protocol command generation
//! - HTTP and file image sources

#[cfg(feature = "avif")]
pub mod avif;
pub mod codec;
pub mod display_manager;
pub mod frame_encoder;
pub mod geometry;
pub mod kitty_commands;
pub mod payload_cache;
pub mod placement_registry;
pub mod source;

pub use codec::{AnimatedFormat, Codec, EncodedImage, decode_image};
pub use display_manager::DisplayManager;
pub use frame_encoder::{EncodedFrame, FrameEncoder};
pub use geometry::{CellSize, ScaledGeometry, scale_to_cell};
pub use kitty_commands::{PLACEHOLDER, delete_all_command, delete_command, placeholder_text};
pub use payload_cache::{PayloadCache, PayloadCacheStats};
pub use placement_registry::{Clock, PlacementRegistry, SystemClock};
pub use source::{FetchError, HttpImageSource, content_type_for_path, file_loader};
