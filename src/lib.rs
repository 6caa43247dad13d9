//! kittyimg - inline images for kitty-compatible terminals.
//!
//! This crate decodes static and animated images, scales them to the terminal
//! cell grid, caches the encoded payloads on disk and emits kitty graphics
//! protocol commands together with the Unicode placeholder text that shows
//! them.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing the image pipeline and adapters.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "kittyimg";
