//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{
    DecodedImage, DecodedImageFrame, DisplayUnit, FetchedImage, ImageId, KittyDisplayUnit,
    PlacedImage, PlacementId,
};
pub use errors::{DisplayError, DisplayResult};
pub use ports::FileSystem;
