//! Domain entities.

mod image;

pub use self::image::{
    DecodedImage, DecodedImageFrame, DisplayUnit, FetchedImage, ImageId, KittyDisplayUnit, Loader,
    PlacedImage, PlacementId,
};
