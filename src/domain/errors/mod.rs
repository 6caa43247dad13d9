//! Domain error types.

mod display_error;

pub use display_error::{BoxError, DisplayError, DisplayResult};
