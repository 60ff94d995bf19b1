//! Shared types for the studio gateway workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
