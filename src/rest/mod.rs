//! REST API clients

pub mod helix;

pub use helix::{HelixClient, HelixError};
