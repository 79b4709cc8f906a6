//! AT Protocol types and the remote entity service for Skyline.
//!
//! ## Features
//!
//! - **Types**: posts, profiles, feed pages and feed descriptors as the app
//!   view returns them
//! - **Service**: the [`EntityService`] boundary the client core talks to
//! - **HTTP Client**: [`XrpcClient`], an XRPC implementation of that boundary
//! - **Lifetimes**: cancellation signals tied to an owner's lifetime

mod client;
mod error;
pub mod lifetime;
mod service;
mod types;
mod uri;

pub use client::XrpcClient;
pub use error::{AtprotoError, ServiceError};
pub use lifetime::{CancelSignal, Lifetime};
pub use service::EntityService;
pub use types::*;
pub use uri::{AtUri, AtUriError};
