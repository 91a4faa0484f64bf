//! # scout-core
//!
//! Foundation types and utilities shared by the Scout realtime crates.
//!
//! - **Errors**: [`errors::TransportError`] for the streaming transport
//! - **Retry**: [`retry::ReconnectPolicy`] and exponential backoff math
//! - **Text**: [`text::truncate_str`] for UTF-8 safe log previews
//! - **Logging**: [`logging::init_subscriber_with_format`] and test log capture
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other scout crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod logging;
pub mod retry;
pub mod text;
