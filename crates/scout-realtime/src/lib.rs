//! # scout-realtime
//!
//! Real-time event stream for the Scout client.
//!
//! - **SSE**: [`sse::parse_sse_frames`] turns a response body into frames
//! - **Transport**: [`transport::Transport`] seam with the `reqwest`-backed
//!   [`transport::HttpTransport`]
//! - **Registry**: [`registry::SubscriptionRegistry`] fans payloads out by
//!   event type
//! - **Client**: [`client::EventStreamClient`] owns the connection and its
//!   exponential-backoff reconnect loop
//! - **Supervisor**: [`supervisor::ConnectionSupervisor`] starts, stops and
//!   resumes the client from session and reachability signals
//!
//! ## Crate Position
//!
//! Depends on `scout-core` and `scout-settings`. Depended on by `scout-cli`.

#![deny(unsafe_code)]

pub mod client;
pub mod credentials;
pub mod reachability;
pub mod registry;
pub mod sse;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use client::{ClientConfig, ConnectionState, EventStreamClient};
pub use credentials::{CredentialProvider, SessionStore};
pub use reachability::ReachabilityProbe;
pub use registry::{StreamSubscriber, Subscription, SubscriptionRegistry};
pub use sse::{DEFAULT_EVENT_TYPE, Frame};
pub use supervisor::{ConnectionSupervisor, SupervisorState};
pub use transport::{FrameStream, HttpTransport, Transport, build_stream_url};
