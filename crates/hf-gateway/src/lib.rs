//! hf-gateway: client side of the remote simulation gateway.
//!
//! The gateway is the external service that runs farm epidemic simulations
//! and renders their per-step images. This crate provides:
//! - the [`Gateway`] contract consumed by the run and playback controllers
//! - wire types for its JSON and server-sent-event payloads
//! - [`HttpGateway`], the reqwest-based implementation

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod types;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{AnimationFeed, BatchStream, Gateway};
pub use http::HttpGateway;
pub use types::*;
