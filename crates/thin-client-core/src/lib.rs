//! Core protocol plumbing for the thin remote-display client.
//!
//! This crate provides the fundamental building blocks:
//! - `Envelope` - Feature-tagged unit of client/engine traffic
//! - `FeatureRouter` - Per-feature dispatcher multiplexed by tab id
//! - `FeatureRouters` - The per-session set of concrete routers
//! - `relay` - Cross-context message posting with liveness checks

pub mod envelope;
pub mod error;
pub mod features;
pub mod relay;
pub mod router;

pub use envelope::{Envelope, FeatureTag, PROTOCOL_VERSION, Payload, SurfaceId, TabId};
pub use error::{ProtocolViolation, RouterError};
pub use features::FeatureRouters;
pub use relay::{RelayReceiver, RelaySender, relay};
pub use router::{Feature, FeatureRouter, OutboundSink};
