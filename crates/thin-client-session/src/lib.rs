//! Connection lifecycle for the thin client.
//!
//! Provides:
//! - `IdentitySource` - access tokens with bounded retry
//! - `AssignmentFetcher` - engine assignment (HTTP assigner or config override)
//! - `ClientNetworkComponents` - the network context owning the transport
//! - `ConnectionStatus` - observable connected/disconnected state
//! - `ConnectionSession` - the orchestrator tying them together

pub mod assignment;
pub mod config;
pub mod identity;
pub mod network;
pub mod session;
pub mod status;

pub use assignment::{
    AssignerClient, Assignment, AssignmentFetcher, AssignmentOutcome, AssignmentResult,
    HttpAssignerClient, InvalidAssignment,
};
pub use config::{ConfigError, EngineOverride, SessionConfig};
pub use identity::{
    CredentialBackend, IdentityEvent, IdentitySource, SubscriptionId, TokenError, TokenResponse,
};
pub use network::{ClientNetworkComponents, NetworkEvent, NetworkHandle};
pub use session::{ConnectionSession, SessionEvent, SessionParts};
pub use status::{ConnectionEvent, ConnectionStatus};
