//! Router and protocol-consistency errors.

use thiserror::Error;

use crate::envelope::{FeatureTag, SurfaceId, TabId};

/// Errors returned to local callers of a feature router.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("Tab {tab_id} already has a {feature} delegate")]
    DuplicateDelegate { feature: &'static str, tab_id: TabId },
    #[error("The {feature} router cannot send {tag:?} payloads")]
    ForeignPayload { feature: &'static str, tag: FeatureTag },
}

/// A breach of the client/engine protocol.
///
/// These are not recoverable: the surface map can no longer be trusted, so
/// the owner of the session is expected to tear the connection down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("No {feature} delegate registered for tab {tab_id}")]
    NoDelegate { feature: &'static str, tab_id: TabId },
    #[error("The {feature} delegate for tab {tab_id} was destroyed without unregistering")]
    DelegateDestroyed { feature: &'static str, tab_id: TabId },
    #[error("No router handles {tag:?} envelopes")]
    UnroutedFeature { tag: FeatureTag },
    #[error("Unexpected inbound {tag:?} envelope for tab {tab_id}")]
    UnexpectedInbound { tag: FeatureTag, tab_id: TabId },
    #[error("Surface {surface_id} already exists in tab {tab_id}")]
    DuplicateSurface { tab_id: TabId, surface_id: SurfaceId },
    #[error("Surface {surface_id} does not exist in tab {tab_id}")]
    UnknownSurface { tab_id: TabId, surface_id: SurfaceId },
}
