//! Feature-tagged envelopes exchanged with the remote engine.

use serde::{Deserialize, Serialize};

use crate::features::{
    navigation::NavigationMessage,
    render_surface::{CompositorMessage, InputMessage, LifecycleNotice},
    tab_control::TabControlMessage,
};

/// Envelope protocol version spoken by this client, the default for `StartConnection`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Identifier of a tab, allocated by the client.
pub type TabId = i32;

/// Identifier of a render surface, allocated by the engine and unique per tab.
pub type SurfaceId = i32;

/// Feature a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureTag {
    ProtocolControl,
    TabControl,
    Navigation,
    RenderSurfaceLifecycle,
    RenderSurfaceInput,
    RenderSurfaceCompositor,
}

/// Connection-level control traffic, handled on the network context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolControlMessage {
    /// First envelope on a new connection; authenticates the client.
    StartConnection {
        client_token: String,
        protocol_version: u32,
    },
    /// Engine-initiated clean shutdown.
    EndConnection { reason: u16 },
}

/// Feature-specific envelope body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "feature", content = "message", rename_all = "snake_case")]
pub enum Payload {
    ProtocolControl(ProtocolControlMessage),
    TabControl(TabControlMessage),
    Navigation(NavigationMessage),
    RenderSurfaceLifecycle(LifecycleNotice),
    RenderSurfaceInput(InputMessage),
    RenderSurfaceCompositor(CompositorMessage),
}

impl Payload {
    /// The feature this payload is addressed to.
    #[must_use]
    pub const fn feature_tag(&self) -> FeatureTag {
        match self {
            Self::ProtocolControl(_) => FeatureTag::ProtocolControl,
            Self::TabControl(_) => FeatureTag::TabControl,
            Self::Navigation(_) => FeatureTag::Navigation,
            Self::RenderSurfaceLifecycle(_) => FeatureTag::RenderSurfaceLifecycle,
            Self::RenderSurfaceInput(_) => FeatureTag::RenderSurfaceInput,
            Self::RenderSurfaceCompositor(_) => FeatureTag::RenderSurfaceCompositor,
        }
    }
}

/// Typed unit of client/engine traffic.
///
/// The feature tag is derived from the payload so the two can never
/// disagree. Envelopes are immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    target_tab_id: TabId,
    payload: Payload,
}

impl Envelope {
    /// Create an envelope addressed to a tab.
    #[must_use]
    pub const fn new(target_tab_id: TabId, payload: Payload) -> Self {
        Self {
            target_tab_id,
            payload,
        }
    }

    /// Create a connection-level control envelope (not addressed to a tab).
    #[must_use]
    pub const fn protocol_control(message: ProtocolControlMessage) -> Self {
        Self::new(0, Payload::ProtocolControl(message))
    }

    #[must_use]
    pub const fn feature_tag(&self) -> FeatureTag {
        self.payload.feature_tag()
    }

    #[must_use]
    pub const fn target_tab_id(&self) -> TabId {
        self.target_tab_id
    }

    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume the envelope, yielding its payload.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

/// Serde adapter carrying opaque byte blobs as base64 strings.
pub mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::features::render_surface::LifecycleKind;

    #[test]
    fn test_feature_tag_follows_payload() {
        let env = Envelope::new(
            3,
            Payload::RenderSurfaceLifecycle(LifecycleNotice {
                surface_id: 7,
                kind: LifecycleKind::Created,
            }),
        );
        assert_eq!(env.feature_tag(), FeatureTag::RenderSurfaceLifecycle);
        assert_eq!(env.target_tab_id(), 3);
    }

    #[test]
    fn test_compositor_bytes_serialize_as_base64() {
        let env = Envelope::new(
            1,
            Payload::RenderSurfaceCompositor(CompositorMessage {
                surface_id: 2,
                bytes: Bytes::from_static(b"frame"),
            }),
        );
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("render_surface_compositor"));
        assert!(json.contains("ZnJhbWU="));

        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_protocol_control_targets_no_tab() {
        let env = Envelope::protocol_control(ProtocolControlMessage::EndConnection { reason: 4 });
        assert_eq!(env.feature_tag(), FeatureTag::ProtocolControl);
        assert_eq!(env.target_tab_id(), 0);
    }
}
