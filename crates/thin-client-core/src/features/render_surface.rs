//! Render-surface lifecycle, compositor and input traffic.
//!
//! One router serves all three render-surface tags. Lifecycle notices and
//! compositor payloads flow in; gesture events and compositor payloads flow
//! out. The per-tab delegate demultiplexes further by surface id.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    envelope::{Envelope, FeatureTag, Payload, SurfaceId, TabId},
    error::ProtocolViolation,
    router::{Feature, FeatureRouter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Created,
    Initialized,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleNotice {
    pub surface_id: SurfaceId,
    pub kind: LifecycleKind,
}

/// Opaque compositor update for one surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositorMessage {
    pub surface_id: SurfaceId,
    #[serde(with = "crate::envelope::base64_bytes")]
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GestureKind {
    TapDown,
    Tap,
    LongPress,
    ScrollBegin,
    ScrollUpdate { dx: f32, dy: f32 },
    ScrollEnd,
    FlingStart { velocity_x: f32, velocity_y: f32 },
    FlingCancel,
    PinchBegin,
    PinchUpdate { scale: f32 },
    PinchEnd,
}

/// A gesture recognised by the platform, in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GestureEvent {
    pub kind: GestureKind,
    pub x: f32,
    pub y: f32,
    pub timestamp_ms: u64,
}

/// Gesture forwarded to the engine for one surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    pub surface_id: SurfaceId,
    pub gesture: GestureEvent,
}

/// Per-tab receiver of render-surface traffic.
pub trait RenderSurfaceDelegate {
    /// # Errors
    /// Returns a violation if the surface already exists.
    fn on_surface_created(&mut self, surface_id: SurfaceId) -> Result<(), ProtocolViolation>;

    /// # Errors
    /// Returns a violation if the surface does not exist.
    fn on_surface_initialized(&mut self, surface_id: SurfaceId) -> Result<(), ProtocolViolation>;

    /// # Errors
    /// Returns a violation if the surface does not exist.
    fn on_surface_deleted(&mut self, surface_id: SurfaceId) -> Result<(), ProtocolViolation>;

    /// Deliver an opaque compositor payload. Unknown surfaces are dropped.
    fn on_compositor_message(&mut self, surface_id: SurfaceId, bytes: Bytes);
}

/// The render-surface feature.
pub struct RenderSurface;

impl Feature for RenderSurface {
    type Delegate = dyn RenderSurfaceDelegate;

    const NAME: &'static str = "render_surface";
    const REQUIRES_DELEGATE: bool = true;

    fn handles(tag: FeatureTag) -> bool {
        matches!(
            tag,
            FeatureTag::RenderSurfaceLifecycle
                | FeatureTag::RenderSurfaceInput
                | FeatureTag::RenderSurfaceCompositor
        )
    }

    fn validate_inbound(envelope: &Envelope) -> Result<(), ProtocolViolation> {
        match envelope.feature_tag() {
            FeatureTag::RenderSurfaceInput => Err(ProtocolViolation::UnexpectedInbound {
                tag: FeatureTag::RenderSurfaceInput,
                tab_id: envelope.target_tab_id(),
            }),
            _ => Ok(()),
        }
    }

    fn dispatch(
        delegate: &mut Self::Delegate,
        tab_id: TabId,
        payload: Payload,
    ) -> Result<(), ProtocolViolation> {
        match payload {
            Payload::RenderSurfaceLifecycle(LifecycleNotice { surface_id, kind }) => match kind {
                LifecycleKind::Created => delegate.on_surface_created(surface_id),
                LifecycleKind::Initialized => delegate.on_surface_initialized(surface_id),
                LifecycleKind::Deleted => delegate.on_surface_deleted(surface_id),
            },
            Payload::RenderSurfaceCompositor(CompositorMessage { surface_id, bytes }) => {
                delegate.on_compositor_message(surface_id, bytes);
                Ok(())
            }
            other => Err(ProtocolViolation::UnexpectedInbound {
                tag: other.feature_tag(),
                tab_id,
            }),
        }
    }
}

pub type RenderSurfaceRouter = FeatureRouter<RenderSurface>;

impl FeatureRouter<RenderSurface> {
    pub fn send_compositor_message(&self, tab_id: TabId, surface_id: SurfaceId, bytes: Bytes) {
        self.post(
            tab_id,
            Payload::RenderSurfaceCompositor(CompositorMessage { surface_id, bytes }),
        );
    }

    pub fn send_gesture_event(&self, tab_id: TabId, surface_id: SurfaceId, gesture: GestureEvent) {
        self.post(
            tab_id,
            Payload::RenderSurfaceInput(InputMessage {
                surface_id,
                gesture,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::router::tests::RecordingSink;

    #[derive(Default)]
    struct Recorded {
        lifecycle: Vec<(SurfaceId, LifecycleKind)>,
        compositor: Vec<(SurfaceId, Bytes)>,
    }

    impl RenderSurfaceDelegate for Recorded {
        fn on_surface_created(&mut self, surface_id: SurfaceId) -> Result<(), ProtocolViolation> {
            self.lifecycle.push((surface_id, LifecycleKind::Created));
            Ok(())
        }

        fn on_surface_initialized(
            &mut self,
            surface_id: SurfaceId,
        ) -> Result<(), ProtocolViolation> {
            self.lifecycle.push((surface_id, LifecycleKind::Initialized));
            Ok(())
        }

        fn on_surface_deleted(&mut self, surface_id: SurfaceId) -> Result<(), ProtocolViolation> {
            self.lifecycle.push((surface_id, LifecycleKind::Deleted));
            Ok(())
        }

        fn on_compositor_message(&mut self, surface_id: SurfaceId, bytes: Bytes) {
            self.compositor.push((surface_id, bytes));
        }
    }

    fn lifecycle(tab_id: TabId, surface_id: SurfaceId, kind: LifecycleKind) -> Envelope {
        Envelope::new(
            tab_id,
            Payload::RenderSurfaceLifecycle(LifecycleNotice { surface_id, kind }),
        )
    }

    #[test]
    fn test_envelopes_for_one_tab_keep_arrival_order() {
        let router = RenderSurfaceRouter::new(Rc::new(RecordingSink::default()));
        let delegate = Rc::new(RefCell::new(Recorded::default()));
        router.register(1, delegate.clone()).unwrap();

        router.receive(lifecycle(1, 7, LifecycleKind::Created)).unwrap();
        router
            .receive(lifecycle(1, 7, LifecycleKind::Initialized))
            .unwrap();
        router
            .receive(Envelope::new(
                1,
                Payload::RenderSurfaceCompositor(CompositorMessage {
                    surface_id: 7,
                    bytes: Bytes::from_static(b"\x01\x02"),
                }),
            ))
            .unwrap();
        router.receive(lifecycle(1, 7, LifecycleKind::Deleted)).unwrap();

        let delegate = delegate.borrow();
        assert_eq!(
            delegate.lifecycle,
            vec![
                (7, LifecycleKind::Created),
                (7, LifecycleKind::Initialized),
                (7, LifecycleKind::Deleted),
            ]
        );
        assert_eq!(delegate.compositor, vec![(7, Bytes::from_static(b"\x01\x02"))]);
    }

    #[test]
    fn test_inbound_input_is_violation() {
        let router = RenderSurfaceRouter::new(Rc::new(RecordingSink::default()));
        router
            .register(1, Rc::new(RefCell::new(Recorded::default())))
            .unwrap();

        let gesture = GestureEvent {
            kind: GestureKind::Tap,
            x: 1.0,
            y: 2.0,
            timestamp_ms: 0,
        };
        let err = router
            .receive(Envelope::new(
                1,
                Payload::RenderSurfaceInput(InputMessage {
                    surface_id: 3,
                    gesture,
                }),
            ))
            .unwrap_err();
        assert!(matches!(err, ProtocolViolation::UnexpectedInbound { .. }));
    }

    #[test]
    fn test_outbound_carries_surface_id() {
        let sink = Rc::new(RecordingSink::default());
        let router = RenderSurfaceRouter::new(sink.clone());
        router.send_compositor_message(4, 11, Bytes::from_static(b"ack"));

        let sent = sink.sent.borrow();
        assert_eq!(sent[0].target_tab_id(), 4);
        assert_eq!(
            sent[0].payload(),
            &Payload::RenderSurfaceCompositor(CompositorMessage {
                surface_id: 11,
                bytes: Bytes::from_static(b"ack"),
            })
        );
    }
}
