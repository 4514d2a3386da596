//! Concrete feature routers and the per-session router set.

pub mod navigation;
pub mod render_surface;
pub mod tab_control;

use std::rc::Rc;

use crate::{
    envelope::{Envelope, FeatureTag},
    error::ProtocolViolation,
    router::OutboundSink,
};
use navigation::NavigationRouter;
use render_surface::RenderSurfaceRouter;
use tab_control::TabControlRouter;

/// One router per feature type, built once per connection session.
///
/// The set is constructed explicitly by the session owner and handed to the
/// contents layer; nothing here is global.
#[derive(Clone)]
pub struct FeatureRouters {
    pub tab_control: Rc<TabControlRouter>,
    pub navigation: Rc<NavigationRouter>,
    pub render_surface: Rc<RenderSurfaceRouter>,
}

impl FeatureRouters {
    /// Create the router set, all sending through `outbound`.
    #[must_use]
    pub fn new(outbound: Rc<dyn OutboundSink>) -> Self {
        Self {
            tab_control: Rc::new(TabControlRouter::new(Rc::clone(&outbound))),
            navigation: Rc::new(NavigationRouter::new(Rc::clone(&outbound))),
            render_surface: Rc::new(RenderSurfaceRouter::new(outbound)),
        }
    }

    /// Demultiplex an inbound envelope by feature tag.
    ///
    /// # Errors
    /// Returns a violation if no router handles the tag or the router rejects
    /// the envelope.
    pub fn route(&self, envelope: Envelope) -> Result<(), ProtocolViolation> {
        match envelope.feature_tag() {
            FeatureTag::TabControl => self.tab_control.receive(envelope),
            FeatureTag::Navigation => self.navigation.receive(envelope),
            FeatureTag::RenderSurfaceLifecycle
            | FeatureTag::RenderSurfaceInput
            | FeatureTag::RenderSurfaceCompositor => self.render_surface.receive(envelope),
            tag @ FeatureTag::ProtocolControl => Err(ProtocolViolation::UnroutedFeature { tag }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        envelope::{Payload, ProtocolControlMessage},
        router::tests::RecordingSink,
    };

    #[test]
    fn test_protocol_control_is_unrouted() {
        let routers = FeatureRouters::new(Rc::new(RecordingSink::default()));
        let err = routers
            .route(Envelope::protocol_control(
                ProtocolControlMessage::EndConnection { reason: 0 },
            ))
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::UnroutedFeature {
                tag: FeatureTag::ProtocolControl
            }
        );
    }

    #[test]
    fn test_routers_share_outbound_sink() {
        let sink = Rc::new(RecordingSink::default());
        let routers = FeatureRouters::new(sink.clone());
        routers.tab_control.create_tab(1);
        routers.navigation.reload(1);
        routers.render_surface.send_compositor_message(1, 2, bytes::Bytes::new());

        let tags: Vec<_> = sink
            .sent
            .borrow()
            .iter()
            .map(Envelope::feature_tag)
            .collect();
        assert_eq!(
            tags,
            vec![
                FeatureTag::TabControl,
                FeatureTag::Navigation,
                FeatureTag::RenderSurfaceCompositor
            ]
        );
        assert!(matches!(
            sink.sent.borrow()[0].payload(),
            Payload::TabControl(_)
        ));
    }
}
