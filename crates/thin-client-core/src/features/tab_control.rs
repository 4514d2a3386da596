//! Tab lifecycle announcements. Outbound only.

use serde::{Deserialize, Serialize};

use crate::{
    envelope::{Envelope, FeatureTag, Payload, TabId},
    error::ProtocolViolation,
    router::{Feature, FeatureRouter},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TabControlMessage {
    CreateTab,
    CloseTab,
    SizeChanged {
        width: u32,
        height: u32,
        device_pixel_ratio: f32,
    },
}

/// The tab-control feature.
pub struct TabControl;

impl Feature for TabControl {
    // The engine never addresses tab-control traffic to the client.
    type Delegate = ();

    const NAME: &'static str = "tab_control";
    const REQUIRES_DELEGATE: bool = false;

    fn handles(tag: FeatureTag) -> bool {
        tag == FeatureTag::TabControl
    }

    fn validate_inbound(envelope: &Envelope) -> Result<(), ProtocolViolation> {
        Err(ProtocolViolation::UnexpectedInbound {
            tag: envelope.feature_tag(),
            tab_id: envelope.target_tab_id(),
        })
    }

    fn dispatch(_: &mut (), _: TabId, _: Payload) -> Result<(), ProtocolViolation> {
        Ok(())
    }
}

pub type TabControlRouter = FeatureRouter<TabControl>;

impl FeatureRouter<TabControl> {
    pub fn create_tab(&self, tab_id: TabId) {
        self.post(tab_id, Payload::TabControl(TabControlMessage::CreateTab));
    }

    pub fn close_tab(&self, tab_id: TabId) {
        self.post(tab_id, Payload::TabControl(TabControlMessage::CloseTab));
    }

    /// Tell the engine the tab's viewport size in physical pixels.
    pub fn set_size(&self, tab_id: TabId, width: u32, height: u32, device_pixel_ratio: f32) {
        self.post(
            tab_id,
            Payload::TabControl(TabControlMessage::SizeChanged {
                width,
                height,
                device_pixel_ratio,
            }),
        );
    }
}
