//! Seams towards the external compositor and platform input.

use bytes::Bytes;
use thin_client_core::features::render_surface::GestureEvent;

use crate::document::SurfaceSender;

/// Identifier of a compositor output layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(u64);

impl LayerId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// The visible layer shown by the platform.
///
/// Its children are compositor outputs. The document manager keeps it at
/// zero or one child.
#[derive(Debug, Default)]
pub struct Layer {
    children: Vec<LayerId>,
}

impl Layer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_child(&mut self, child: LayerId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    /// Returns whether the child was attached.
    pub fn remove_child(&mut self, child: LayerId) -> bool {
        let before = self.children.len();
        self.children.retain(|c| *c != child);
        self.children.len() != before
    }

    #[must_use]
    pub fn children(&self) -> &[LayerId] {
        &self.children
    }

    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// Client-side handle to the compositor instance of one surface.
///
/// Payloads are opaque here; only the compositor understands them.
pub trait CompositorAdapter {
    /// Root of this compositor's output.
    fn root_layer(&self) -> LayerId;

    fn set_visible(&mut self, visible: bool);

    /// Deliver an opaque update from the engine.
    fn on_compositor_message(&mut self, bytes: Bytes);

    fn attach_to(&mut self, layer: &mut Layer) {
        layer.add_child(self.root_layer());
    }

    fn detach_from(&mut self, layer: &mut Layer) {
        layer.remove_child(self.root_layer());
    }
}

/// Turns platform gestures into engine input for one surface.
pub trait InputAdapter {
    /// Returns whether the event was consumed.
    fn on_touch_event(&mut self, event: &GestureEvent) -> bool;
}

/// Input adapter that forwards every gesture to the engine unchanged.
pub struct GestureForwarder {
    outbound: SurfaceSender,
}

impl GestureForwarder {
    #[must_use]
    pub const fn new(outbound: SurfaceSender) -> Self {
        Self { outbound }
    }
}

impl InputAdapter for GestureForwarder {
    fn on_touch_event(&mut self, event: &GestureEvent) -> bool {
        self.outbound.send_gesture_event(*event);
        true
    }
}

/// Builds the per-surface adapters when the engine creates a surface.
pub trait SurfaceFactory {
    fn create_compositor(&mut self, outbound: &SurfaceSender) -> Box<dyn CompositorAdapter>;

    fn create_input(&mut self, outbound: &SurfaceSender) -> Box<dyn InputAdapter> {
        Box::new(GestureForwarder::new(outbound.clone()))
    }
}
