//! Client-side proxy for one remote render surface.

use std::{fmt, rc::Rc};

use bytes::Bytes;
use thin_client_core::{
    SurfaceId, TabId,
    features::render_surface::{GestureEvent, RenderSurfaceRouter},
};

use crate::compositor::{CompositorAdapter, InputAdapter, Layer, SurfaceFactory};

/// Lifecycle of a document, driven by engine notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initialized,
    Deleted,
}

/// Outbound half of a surface, tagged with its tab and surface ids.
///
/// Handed out by the document manager; adapters use it to talk to the engine.
#[derive(Clone)]
pub struct SurfaceSender {
    tab_id: TabId,
    surface_id: SurfaceId,
    router: Rc<RenderSurfaceRouter>,
}

impl SurfaceSender {
    pub(crate) const fn new(
        tab_id: TabId,
        surface_id: SurfaceId,
        router: Rc<RenderSurfaceRouter>,
    ) -> Self {
        Self {
            tab_id,
            surface_id,
            router,
        }
    }

    #[must_use]
    pub const fn tab_id(&self) -> TabId {
        self.tab_id
    }

    #[must_use]
    pub const fn surface_id(&self) -> SurfaceId {
        self.surface_id
    }

    pub fn send_compositor_message(&self, bytes: Bytes) {
        self.router
            .send_compositor_message(self.tab_id, self.surface_id, bytes);
    }

    pub fn send_gesture_event(&self, gesture: GestureEvent) {
        self.router
            .send_gesture_event(self.tab_id, self.surface_id, gesture);
    }
}

impl fmt::Debug for SurfaceSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceSender")
            .field("tab_id", &self.tab_id)
            .field("surface_id", &self.surface_id)
            .finish_non_exhaustive()
    }
}

/// One remote render surface.
pub struct Document {
    surface_id: SurfaceId,
    state: LifecycleState,
    visible: bool,
    compositor: Box<dyn CompositorAdapter>,
    input: Box<dyn InputAdapter>,
    outbound: SurfaceSender,
}

impl Document {
    pub(crate) fn new(outbound: SurfaceSender, factory: &mut dyn SurfaceFactory) -> Self {
        let compositor = factory.create_compositor(&outbound);
        let input = factory.create_input(&outbound);
        Self {
            surface_id: outbound.surface_id(),
            state: LifecycleState::Created,
            visible: false,
            compositor,
            input,
            outbound,
        }
    }

    #[must_use]
    pub const fn surface_id(&self) -> SurfaceId {
        self.surface_id
    }

    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.state = LifecycleState::Initialized;
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        self.compositor.set_visible(visible);
    }

    pub(crate) fn attach_to(&mut self, layer: &mut Layer) {
        self.compositor.attach_to(layer);
    }

    pub(crate) fn detach_from(&mut self, layer: &mut Layer) {
        self.compositor.detach_from(layer);
    }

    pub(crate) fn on_compositor_message(&mut self, bytes: Bytes) {
        self.compositor.on_compositor_message(bytes);
    }

    /// Forward a gesture to the input adapter. Returns whether it was consumed.
    pub fn on_touch_event(&mut self, event: &GestureEvent) -> bool {
        self.input.on_touch_event(event)
    }

    pub fn send_compositor_message(&self, bytes: Bytes) {
        self.outbound.send_compositor_message(bytes);
    }

    pub fn send_gesture_event(&self, gesture: GestureEvent) {
        self.outbound.send_gesture_event(gesture);
    }

    pub(crate) fn destroy(mut self) {
        self.state = LifecycleState::Deleted;
        if self.visible {
            self.set_visible(false);
        }
        tracing::debug!(
            tab_id = self.outbound.tab_id(),
            surface_id = self.surface_id,
            "Destroyed document"
        );
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("surface_id", &self.surface_id)
            .field("state", &self.state)
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}
