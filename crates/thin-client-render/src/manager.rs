//! Per-tab document table and active-surface handoff.
//!
//! The manager owns every document of one tab and the single visible layer.
//! At most one document is active; only its compositor output is attached to
//! the layer, and only it receives input.

use std::{collections::HashMap, fmt, rc::Rc};

use bytes::Bytes;
use thin_client_core::{
    ProtocolViolation, SurfaceId, TabId,
    features::render_surface::{GestureEvent, RenderSurfaceDelegate, RenderSurfaceRouter},
};

use crate::{
    compositor::{Layer, SurfaceFactory},
    document::{Document, SurfaceSender},
};

/// Owns the documents of one tab.
pub struct DocumentManager {
    tab_id: TabId,
    router: Rc<RenderSurfaceRouter>,
    factory: Box<dyn SurfaceFactory>,
    documents: HashMap<SurfaceId, Document>,
    active: Option<SurfaceId>,
    layer: Layer,
    visible: bool,
}

impl DocumentManager {
    /// Create an empty, hidden manager for a tab.
    #[must_use]
    pub fn new(
        tab_id: TabId,
        router: Rc<RenderSurfaceRouter>,
        factory: Box<dyn SurfaceFactory>,
    ) -> Self {
        Self {
            tab_id,
            router,
            factory,
            documents: HashMap::new(),
            active: None,
            layer: Layer::new(),
            visible: false,
        }
    }

    #[must_use]
    pub const fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// The shared visible layer.
    #[must_use]
    pub const fn layer(&self) -> &Layer {
        &self.layer
    }

    #[must_use]
    pub const fn active_surface(&self) -> Option<SurfaceId> {
        self.active
    }

    #[must_use]
    pub fn document(&self, surface_id: SurfaceId) -> Option<&Document> {
        self.documents.get(&surface_id)
    }

    #[must_use]
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    /// Show or hide the tab. Applies to the active document, and to any
    /// document activated later.
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if let Some(document) = self.active.and_then(|id| self.documents.get_mut(&id)) {
            document.set_visible(visible);
        }
    }

    /// Forward a gesture to the active document.
    ///
    /// Returns `false` when there is no active document or it did not consume
    /// the event.
    pub fn on_touch_event(&mut self, event: &GestureEvent) -> bool {
        match self.active.and_then(|id| self.documents.get_mut(&id)) {
            Some(document) => document.on_touch_event(event),
            None => false,
        }
    }

    /// Destroy every document, leaving the layer empty.
    ///
    /// Used when the connection that created the surfaces is gone. The
    /// visibility flag is kept for documents of the next connection.
    pub fn reset(&mut self) {
        if let Some(document) = self
            .active
            .take()
            .and_then(|active| self.documents.get_mut(&active))
        {
            document.detach_from(&mut self.layer);
        }
        for (_, document) in self.documents.drain() {
            document.destroy();
        }
        debug_assert_eq!(self.layer.child_count(), 0);
        tracing::debug!(tab_id = self.tab_id, "Reset documents");
    }

    fn activate(&mut self, surface_id: SurfaceId) {
        if self.active == Some(surface_id) {
            return;
        }

        if let Some(document) = self
            .active
            .take()
            .and_then(|previous| self.documents.get_mut(&previous))
        {
            document.detach_from(&mut self.layer);
            document.set_visible(false);
        }

        if let Some(document) = self.documents.get_mut(&surface_id) {
            document.attach_to(&mut self.layer);
            document.set_visible(self.visible);
            self.active = Some(surface_id);
        }

        debug_assert!(self.layer.child_count() <= 1);
        tracing::debug!(tab_id = self.tab_id, surface_id, "Activated document");
    }
}

impl RenderSurfaceDelegate for DocumentManager {
    fn on_surface_created(&mut self, surface_id: SurfaceId) -> Result<(), ProtocolViolation> {
        if self.documents.contains_key(&surface_id) {
            return Err(ProtocolViolation::DuplicateSurface {
                tab_id: self.tab_id,
                surface_id,
            });
        }

        let outbound = SurfaceSender::new(self.tab_id, surface_id, Rc::clone(&self.router));
        let document = Document::new(outbound, self.factory.as_mut());
        self.documents.insert(surface_id, document);
        tracing::debug!(tab_id = self.tab_id, surface_id, "Created document");
        Ok(())
    }

    fn on_surface_initialized(&mut self, surface_id: SurfaceId) -> Result<(), ProtocolViolation> {
        let Some(document) = self.documents.get_mut(&surface_id) else {
            return Err(ProtocolViolation::UnknownSurface {
                tab_id: self.tab_id,
                surface_id,
            });
        };
        document.mark_initialized();
        self.activate(surface_id);
        Ok(())
    }

    fn on_surface_deleted(&mut self, surface_id: SurfaceId) -> Result<(), ProtocolViolation> {
        let Some(mut document) = self.documents.remove(&surface_id) else {
            return Err(ProtocolViolation::UnknownSurface {
                tab_id: self.tab_id,
                surface_id,
            });
        };

        if self.active == Some(surface_id) {
            document.detach_from(&mut self.layer);
            self.active = None;
        }
        document.destroy();
        Ok(())
    }

    fn on_compositor_message(&mut self, surface_id: SurfaceId, bytes: Bytes) {
        match self.documents.get_mut(&surface_id) {
            Some(document) => document.on_compositor_message(bytes),
            // Expected while the engine tears a surface down.
            None => tracing::debug!(
                tab_id = self.tab_id,
                surface_id,
                "Dropping compositor message for unknown surface"
            ),
        }
    }
}

impl fmt::Debug for DocumentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentManager")
            .field("tab_id", &self.tab_id)
            .field("documents", &self.documents)
            .field("active", &self.active)
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}
