//! Tabs and the manager that owns them.
//!
//! A [`Contents`] is one remote tab: its document manager and navigation
//! state, registered with the session's feature routers for as long as the
//! `Contents` lives. [`ContentsManager`] owns every tab of a session and pumps
//! the session, routing inbound envelopes to the tabs.
//!
//! Tabs outlive connections. When a connection ends, every tab drops the
//! surfaces that connection created; each new connection is told about every
//! open tab again.

use std::{
    cell::{Ref, RefCell},
    collections::{HashMap, VecDeque},
    fmt,
    rc::Rc,
};

use thin_client_core::{
    Envelope, FeatureRouters, ProtocolViolation, RelaySender, RouterError, TabId,
    features::{
        navigation::NavigationDelegate,
        render_surface::{GestureEvent, RenderSurfaceDelegate},
    },
};
use thin_client_render::{DocumentManager, SurfaceFactory};
use thin_client_session::{ConnectionEvent, ConnectionSession, SessionEvent};

use crate::navigation::NavigationStatus;

/// Contents error.
#[derive(Debug, thiserror::Error)]
pub enum ContentsError {
    #[error("Router error: {0}")]
    Router(#[from] RouterError),
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("Unknown tab: {0}")]
    UnknownTab(TabId),
    #[error("No tab ids left")]
    TabIdsExhausted,
}

/// One remote tab.
pub struct Contents {
    tab_id: TabId,
    routers: FeatureRouters,
    documents: Rc<RefCell<DocumentManager>>,
    navigation: Rc<RefCell<NavigationStatus>>,
}

impl Contents {
    /// Create a tab and register it with the routers.
    fn new(
        tab_id: TabId,
        routers: &FeatureRouters,
        factory: Box<dyn SurfaceFactory>,
    ) -> Result<Self, RouterError> {
        let documents = Rc::new(RefCell::new(DocumentManager::new(
            tab_id,
            Rc::clone(&routers.render_surface),
            factory,
        )));
        let navigation = Rc::new(RefCell::new(NavigationStatus::default()));

        let render_delegate: Rc<RefCell<dyn RenderSurfaceDelegate>> = documents.clone();
        routers.render_surface.register(tab_id, render_delegate)?;

        let navigation_delegate: Rc<RefCell<dyn NavigationDelegate>> = navigation.clone();
        if let Err(e) = routers.navigation.register(tab_id, navigation_delegate) {
            routers.render_surface.unregister(tab_id);
            return Err(e);
        }

        tracing::info!(tab_id, "Created contents");

        Ok(Self {
            tab_id,
            routers: routers.clone(),
            documents,
            navigation,
        })
    }

    #[must_use]
    pub const fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// The tab's documents.
    ///
    /// # Panics
    /// Panics if called while the tab is dispatching an inbound envelope.
    #[must_use]
    pub fn documents(&self) -> Ref<'_, DocumentManager> {
        self.documents.borrow()
    }

    #[must_use]
    pub fn navigation(&self) -> NavigationStatus {
        self.navigation.borrow().clone()
    }

    pub fn load_url(&self, url: impl Into<String>) {
        self.routers.navigation.load_url(self.tab_id, url);
    }

    pub fn go_back(&self) {
        self.routers.navigation.go_back(self.tab_id);
    }

    pub fn go_forward(&self) {
        self.routers.navigation.go_forward(self.tab_id);
    }

    pub fn reload(&self) {
        self.routers.navigation.reload(self.tab_id);
    }

    pub fn set_visible(&self, visible: bool) {
        self.documents.borrow_mut().set_visible(visible);
    }

    /// Report the viewport size in physical pixels.
    pub fn set_size(&self, width: u32, height: u32, device_pixel_ratio: f32) {
        self.routers
            .tab_control
            .set_size(self.tab_id, width, height, device_pixel_ratio);
    }

    /// Returns whether the active document consumed the gesture.
    pub fn on_touch_event(&self, event: &GestureEvent) -> bool {
        self.documents.borrow_mut().on_touch_event(event)
    }

    /// Tell the current engine about this tab.
    fn announce(&self) {
        self.routers.tab_control.create_tab(self.tab_id);
    }

    /// Forget everything the previous engine reported for this tab.
    fn reset(&self) {
        self.documents.borrow_mut().reset();
        *self.navigation.borrow_mut() = NavigationStatus::default();
    }
}

impl Drop for Contents {
    fn drop(&mut self) {
        self.routers.render_surface.unregister(self.tab_id);
        self.routers.navigation.unregister(self.tab_id);
        self.routers.tab_control.close_tab(self.tab_id);
        tracing::info!(tab_id = self.tab_id, "Closed contents");
    }
}

impl fmt::Debug for Contents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contents")
            .field("tab_id", &self.tab_id)
            .field("navigation", &self.navigation.borrow())
            .finish_non_exhaustive()
    }
}

/// Owns the session, its routers and every tab.
pub struct ContentsManager {
    session: ConnectionSession,
    routers: FeatureRouters,
    contents: HashMap<TabId, Contents>,
    next_tab_id: TabId,
    /// Events not yet handled.
    backlog: VecDeque<SessionEvent>,
    /// Events handled but not yet returned.
    ready: Vec<SessionEvent>,
    discard_inbound: bool,
}

impl ContentsManager {
    /// Wrap a session. `outbound` is the sink returned alongside it.
    #[must_use]
    pub fn new(session: ConnectionSession, outbound: RelaySender<Envelope>) -> Self {
        Self {
            session,
            routers: FeatureRouters::new(Rc::new(outbound)),
            contents: HashMap::new(),
            // Tab 0 addresses the connection itself.
            next_tab_id: 1,
            backlog: VecDeque::new(),
            ready: Vec::new(),
            discard_inbound: false,
        }
    }

    pub fn connect(&mut self) {
        self.session.connect();
    }

    pub fn drop_connection(&self) {
        self.session.drop_connection();
    }

    #[must_use]
    pub const fn session(&self) -> &ConnectionSession {
        &self.session
    }

    pub fn add_observer(&mut self, observer: RelaySender<ConnectionEvent>) {
        self.session.add_observer(observer);
    }

    #[must_use]
    pub const fn routers(&self) -> &FeatureRouters {
        &self.routers
    }

    /// Open a new tab whose surfaces are built by `factory`.
    ///
    /// The engine is told about the tab now if connected, otherwise once the
    /// next connection is up.
    ///
    /// # Errors
    /// Returns error if tab ids are exhausted or the routers refuse the tab.
    pub fn create_contents(
        &mut self,
        factory: Box<dyn SurfaceFactory>,
    ) -> Result<TabId, ContentsError> {
        let tab_id = self.next_tab_id;
        self.next_tab_id = tab_id
            .checked_add(1)
            .ok_or(ContentsError::TabIdsExhausted)?;

        let contents = Contents::new(tab_id, &self.routers, factory)?;
        if self.session.status().is_connected() {
            contents.announce();
        }
        self.contents.insert(tab_id, contents);
        Ok(tab_id)
    }

    /// Close a tab and tell the engine.
    ///
    /// # Errors
    /// Returns error if no such tab is open.
    pub fn close_contents(&mut self, tab_id: TabId) -> Result<(), ContentsError> {
        self.contents
            .remove(&tab_id)
            .map(drop)
            .ok_or(ContentsError::UnknownTab(tab_id))
    }

    #[must_use]
    pub fn contents(&self, tab_id: TabId) -> Option<&Contents> {
        self.contents.get(&tab_id)
    }

    #[must_use]
    pub fn tab_ids(&self) -> Vec<TabId> {
        let mut ids: Vec<_> = self.contents.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drive the session and route inbound envelopes to the tabs.
    ///
    /// Returns the session events other than inbound envelopes. A protocol
    /// violation drops the connection and is returned as an error; envelopes
    /// still in flight from that connection are discarded, and events not
    /// yet returned are kept for the next call.
    ///
    /// # Errors
    /// Returns the first protocol violation found.
    pub fn process_pending(&mut self) -> Result<Vec<SessionEvent>, ContentsError> {
        let mut batch = std::mem::take(&mut self.backlog);
        batch.extend(self.session.process_pending());

        let mut events = std::mem::take(&mut self.ready);
        while let Some(event) = batch.pop_front() {
            match event {
                SessionEvent::Inbound(envelope) => {
                    if self.discard_inbound {
                        tracing::trace!("Discarding envelope from a violating connection");
                        continue;
                    }
                    if let Err(violation) = self.routers.route(envelope) {
                        tracing::error!("Protocol violation, dropping connection: {violation}");
                        self.discard_inbound = true;
                        self.session.drop_connection();
                        self.ready = events;
                        self.backlog = batch;
                        return Err(violation.into());
                    }
                }
                SessionEvent::Connected(endpoint) => {
                    self.discard_inbound = false;
                    for tab_id in self.tab_ids() {
                        if let Some(contents) = self.contents.get(&tab_id) {
                            contents.announce();
                        }
                    }
                    events.push(SessionEvent::Connected(endpoint));
                }
                SessionEvent::Disconnected(reason) => {
                    for contents in self.contents.values() {
                        contents.reset();
                    }
                    events.push(SessionEvent::Disconnected(reason));
                }
                other => events.push(other),
            }
        }
        Ok(events)
    }
}

impl fmt::Debug for ContentsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentsManager")
            .field("session", &self.session)
            .field("tabs", &self.tab_ids())
            .field("discard_inbound", &self.discard_inbound)
            .finish_non_exhaustive()
    }
}
