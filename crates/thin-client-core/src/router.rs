//! Feature router contract.
//!
//! A router owns the `tab id -> delegate` table for one feature and the
//! outbound sink its traffic is sent through. Delegates are held as
//! non-owning handles: whoever registers a delegate keeps it alive and must
//! unregister it before dropping it.

use std::{
    cell::RefCell,
    collections::HashMap,
    marker::PhantomData,
    rc::{Rc, Weak},
};

use crate::{
    envelope::{Envelope, FeatureTag, Payload, TabId},
    error::{ProtocolViolation, RouterError},
    relay::RelaySender,
};

/// Destination of outbound envelopes.
pub trait OutboundSink {
    /// Hand an envelope to the network layer. Never blocks.
    fn send(&self, envelope: Envelope);
}

impl OutboundSink for RelaySender<Envelope> {
    fn send(&self, envelope: Envelope) {
        let tag = envelope.feature_tag();
        if !self.post(envelope) {
            tracing::debug!(?tag, "Network context is gone, dropping outbound envelope");
        }
    }
}

/// Static description of one feature type.
pub trait Feature: 'static {
    /// Per-tab handler for inbound traffic.
    type Delegate: ?Sized;

    /// Human-readable feature name, used in errors and logs.
    const NAME: &'static str;

    /// Whether inbound traffic for a tab without a delegate is a violation.
    const REQUIRES_DELEGATE: bool;

    /// Whether envelopes with this tag belong to the feature.
    fn handles(tag: FeatureTag) -> bool;

    /// Reject envelopes that are only valid in the outbound direction.
    fn validate_inbound(_envelope: &Envelope) -> Result<(), ProtocolViolation> {
        Ok(())
    }

    /// Invoke the delegate for one inbound payload.
    fn dispatch(
        delegate: &mut Self::Delegate,
        tab_id: TabId,
        payload: Payload,
    ) -> Result<(), ProtocolViolation>;
}

/// Per-feature dispatcher, multiplexed by tab id.
pub struct FeatureRouter<F: Feature> {
    delegates: RefCell<HashMap<TabId, Weak<RefCell<F::Delegate>>>>,
    outbound: Rc<dyn OutboundSink>,
    _feature: PhantomData<fn() -> F>,
}

impl<F: Feature> FeatureRouter<F> {
    /// Create a router sending through `outbound`.
    #[must_use]
    pub fn new(outbound: Rc<dyn OutboundSink>) -> Self {
        Self {
            delegates: RefCell::new(HashMap::new()),
            outbound,
            _feature: PhantomData,
        }
    }

    /// Register the delegate for a tab.
    ///
    /// The router keeps only a weak handle; the caller owns the delegate.
    ///
    /// # Errors
    /// Returns error if the tab already has a delegate.
    pub fn register(
        &self,
        tab_id: TabId,
        delegate: Rc<RefCell<F::Delegate>>,
    ) -> Result<(), RouterError> {
        let mut delegates = self.delegates.borrow_mut();
        if delegates.contains_key(&tab_id) {
            return Err(RouterError::DuplicateDelegate {
                feature: F::NAME,
                tab_id,
            });
        }
        delegates.insert(tab_id, Rc::downgrade(&delegate));
        tracing::debug!(feature = F::NAME, tab_id, "Registered delegate");
        Ok(())
    }

    /// Remove the delegate for a tab. Returns whether one was registered.
    pub fn unregister(&self, tab_id: TabId) -> bool {
        let removed = self.delegates.borrow_mut().remove(&tab_id).is_some();
        if removed {
            tracing::debug!(feature = F::NAME, tab_id, "Unregistered delegate");
        }
        removed
    }

    /// Whether a tab has a registered delegate.
    #[must_use]
    pub fn is_registered(&self, tab_id: TabId) -> bool {
        self.delegates.borrow().contains_key(&tab_id)
    }

    /// Tag a payload with a tab id and hand it to the outbound sink.
    ///
    /// # Errors
    /// Returns error if the payload belongs to another feature.
    pub fn send(&self, tab_id: TabId, payload: Payload) -> Result<(), RouterError> {
        let tag = payload.feature_tag();
        if !F::handles(tag) {
            return Err(RouterError::ForeignPayload {
                feature: F::NAME,
                tag,
            });
        }
        self.outbound.send(Envelope::new(tab_id, payload));
        Ok(())
    }

    /// Send a payload already known to belong to this feature.
    pub(crate) fn post(&self, tab_id: TabId, payload: Payload) {
        debug_assert!(F::handles(payload.feature_tag()));
        self.outbound.send(Envelope::new(tab_id, payload));
    }

    /// Dispatch an inbound envelope to its tab's delegate, synchronously.
    ///
    /// # Errors
    /// Returns a violation if the envelope cannot be delivered consistently.
    pub fn receive(&self, envelope: Envelope) -> Result<(), ProtocolViolation> {
        let tag = envelope.feature_tag();
        if !F::handles(tag) {
            return Err(ProtocolViolation::UnroutedFeature { tag });
        }
        F::validate_inbound(&envelope)?;

        let tab_id = envelope.target_tab_id();
        // Release the table before calling out so the delegate may unregister.
        let handle = self.delegates.borrow().get(&tab_id).cloned();
        let Some(handle) = handle else {
            if F::REQUIRES_DELEGATE {
                return Err(ProtocolViolation::NoDelegate {
                    feature: F::NAME,
                    tab_id,
                });
            }
            tracing::trace!(feature = F::NAME, tab_id, "No delegate, dropping envelope");
            return Ok(());
        };

        let delegate = handle
            .upgrade()
            .ok_or(ProtocolViolation::DelegateDestroyed {
                feature: F::NAME,
                tab_id,
            })?;
        let mut delegate = delegate.borrow_mut();
        F::dispatch(&mut delegate, tab_id, envelope.into_payload())
    }
}
