//! Navigation requests and engine-reported navigation state.

use serde::{Deserialize, Serialize};

use crate::{
    envelope::{Envelope, FeatureTag, Payload, TabId},
    error::ProtocolViolation,
    router::{Feature, FeatureRouter},
};

/// Navigation state pushed by the engine. Absent fields did not change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_load_completed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavigationMessage {
    LoadUrl { url: String },
    GoBack,
    GoForward,
    Reload,
    StateChanged(NavigationState),
}

/// Receives navigation state changes for one tab.
pub trait NavigationDelegate {
    fn on_url_changed(&mut self, url: &str);
    fn on_title_changed(&mut self, title: &str);
    fn on_loading_changed(&mut self, loading: bool);
    fn on_page_load_status_update(&mut self, completed: bool);
}

/// The navigation feature.
pub struct Navigation;

impl Feature for Navigation {
    type Delegate = dyn NavigationDelegate;

    const NAME: &'static str = "navigation";
    const REQUIRES_DELEGATE: bool = true;

    fn handles(tag: FeatureTag) -> bool {
        tag == FeatureTag::Navigation
    }

    fn validate_inbound(envelope: &Envelope) -> Result<(), ProtocolViolation> {
        match envelope.payload() {
            Payload::Navigation(NavigationMessage::StateChanged(_)) => Ok(()),
            _ => Err(ProtocolViolation::UnexpectedInbound {
                tag: envelope.feature_tag(),
                tab_id: envelope.target_tab_id(),
            }),
        }
    }

    fn dispatch(
        delegate: &mut Self::Delegate,
        tab_id: TabId,
        payload: Payload,
    ) -> Result<(), ProtocolViolation> {
        let tag = payload.feature_tag();
        let Payload::Navigation(NavigationMessage::StateChanged(state)) = payload else {
            return Err(ProtocolViolation::UnexpectedInbound { tag, tab_id });
        };

        if let Some(url) = &state.url {
            delegate.on_url_changed(url);
        }
        if let Some(title) = &state.title {
            delegate.on_title_changed(title);
        }
        if let Some(loading) = state.loading {
            delegate.on_loading_changed(loading);
        }
        if let Some(completed) = state.page_load_completed {
            delegate.on_page_load_status_update(completed);
        }
        Ok(())
    }
}

pub type NavigationRouter = FeatureRouter<Navigation>;

impl FeatureRouter<Navigation> {
    pub fn load_url(&self, tab_id: TabId, url: impl Into<String>) {
        self.post(
            tab_id,
            Payload::Navigation(NavigationMessage::LoadUrl { url: url.into() }),
        );
    }

    pub fn go_back(&self, tab_id: TabId) {
        self.post(tab_id, Payload::Navigation(NavigationMessage::GoBack));
    }

    pub fn go_forward(&self, tab_id: TabId) {
        self.post(tab_id, Payload::Navigation(NavigationMessage::GoForward));
    }

    pub fn reload(&self, tab_id: TabId) {
        self.post(tab_id, Payload::Navigation(NavigationMessage::Reload));
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::router::tests::RecordingSink;

    #[derive(Default)]
    struct Recorded {
        calls: Vec<String>,
    }

    impl NavigationDelegate for Recorded {
        fn on_url_changed(&mut self, url: &str) {
            self.calls.push(format!("url:{url}"));
        }

        fn on_title_changed(&mut self, title: &str) {
            self.calls.push(format!("title:{title}"));
        }

        fn on_loading_changed(&mut self, loading: bool) {
            self.calls.push(format!("loading:{loading}"));
        }

        fn on_page_load_status_update(&mut self, completed: bool) {
            self.calls.push(format!("completed:{completed}"));
        }
    }

    #[test]
    fn test_state_changed_dispatches_present_fields() {
        let router = NavigationRouter::new(Rc::new(RecordingSink::default()));
        let delegate = Rc::new(RefCell::new(Recorded::default()));
        router.register(1, delegate.clone()).unwrap();

        let state = NavigationState {
            url: Some("https://example.com/".into()),
            loading: Some(false),
            ..NavigationState::default()
        };
        router
            .receive(Envelope::new(
                1,
                Payload::Navigation(NavigationMessage::StateChanged(state)),
            ))
            .unwrap();

        assert_eq!(
            delegate.borrow().calls,
            vec!["url:https://example.com/", "loading:false"]
        );
    }

    #[test]
    fn test_inbound_request_is_violation() {
        let router = NavigationRouter::new(Rc::new(RecordingSink::default()));
        let delegate = Rc::new(RefCell::new(Recorded::default()));
        router.register(1, delegate.clone()).unwrap();

        let err = router
            .receive(Envelope::new(1, Payload::Navigation(NavigationMessage::Reload)))
            .unwrap_err();
        assert!(matches!(err, ProtocolViolation::UnexpectedInbound { .. }));
        assert!(delegate.borrow().calls.is_empty());
    }

    #[test]
    fn test_load_url_outbound() {
        let sink = Rc::new(RecordingSink::default());
        let router = NavigationRouter::new(sink.clone());
        router.load_url(2, "https://example.org/");
        router.go_back(2);

        let sent = sink.sent.borrow();
        assert_eq!(
            sent[0].payload(),
            &Payload::Navigation(NavigationMessage::LoadUrl {
                url: "https://example.org/".into()
            })
        );
        assert_eq!(sent[1].target_tab_id(), 2);
    }
}
