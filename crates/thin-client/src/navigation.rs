//! Last known navigation state of a tab.

use thin_client_core::features::navigation::NavigationDelegate;

/// Navigation state mirrored from the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationStatus {
    pub url: String,
    pub title: String,
    pub loading: bool,
    pub page_load_completed: bool,
}

impl NavigationDelegate for NavigationStatus {
    fn on_url_changed(&mut self, url: &str) {
        url.clone_into(&mut self.url);
    }

    fn on_title_changed(&mut self, title: &str) {
        title.clone_into(&mut self.title);
    }

    fn on_loading_changed(&mut self, loading: bool) {
        self.loading = loading;
        if loading {
            self.page_load_completed = false;
        }
    }

    fn on_page_load_status_update(&mut self, completed: bool) {
        self.page_load_completed = completed;
    }
}
