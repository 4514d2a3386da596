//! Thin remote-display client.
//!
//! Ties a connection session to per-tab contents: each tab owns the
//! documents for its remote render surfaces and mirrors its navigation
//! state. Embedders provide the compositor through a `SurfaceFactory` and
//! drive everything from one thread with `ContentsManager::process_pending`.

pub mod contents;
pub mod navigation;

pub use contents::{Contents, ContentsError, ContentsManager};
pub use navigation::NavigationStatus;
