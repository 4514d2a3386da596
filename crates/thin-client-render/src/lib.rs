//! Render-surface documents for the thin client.
//!
//! Each tab has a [`DocumentManager`] owning one [`Document`] per remote
//! surface. The manager is the tab's render-surface delegate and keeps at
//! most one document attached to the visible layer.

pub mod compositor;
pub mod document;
pub mod manager;

pub use compositor::{
    CompositorAdapter, GestureForwarder, InputAdapter, Layer, LayerId, SurfaceFactory,
};
pub use document::{Document, LifecycleState, SurfaceSender};
pub use manager::DocumentManager;
