//! Renderers that can be plugged into the frame producer.

mod headless;

pub use headless::MeshRenderer;
