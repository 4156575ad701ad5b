//! Websocket bridge between a browser control panel and a scene renderer.
//!
//! The control panel streams camera poses; the bridge keeps the latest one
//! in shared state, a render loop turns it into a frame through a
//! [`SceneRenderer`], and every incoming pose is answered with the most
//! recent frame. The wire format lives in [`protocol`], the camera maths in
//! [`pose`] and [`camera`].

pub mod bridge;
pub mod camera;
pub mod config;
pub mod mesh;
pub mod pose;
pub mod producer;
pub mod protocol;
pub mod render;
pub mod server;
pub mod state;

pub use bridge::Bridge;
pub use camera::Camera;
pub use config::{BridgeConfig, RenderSettings, SessionPolicy};
pub use mesh::Mesh;
pub use pose::Pose;
pub use producer::{ChwImage, CycleOutcome, FrameProducer, ImageError, SceneRenderer};
pub use protocol::{DecodeError, PoseMessage};
pub use render::MeshRenderer;
pub use server::{start_server, ConnectionHandler, ServerHandle};
pub use state::{RenderedFrame, SharedRenderState};
