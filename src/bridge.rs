use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use glam::Vec3;

use crate::camera::Camera;
use crate::config::BridgeConfig;
use crate::producer::{FrameProducer, SceneRenderer};
use crate::server::{start_server, ServerHandle};
use crate::state::SharedRenderState;

/// A running websocket server together with the state it serves.
///
/// This is the entry point for an embedding render loop: start the bridge,
/// build a producer from it and call [`FrameProducer::run_cycle`] at
/// whatever cadence the loop runs.
pub struct Bridge {
    state: Arc<SharedRenderState>,
    server: ServerHandle,
}

impl Bridge {
    pub fn start(config: &BridgeConfig) -> Result<Self> {
        let state = Arc::new(SharedRenderState::new());
        let server = start_server(config, Arc::clone(&state))?;
        Ok(Self { state, server })
    }

    pub fn state(&self) -> &Arc<SharedRenderState> {
        &self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Speed scalar most recently sent by the control panel.
    pub fn speed_hint(&self) -> f32 {
        self.state.speed_hint()
    }

    pub fn producer<R: SceneRenderer>(
        &self,
        camera: Camera,
        renderer: R,
        background: Vec3,
    ) -> FrameProducer<R> {
        FrameProducer::new(Arc::clone(&self.state), camera, renderer, background)
    }

    pub fn shutdown(self) -> Result<()> {
        self.server.shutdown()
    }
}
