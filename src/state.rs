use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Frame produced by one render cycle: tightly packed RGB8 rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedFrame {
    pub width: i32,
    pub height: i32,
    pub pixels: Vec<u8>,
}

impl RenderedFrame {
    pub fn new(width: i32, height: i32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(
            pixels.len(),
            width.max(0) as usize * height.max(0) as usize * 3
        );
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// State shared between the connection handler and the frame producer.
///
/// Each field is synchronised on its own and nothing locks across fields,
/// so a reader can see the newest pose next to an older message id, or an
/// older frame next to a newer pose. Last write wins. The connection side
/// is the only writer of the pose fields and the producer side the only
/// writer of the frame.
#[derive(Debug, Default)]
pub struct SharedRenderState {
    pose: RwLock<Option<Arc<[f32]>>>,
    message_id: AtomicI32,
    speed_hint: AtomicU32,
    frame: RwLock<Arc<RenderedFrame>>,
    frame_generation: AtomicU64,
}

impl SharedRenderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the fields of a freshly decoded pose message.
    pub fn publish_pose(&self, message_id: i32, speed_hint: f32, pose: Vec<f32>) {
        self.message_id.store(message_id, Ordering::Relaxed);
        self.speed_hint
            .store(speed_hint.to_bits(), Ordering::Relaxed);
        *self.pose.write() = Some(Arc::from(pose));
    }

    /// Latest pose, or `None` until the first message arrives.
    pub fn latest_pose(&self) -> Option<Arc<[f32]>> {
        self.pose.read().clone()
    }

    pub fn latest_message_id(&self) -> i32 {
        self.message_id.load(Ordering::Relaxed)
    }

    /// Speed scalar from the control panel. Not used by the bridge itself.
    pub fn speed_hint(&self) -> f32 {
        f32::from_bits(self.speed_hint.load(Ordering::Relaxed))
    }

    /// Replaces the served frame; width, height and pixels swap together.
    pub fn publish_frame(&self, frame: RenderedFrame) {
        *self.frame.write() = Arc::new(frame);
        self.frame_generation.fetch_add(1, Ordering::Release);
    }

    pub fn latest_frame(&self) -> Arc<RenderedFrame> {
        self.frame.read().clone()
    }

    /// Number of frames published so far.
    pub fn frame_generation(&self) -> u64 {
        self.frame_generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let state = SharedRenderState::new();
        assert!(state.latest_pose().is_none());
        assert_eq!(state.latest_message_id(), 0);
        assert_eq!(state.speed_hint(), 0.0);
        let frame = state.latest_frame();
        assert_eq!((frame.width, frame.height), (0, 0));
        assert!(frame.is_empty());
        assert_eq!(state.frame_generation(), 0);
    }

    #[test]
    fn later_pose_overwrites_earlier() {
        let state = SharedRenderState::new();
        state.publish_pose(1, 0.5, vec![1.0; 7]);
        state.publish_pose(2, 0.75, vec![2.0; 7]);
        assert_eq!(state.latest_message_id(), 2);
        assert_eq!(state.speed_hint(), 0.75);
        assert_eq!(&*state.latest_pose().unwrap(), &[2.0; 7]);
    }

    #[test]
    fn published_frame_is_visible_and_counted() {
        let state = SharedRenderState::new();
        let held = state.latest_frame();
        state.publish_frame(RenderedFrame::new(1, 2, vec![9; 6]));
        assert_eq!(state.frame_generation(), 1);
        let frame = state.latest_frame();
        assert_eq!((frame.width, frame.height), (1, 2));
        assert_eq!(frame.pixels, vec![9; 6]);
        // readers holding the previous frame keep it intact
        assert!(held.is_empty());
    }
}
