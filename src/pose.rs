use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use crate::protocol::POSE_COMPONENTS;

/// Camera pose requested by the control panel, relative to the camera's
/// initial placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub offset: Vec3,
    /// Radians about the Y axis.
    pub yaw: f32,
    /// Radians about the X axis.
    pub pitch: f32,
    /// Radians about the Z axis.
    pub roll: f32,
    /// Forwarded to the renderer as its scaling modifier.
    pub scale: f32,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            offset: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            scale: 1.0,
        }
    }
}

impl Pose {
    /// Builds a pose from `[x, y, z, yaw, pitch, roll, scale]`.
    ///
    /// Returns `None` unless exactly seven values are given.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        let [x, y, z, yaw, pitch, roll, scale]: [f32; POSE_COMPONENTS] = values.try_into().ok()?;
        Some(Self {
            offset: Vec3::new(x, y, z),
            yaw,
            pitch,
            roll,
            scale,
        })
    }

    pub fn to_array(&self) -> [f32; POSE_COMPONENTS] {
        [
            self.offset.x,
            self.offset.y,
            self.offset.z,
            self.yaw,
            self.pitch,
            self.roll,
            self.scale,
        ]
    }

    /// Rotation composed as `yaw * pitch * roll`.
    ///
    /// Existing clients were tuned against this order, so it must not be
    /// swapped for the more common `roll * pitch * yaw`.
    pub fn rotation(&self) -> Mat3 {
        euler_rotation(self.yaw, self.pitch, self.roll)
    }

    /// Camera translation for this pose given the camera's initial translation.
    pub fn translation(&self, origin: Vec3) -> Vec3 {
        origin + self.offset
    }
}

/// Right-handed rotation `R_y(yaw) * R_x(pitch) * R_z(roll)`.
pub fn euler_rotation(yaw: f32, pitch: f32, roll: f32) -> Mat3 {
    let yaw = Mat3::from_rotation_y(yaw);
    let pitch = Mat3::from_rotation_x(pitch);
    let roll = Mat3::from_rotation_z(roll);
    yaw * pitch * roll
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn assert_mat3_near(actual: Mat3, expected: Mat3) {
        assert!(
            actual.abs_diff_eq(expected, 1e-6),
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn zero_angles_give_identity() {
        assert_eq!(euler_rotation(0.0, 0.0, 0.0), Mat3::IDENTITY);
        assert_eq!(Pose::default().rotation(), Mat3::IDENTITY);
    }

    #[test]
    fn offset_is_added_to_origin() {
        let pose = Pose::from_slice(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(pose.translation(Vec3::ZERO), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(
            pose.translation(Vec3::new(0.5, 2.0, -3.0)),
            Vec3::new(1.5, 2.0, -3.0)
        );
    }

    #[test]
    fn single_axis_rotations_match_glam() {
        assert_mat3_near(
            euler_rotation(FRAC_PI_2, 0.0, 0.0),
            Mat3::from_rotation_y(FRAC_PI_2),
        );
        assert_mat3_near(
            euler_rotation(0.0, FRAC_PI_2, 0.0),
            Mat3::from_rotation_x(FRAC_PI_2),
        );
        assert_mat3_near(
            euler_rotation(0.0, 0.0, FRAC_PI_2),
            Mat3::from_rotation_z(FRAC_PI_2),
        );
    }

    #[test]
    fn composition_applies_roll_first() {
        let rotation = euler_rotation(FRAC_PI_2, FRAC_PI_2, 0.0);
        // pitch takes +Y to +Z, then yaw takes +Z to +X
        let rotated = rotation * Vec3::Y;
        assert!(rotated.abs_diff_eq(Vec3::X, 1e-6), "{rotated:?}");

        let reversed = Mat3::from_rotation_x(FRAC_PI_2) * Mat3::from_rotation_y(FRAC_PI_2);
        assert!(!rotation.abs_diff_eq(reversed, 1e-3));
    }

    #[test]
    fn from_slice_requires_seven_values() {
        assert!(Pose::from_slice(&[0.0; 6]).is_none());
        assert!(Pose::from_slice(&[0.0; 8]).is_none());
        let values = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 2.0];
        let pose = Pose::from_slice(&values).unwrap();
        assert_eq!(pose.to_array(), values);
        assert_eq!(pose.scale, 2.0);
    }
}
