use glam::{Mat3, Mat4, Vec3};

pub const DEFAULT_ZNEAR: f32 = 0.01;
pub const DEFAULT_ZFAR: f32 = 100.0;

/// Pinhole camera in the convention used by splat renderers: camera space
/// looks down +Z with +Y pointing down, `rotation` is stored camera-to-world
/// and `translation` is the world-to-camera translation.
///
/// Derived matrices use glam's column-vector convention.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub rotation: Mat3,
    pub translation: Vec3,
    /// Extra world-space offset applied to the camera centre.
    pub trans: Vec3,
    /// Uniform scale applied to the camera centre after `trans`.
    pub scale: f32,
    pub znear: f32,
    pub zfar: f32,
    pub fov_x: f32,
    pub fov_y: f32,
    pub width: u32,
    pub height: u32,
    world_view: Mat4,
    projection: Mat4,
    full_proj: Mat4,
    center: Vec3,
}

impl Camera {
    /// Creates a camera and computes its derived transforms.
    pub fn new(
        rotation: Mat3,
        translation: Vec3,
        fov_x: f32,
        fov_y: f32,
        width: u32,
        height: u32,
    ) -> Self {
        let mut camera = Self {
            rotation,
            translation,
            trans: Vec3::ZERO,
            scale: 1.0,
            znear: DEFAULT_ZNEAR,
            zfar: DEFAULT_ZFAR,
            fov_x,
            fov_y,
            width,
            height,
            world_view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            full_proj: Mat4::IDENTITY,
            center: Vec3::ZERO,
        };
        camera.update_transforms();
        camera
    }

    /// Creates a camera whose horizontal fov follows from `fov_y` and the image aspect.
    pub fn from_vertical_fov(
        rotation: Mat3,
        translation: Vec3,
        fov_y: f32,
        width: u32,
        height: u32,
    ) -> Self {
        let focal = fov_to_focal(fov_y, height.max(1) as f32);
        let fov_x = focal_to_fov(focal, width.max(1) as f32);
        Self::new(rotation, translation, fov_x, fov_y, width, height)
    }

    /// Replaces the extrinsics and recomputes every derived transform.
    pub fn set_extrinsics(&mut self, rotation: Mat3, translation: Vec3) {
        self.rotation = rotation;
        self.translation = translation;
        self.update_transforms();
    }

    /// Recomputes the derived transforms after any public field changed.
    pub fn update_transforms(&mut self) {
        self.world_view = world_to_view(self.rotation, self.translation, self.trans, self.scale);
        self.projection = projection_matrix(self.znear, self.zfar, self.fov_x, self.fov_y);
        self.full_proj = self.projection * self.world_view;
        self.center = self.world_view.inverse().w_axis.truncate();
    }

    pub fn world_view_transform(&self) -> Mat4 {
        self.world_view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    pub fn full_proj_transform(&self) -> Mat4 {
        self.full_proj
    }

    pub fn camera_center(&self) -> Vec3 {
        self.center
    }
}

/// World-to-view matrix with the camera centre shifted by `trans` and scaled by `scale`.
pub fn world_to_view(rotation: Mat3, translation: Vec3, trans: Vec3, scale: f32) -> Mat4 {
    let mut rt = Mat4::from_mat3(rotation.transpose());
    rt.w_axis = translation.extend(1.0);

    let mut cam_to_world = rt.inverse();
    let center = (cam_to_world.w_axis.truncate() + trans) * scale;
    cam_to_world.w_axis = center.extend(1.0);
    cam_to_world.inverse()
}

/// Perspective projection mapping view depth `znear..zfar` to `0..1`.
pub fn projection_matrix(znear: f32, zfar: f32, fov_x: f32, fov_y: f32) -> Mat4 {
    let tan_half_fov_y = (fov_y / 2.0).tan();
    let tan_half_fov_x = (fov_x / 2.0).tan();

    let top = tan_half_fov_y * znear;
    let bottom = -top;
    let right = tan_half_fov_x * znear;
    let left = -right;
    let z_sign = 1.0;

    let m00 = 2.0 * znear / (right - left);
    let m11 = 2.0 * znear / (top - bottom);
    let m02 = (right + left) / (right - left);
    let m12 = (top + bottom) / (top - bottom);
    let m22 = z_sign * zfar / (zfar - znear);
    let m23 = -(zfar * znear) / (zfar - znear);

    Mat4::from_cols_array_2d(&[
        [m00, 0.0, 0.0, 0.0],
        [0.0, m11, 0.0, 0.0],
        [m02, m12, m22, z_sign],
        [0.0, 0.0, m23, 0.0],
    ])
}

pub fn fov_to_focal(fov: f32, pixels: f32) -> f32 {
    pixels / (2.0 * (fov / 2.0).tan())
}

pub fn focal_to_fov(focal: f32, pixels: f32) -> f32 {
    2.0 * (pixels / (2.0 * focal)).atan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn identity_extrinsics_translate_points() {
        let camera = Camera::new(Mat3::IDENTITY, Vec3::new(0.0, 0.0, 4.0), 1.0, 1.0, 64, 64);
        let view = camera.world_view_transform();
        let point = view.transform_point3(Vec3::ZERO);
        assert!(point.abs_diff_eq(Vec3::new(0.0, 0.0, 4.0), 1e-6));
        assert!(camera
            .camera_center()
            .abs_diff_eq(Vec3::new(0.0, 0.0, -4.0), 1e-6));
    }

    #[test]
    fn rotated_camera_center_follows_extrinsics() {
        let rotation = Mat3::from_rotation_y(FRAC_PI_2);
        let translation = Vec3::new(1.0, 2.0, 3.0);
        let camera = Camera::new(rotation, translation, 1.0, 1.0, 32, 32);
        // centre = -R * T for a camera-to-world rotation R
        let expected = -(rotation * translation);
        assert!(camera.camera_center().abs_diff_eq(expected, 1e-5));
        let view_of_center = camera
            .world_view_transform()
            .transform_point3(camera.camera_center());
        assert!(view_of_center.abs_diff_eq(Vec3::ZERO, 1e-5));
    }

    #[test]
    fn trans_and_scale_shift_the_center() {
        let mut camera = Camera::new(Mat3::IDENTITY, Vec3::new(0.0, 0.0, 4.0), 1.0, 1.0, 8, 8);
        camera.trans = Vec3::new(1.0, 0.0, 0.0);
        camera.scale = 2.0;
        camera.update_transforms();
        assert!(camera
            .camera_center()
            .abs_diff_eq(Vec3::new(2.0, 0.0, -8.0), 1e-5));
    }

    #[test]
    fn projection_maps_near_and_far_to_unit_depth() {
        let projection = projection_matrix(0.5, 10.0, FRAC_PI_2, FRAC_PI_2);
        let near = projection * Vec4::new(0.0, 0.0, 0.5, 1.0);
        let far = projection * Vec4::new(0.0, 0.0, 10.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-6);
        assert!((far.z / far.w - 1.0).abs() < 1e-6);

        // 90 degree fov: a point at 45 degrees lands on the image edge
        let edge = projection * Vec4::new(2.0, 0.0, 2.0, 1.0);
        assert!((edge.x / edge.w - 1.0).abs() < 1e-6);
    }

    #[test]
    fn full_projection_combines_view_and_projection() {
        let mut camera = Camera::from_vertical_fov(Mat3::IDENTITY, Vec3::ZERO, 0.8, 64, 32);
        camera.set_extrinsics(Mat3::from_rotation_x(0.3), Vec3::new(0.0, 1.0, 5.0));
        let expected = camera.projection_matrix() * camera.world_view_transform();
        assert!(camera.full_proj_transform().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn fov_focal_conversions_invert() {
        let focal = fov_to_focal(0.9, 480.0);
        assert!((focal_to_fov(focal, 480.0) - 0.9).abs() < 1e-6);
        let camera = Camera::from_vertical_fov(Mat3::IDENTITY, Vec3::ZERO, 0.9, 640, 480);
        assert!(camera.fov_x > camera.fov_y);
    }
}
