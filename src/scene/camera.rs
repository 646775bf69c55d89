//! Fixed camera looking at the cube

use glam::Mat4;

use crate::backend::Extent2d;
use crate::config::CameraConfig;

/// Right-handed perspective camera sized to the output.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    config: CameraConfig,
    aspect: f32,
}

impl Camera {
    pub fn new(config: CameraConfig, output: Extent2d) -> Self {
        Self {
            config,
            aspect: output.aspect_ratio(),
        }
    }

    /// Recompute the aspect ratio after the output was resized.
    pub fn resize(&mut self, output: Extent2d) {
        self.aspect = output.aspect_ratio();
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    /// Vertical field of view in radians, doubled in portrait orientation.
    pub fn fov_y(&self) -> f32 {
        let fov = self.config.fov_y_degrees.to_radians();
        if self.aspect < 1.0 {
            fov * 2.0
        } else {
            fov
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.config.eye, self.config.target, self.config.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y(), self.aspect, self.config.near, self.config.far)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_portrait_doubles_fov() {
        let landscape = Camera::new(CameraConfig::default(), Extent2d::new(1280, 720));
        let portrait = Camera::new(CameraConfig::default(), Extent2d::new(720, 1280));
        assert!((landscape.fov_y() - 70f32.to_radians()).abs() < 1e-6);
        assert!((portrait.fov_y() - 140f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn test_view_looks_at_target() {
        let camera = Camera::new(CameraConfig::default(), Extent2d::new(800, 600));
        let eye_in_view = camera.view_matrix().transform_point3(Vec3::new(0.0, 0.7, 1.5));
        assert!(eye_in_view.length() < 1e-5);

        // Target lies straight ahead on -Z
        let target = camera.view_matrix().transform_point3(Vec3::new(0.0, -0.1, 0.0));
        assert!(target.x.abs() < 1e-5 && target.y.abs() < 1e-5);
        assert!(target.z < 0.0);
    }

    #[test]
    fn test_resize_updates_aspect() {
        let mut camera = Camera::new(CameraConfig::default(), Extent2d::new(100, 100));
        camera.resize(Extent2d::new(200, 100));
        assert_eq!(camera.aspect(), 2.0);
    }
}
