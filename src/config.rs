//! Renderer configuration

use glam::Vec3;

/// Camera placement and projection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    /// Vertical field of view in landscape orientation.
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_y_degrees: 70.0,
            near: 0.01,
            far: 100.0,
            eye: Vec3::new(0.0, 0.7, 1.5),
            target: Vec3::new(0.0, -0.1, 0.0),
            up: Vec3::Y,
        }
    }
}

/// Renderer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Back buffer clear color, linear RGBA.
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    /// Cube rotation speed in radians per second.
    pub rotation_speed: f32,
    /// Whether the cube starts out rotating.
    pub rotate_on_start: bool,
    pub camera: CameraConfig,
    /// Feedback tile edge in texels.
    pub feedback_tile_size: u32,
    /// Edge of the square feedback overlay in pixels.
    pub overlay_canvas_size: u32,
    /// Mip image files, largest first.
    pub mip_file_names: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.3, 0.58, 0.93, 1.0],
            clear_depth: 1.0,
            rotation_speed: std::f32::consts::FRAC_PI_4,
            rotate_on_start: false,
            camera: CameraConfig::default(),
            feedback_tile_size: 16,
            overlay_canvas_size: 400,
            mip_file_names: (1..=6).map(|i| format!("{i}.png")).collect(),
        }
    }
}

impl RendererConfig {
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_rotation_speed(mut self, radians_per_second: f32) -> Self {
        self.rotation_speed = radians_per_second;
        self
    }

    pub fn with_rotation_enabled(mut self, enabled: bool) -> Self {
        self.rotate_on_start = enabled;
        self
    }

    pub fn with_camera(mut self, camera: CameraConfig) -> Self {
        self.camera = camera;
        self
    }

    pub fn with_feedback_tile_size(mut self, texels: u32) -> Self {
        self.feedback_tile_size = texels;
        self
    }

    pub fn with_overlay_canvas_size(mut self, pixels: u32) -> Self {
        self.overlay_canvas_size = pixels;
        self
    }

    pub fn with_mip_file_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mip_file_names = names.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mip_names() {
        let config = RendererConfig::default();
        assert_eq!(config.mip_file_names.len(), 6);
        assert_eq!(config.mip_file_names[0], "1.png");
        assert_eq!(config.mip_file_names[5], "6.png");
    }

    #[test]
    fn test_builders() {
        let config = RendererConfig::default()
            .with_rotation_enabled(true)
            .with_overlay_canvas_size(256)
            .with_mip_file_names(["a.png", "b.png"]);
        assert!(config.rotate_on_start);
        assert_eq!(config.overlay_canvas_size, 256);
        assert_eq!(config.mip_file_names, vec!["a.png", "b.png"]);
    }
}
