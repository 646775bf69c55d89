use glam::Mat4;

/// Spin of the cube around the Y axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    angle: f32,
    radians_per_second: f32,
    enabled: bool,
}

impl Rotation {
    pub fn new(radians_per_second: f32, enabled: bool) -> Self {
        Self {
            angle: 0.0,
            radians_per_second,
            enabled,
        }
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    /// Advance the angle if rotation is enabled.
    pub fn advance(&mut self, elapsed_seconds: f64) {
        if self.enabled {
            self.angle =
                (self.angle + (elapsed_seconds as f32) * self.radians_per_second) % std::f32::consts::TAU;
        }
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_rotation_y(self.angle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    #[test]
    fn test_double_toggle_restores_state() {
        let mut rotation = Rotation::new(FRAC_PI_4, false);
        rotation.toggle();
        assert!(rotation.is_enabled());
        rotation.toggle();
        assert!(!rotation.is_enabled());
    }

    #[test]
    fn test_advance_only_when_enabled() {
        let mut rotation = Rotation::new(FRAC_PI_4, false);
        rotation.advance(1.0);
        assert_eq!(rotation.angle(), 0.0);

        rotation.toggle();
        rotation.advance(2.0);
        assert!((rotation.angle() - 2.0 * FRAC_PI_4).abs() < 1e-6);
    }
}
