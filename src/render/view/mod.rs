pub use crate::error::Error;

/// A pinhole camera view in 3D space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct View {
    /// Affine transformation from view space to world space.
    ///
    /// It is in **row-major order**, i.e., `M[row][col]`.
    ///
    /// # Format
    ///
    /// ```plaintext
    /// [R     | T  ]
    /// [...   | ...]
    /// [0 0 0 | 1  ]
    /// ```
    pub camera_to_world: [[f64; 4]; 4],
    /// Image height.
    pub image_height: u32,
    /// Image width.
    pub image_width: u32,
    /// Pinhole intrinsics.
    ///
    /// It is in **row-major order**, i.e., `K[row][col]`.
    ///
    /// # Format
    ///
    /// ```plaintext
    /// [f_x 0   c_x]
    /// [0   f_y c_y]
    /// [0   0   1  ]
    /// ```
    pub intrinsics: [[f64; 3]; 3],
    /// View ID.
    pub view_id: u32,
}

impl Default for View {
    fn default() -> Self {
        Self {
            camera_to_world: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
            image_height: 1,
            image_width: 1,
            intrinsics: [[1.0, 0.0, 0.5], [0.0, 1.0, 0.5], [0.0, 0.0, 1.0]],
            view_id: 0,
        }
    }
}

impl View {
    /// Creating a view from flattened row-major matrices.
    ///
    /// `camera_to_world` should have 16 elements and `intrinsics` should have 9.
    pub fn try_new(
        camera_to_world: &[f64],
        intrinsics: &[f64],
        image_width: u32,
        image_height: u32,
    ) -> Result<Self, Error> {
        if camera_to_world.len() != 16 {
            return Err(Error::Validation(
                format!("camera_to_world length ({})", camera_to_world.len()),
                "16 (4 x 4)".into(),
            ));
        }
        if intrinsics.len() != 9 {
            return Err(Error::Validation(
                format!("intrinsics length ({})", intrinsics.len()),
                "9 (3 x 3)".into(),
            ));
        }

        let mut view = Self {
            image_height,
            image_width,
            ..Default::default()
        };
        view.camera_to_world
            .iter_mut()
            .flatten()
            .zip(camera_to_world)
            .for_each(|(target, source)| *target = *source);
        view.intrinsics
            .iter_mut()
            .flatten()
            .zip(intrinsics)
            .for_each(|(target, source)| *target = *source);

        view.validate()?;
        Ok(view)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(Error::Validation(
                format!("image size ({} x {})", self.image_width, self.image_height),
                "positive".into(),
            ));
        }
        let (focal_x, focal_y) = self.focal();
        if !(focal_x > 0.0 && focal_y > 0.0 && focal_x.is_finite() && focal_y.is_finite())
        {
            return Err(Error::Validation(
                format!("focal lengths ({focal_x}, {focal_y})"),
                "positive and finite".into(),
            ));
        }
        if self.camera_to_world.iter().flatten().any(|v| !v.is_finite()) {
            return Err(Error::Validation(
                "camera_to_world".into(),
                "finite".into(),
            ));
        }
        Ok(())
    }
}

/// Camera parameters
impl View {
    /// `(f_x, f_y)`
    #[inline]
    pub const fn focal(&self) -> (f64, f64) {
        (self.intrinsics[0][0], self.intrinsics[1][1])
    }

    /// `(c_x, c_y)`
    #[inline]
    pub const fn principal(&self) -> (f64, f64) {
        (self.intrinsics[0][2], self.intrinsics[1][2])
    }

    /// The tangents of half the field of view, `(tan(fov_x / 2), tan(fov_y / 2))`.
    #[inline]
    pub fn tan_half_field_of_view(&self) -> (f64, f64) {
        let (focal_x, focal_y) = self.focal();
        (
            self.image_width as f64 / 2.0 / focal_x,
            self.image_height as f64 / 2.0 / focal_y,
        )
    }

    /// Position in world space.
    #[inline]
    pub const fn view_position(&self) -> [f64; 3] {
        [
            self.camera_to_world[0][3],
            self.camera_to_world[1][3],
            self.camera_to_world[2][3],
        ]
    }

    /// Rotation from world space to view space, `R_v = R^T`.
    ///
    /// It is in **row-major order**.
    #[inline]
    pub fn view_rotation(&self) -> [[f64; 3]; 3] {
        let m = &self.camera_to_world;
        [0, 1, 2].map(|row| [0, 1, 2].map(|col| m[col][row]))
    }

    /// Translation from world space to view space, `T_v = -R^T * T`.
    #[inline]
    pub fn view_translation(&self) -> [f64; 3] {
        let rotation = self.view_rotation();
        let position = self.view_position();
        rotation.map(|row| -(0..3).map(|i| row[i] * position[i]).sum::<f64>())
    }

    /// The view downscaled by `factor`.
    ///
    /// The intrinsics are divided by `factor`,
    /// and the image size is floor-divided by `factor`.
    pub fn downscaled(
        &self,
        factor: u32,
    ) -> Self {
        let factor = factor.max(1);
        let mut view = *self;
        let scale = 1.0 / factor as f64;
        view.intrinsics[0][0] *= scale;
        view.intrinsics[0][2] *= scale;
        view.intrinsics[1][1] *= scale;
        view.intrinsics[1][2] *= scale;
        view.image_height = (self.image_height / factor).max(1);
        view.image_width = (self.image_width / factor).max(1);
        view
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn try_new() {
        use super::*;

        let view = View::try_new(
            &[
                0.0, -1.0, 0.0, 1.0, //
                1.0, 0.0, 0.0, 2.0, //
                0.0, 0.0, 1.0, 3.0, //
                0.0, 0.0, 0.0, 1.0,
            ],
            &[100.0, 0.0, 32.0, 0.0, 120.0, 24.0, 0.0, 0.0, 1.0],
            64,
            48,
        )
        .unwrap();

        assert_eq!(view.focal(), (100.0, 120.0));
        assert_eq!(view.principal(), (32.0, 24.0));
        assert_eq!(view.view_position(), [1.0, 2.0, 3.0]);
        assert_eq!(
            view.view_rotation(),
            [[0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]
        );
        assert_eq!(view.view_translation(), [-2.0, 1.0, -3.0]);
        assert_eq!(view.tan_half_field_of_view(), (0.32, 0.2));
    }

    #[test]
    fn try_new_invalid() {
        use super::*;

        let intrinsics = [1.0, 0.0, 0.5, 0.0, 1.0, 0.5, 0.0, 0.0, 1.0];
        let camera_to_world = View::default()
            .camera_to_world
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        let output = View::try_new(&camera_to_world[..12], &intrinsics, 2, 2);
        assert!(matches!(output, Err(Error::Validation(..))));

        let output = View::try_new(&camera_to_world, &intrinsics[..4], 2, 2);
        assert!(matches!(output, Err(Error::Validation(..))));

        let output = View::try_new(&camera_to_world, &intrinsics, 0, 2);
        assert!(matches!(output, Err(Error::Validation(..))));

        let output = View::try_new(&camera_to_world, &[0.0; 9], 2, 2);
        assert!(matches!(output, Err(Error::Validation(..))));

        View::try_new(&camera_to_world, &intrinsics, 2, 2).unwrap();
    }

    #[test]
    fn downscaled() {
        use super::*;

        let view = View {
            image_height: 1081,
            image_width: 1920,
            intrinsics: [[1000.0, 0.0, 960.0], [0.0, 1000.0, 540.0], [0.0, 0.0, 1.0]],
            ..Default::default()
        };

        let output = view.downscaled(4);
        assert_eq!(output.image_width, 480);
        assert_eq!(output.image_height, 270);
        assert_eq!(output.focal(), (250.0, 250.0));
        assert_eq!(output.principal(), (240.0, 135.0));

        assert_eq!(view.downscaled(1), view);
    }
}
