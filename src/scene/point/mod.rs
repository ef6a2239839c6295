pub use crate::error::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    /// Normalized
    pub color_rgb: [f64; 3],
    pub position: [f64; 3],
}

pub type Points = Vec<Point>;

/// Seed points for scene initialization.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeedPoints {
    /// Normalized colors, which is empty if the colors are unknown.
    pub colors_rgb: Vec<[f64; 3]>,
    pub positions: Vec<[f64; 3]>,
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub max: [f64; 3],
    pub min: [f64; 3],
}

impl SeedPoints {
    /// Seed points without colors.
    pub fn from_positions(positions: Vec<[f64; 3]>) -> Self {
        Self {
            colors_rgb: vec![],
            positions,
        }
    }

    #[inline]
    pub fn has_colors(&self) -> bool {
        !self.colors_rgb.is_empty()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.has_colors() && self.colors_rgb.len() != self.len() {
            return Err(Error::MismatchedPointCount(
                "seed colors".into(),
                self.colors_rgb.len(),
                self.len(),
            ));
        }
        if let Some(color) = self
            .colors_rgb
            .iter()
            .flatten()
            .find(|c| !(0.0..=1.0).contains(*c))
        {
            return Err(Error::Validation(
                format!("seed color component ({color})"),
                "in the range of [0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

impl From<Points> for SeedPoints {
    fn from(points: Points) -> Self {
        let (colors_rgb, positions) = points
            .into_iter()
            .map(|point| (point.color_rgb, point.position))
            .unzip();
        Self {
            colors_rgb,
            positions,
        }
    }
}

impl Bounds {
    /// Bounds from `[min_x, min_y, min_z, max_x, max_y, max_z]`.
    pub fn from_slice(values: &[f64]) -> Result<Self, Error> {
        if values.len() != 6 {
            return Err(Error::Validation(
                format!("bounds length ({})", values.len()),
                "6".into(),
            ));
        }
        let bounds = Self {
            max: [values[3], values[4], values[5]],
            min: [values[0], values[1], values[2]],
        };
        if (0..3).any(|i| {
            bounds.min[i].is_nan()
                || bounds.max[i].is_nan()
                || bounds.min[i] > bounds.max[i]
        }) {
            return Err(Error::Validation(
                format!("bounds ({values:?})"),
                "ordered as minimum then maximum".into(),
            ));
        }
        Ok(bounds)
    }

    /// The smallest bounds containing all `positions`.
    pub fn from_positions(positions: &[[f64; 3]]) -> Option<Self> {
        let first = positions.first()?;
        Some(positions.iter().fold(
            Self {
                max: *first,
                min: *first,
            },
            |mut bounds, position| {
                (0..3).for_each(|i| {
                    bounds.max[i] = bounds.max[i].max(position[i]);
                    bounds.min[i] = bounds.min[i].min(position[i]);
                });
                bounds
            },
        ))
    }

    #[inline]
    pub fn center(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| (self.max[i] + self.min[i]) / 2.0)
    }

    #[inline]
    pub fn size(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| self.max[i] - self.min[i])
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn seed_points_from_points() {
        use super::*;

        let points = vec![
            Point {
                color_rgb: [1.0, 0.5, 0.0],
                position: [1.0, 2.0, 3.0],
            },
            Point {
                color_rgb: [0.0, 0.25, 1.0],
                position: [-1.0, 0.0, 4.0],
            },
        ];
        let seeds = SeedPoints::from(points);

        assert_eq!(seeds.len(), 2);
        assert!(seeds.has_colors());
        assert_eq!(seeds.positions[1], [-1.0, 0.0, 4.0]);
        assert_eq!(seeds.colors_rgb[0], [1.0, 0.5, 0.0]);
        seeds.validate().unwrap();
    }

    #[test]
    fn seed_points_validate_invalid() {
        use super::*;

        let mut seeds = SeedPoints::from_positions(vec![[0.0; 3]; 3]);
        seeds.validate().unwrap();

        seeds.colors_rgb = vec![[0.5; 3]; 2];
        assert!(matches!(
            seeds.validate(),
            Err(Error::MismatchedPointCount(_, 2, 3))
        ));

        seeds.colors_rgb = vec![[0.5, 0.5, 255.0]; 3];
        assert!(matches!(seeds.validate(), Err(Error::Validation(..))));
    }

    #[test]
    fn bounds() {
        use super::*;

        let bounds = Bounds::from_slice(&[-1.0, 0.0, 2.0, 1.0, 4.0, 2.0]).unwrap();
        assert_eq!(bounds.center(), [0.0, 2.0, 2.0]);
        assert_eq!(bounds.size(), [2.0, 4.0, 0.0]);

        assert!(Bounds::from_slice(&[0.0; 5]).is_err());
        assert!(Bounds::from_slice(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]).is_err());

        let bounds =
            Bounds::from_positions(&[[0.0, 1.0, 2.0], [-3.0, 5.0, 1.0]]).unwrap();
        assert_eq!(bounds.min, [-3.0, 1.0, 1.0]);
        assert_eq!(bounds.max, [0.0, 5.0, 2.0]);
        assert_eq!(Bounds::from_positions(&[]), None);
    }
}
