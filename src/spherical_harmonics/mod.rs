use std::{f64::consts::PI, sync::LazyLock};

/// The count of spherical harmonics coefficients
pub const SH_COUNT_MAX: usize = sh_count(SH_DEGREE_MAX);

/// The maximum degree of spherical harmonics
pub const SH_DEGREE_MAX: u32 = 3;

/// The coefficient count of spherical harmonics up to `degree`.
///
/// ## Examples
///
/// ```rust
/// use gausplat_trainer::spherical_harmonics::sh_count;
///
/// assert_eq!(sh_count(0), 1);
/// assert_eq!(sh_count(3), 16);
/// ```
#[inline]
pub const fn sh_count(degree: u32) -> usize {
    (degree as usize + 1).pow(2)
}

/// The degree of spherical harmonics having `count` coefficients.
///
/// It returns [`None`] if `count` is not a perfect square.
pub fn sh_degree(count: usize) -> Option<u32> {
    (0..=SH_DEGREE_MAX).find(|&degree| sh_count(degree) == count)
}

/// Converting normalized RGB colors to the 0th-order coefficient.
#[inline]
pub fn rgb_to_sh(color: f64) -> f64 {
    (color - 0.5) / SH_COEF.0[0]
}

/// Converting the 0th-order coefficient to normalized RGB colors.
#[inline]
pub fn sh_to_rgb(coefficient: f64) -> f64 {
    coefficient * SH_COEF.0[0] + 0.5
}

/// The real coefficients of orthonormalized spherical harmonics from degree 0 to 3
///
/// ## Examples
///
/// ```rust
/// use gausplat_trainer::spherical_harmonics::SH_COEF;
///
/// assert_eq!(SH_COEF.0[0], 0.28209479177387814);
/// assert_eq!(SH_COEF.3[3 + 2], 1.445305721320277);
/// ```
#[allow(clippy::type_complexity)]
pub static SH_COEF: LazyLock<([f64; 1], [f64; 3], [f64; 5], [f64; 7])> =
    LazyLock::new(|| {
        (
            [(1.0 / 4.0 / PI).sqrt()],
            [
                -(3.0 / 4.0 / PI).sqrt(),
                (3.0 / 4.0 / PI).sqrt(),
                -(3.0 / 4.0 / PI).sqrt(),
            ],
            [
                (15.0 / 4.0 / PI).sqrt(),
                -(15.0 / 4.0 / PI).sqrt(),
                (5.0 / 16.0 / PI).sqrt(),
                -(15.0 / 4.0 / PI).sqrt(),
                (15.0 / 16.0 / PI).sqrt(),
            ],
            [
                -(35.0 / 32.0 / PI).sqrt(),
                (105.0 / 4.0 / PI).sqrt(),
                -(21.0 / 32.0 / PI).sqrt(),
                (7.0 / 16.0 / PI).sqrt(),
                -(21.0 / 32.0 / PI).sqrt(),
                (105.0 / 16.0 / PI).sqrt(),
                -(35.0 / 32.0 / PI).sqrt(),
            ],
        )
    });

#[cfg(test)]
mod tests {
    #[test]
    fn sh_degree() {
        use super::*;

        assert_eq!(sh_degree(1), Some(0));
        assert_eq!(sh_degree(4), Some(1));
        assert_eq!(sh_degree(9), Some(2));
        assert_eq!(sh_degree(16), Some(3));
        assert_eq!(sh_degree(15), None);
        assert_eq!(sh_degree(25), None);
    }

    #[test]
    fn rgb_to_sh_and_back() {
        use super::*;

        assert_eq!(rgb_to_sh(0.5), 0.0);
        for color in [0.0, 0.1, 0.73, 1.0] {
            let output = sh_to_rgb(rgb_to_sh(color));
            assert!((output - color).abs() < 1e-12, "{output} != {color}");
        }
    }
}
