use std::f64::consts::TAU;

/// Useful enumerations for detector sides and harmonic orders.
pub mod enums;
/// Running mean and variance accumulators.
pub mod stats;
/// Traits to give additional functionality to [`nalgebra::Vector3`] (in particular, to treat it
/// as a direction in collider coordinates).
pub mod vectors;

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
/// # See Also
/// [`get_bin_index`]
pub fn get_bin_edges(bins: usize, range: (f64, f64)) -> Vec<f64> {
    let bin_width = (range.1 - range.0) / (bins as f64);
    (0..=bins)
        .map(|i| range.0 + (i as f64 * bin_width))
        .collect()
}

/// A helper method to obtain the index of a bin where a value should go in a histogram with evenly
/// spaced `bins` over a given `range`
///
/// # See Also
/// [`get_bin_edges`]
pub fn get_bin_index(value: f64, bins: usize, limits: (f64, f64)) -> Option<usize> {
    if value >= limits.0 && value < limits.1 {
        let bin_width = (limits.1 - limits.0) / bins as f64;
        let bin_index = ((value - limits.0) / bin_width).floor() as usize;
        Some(bin_index.min(bins - 1))
    } else {
        None
    }
}

/// Wrap an angle into `[0, period)`.
///
/// Returns [`None`] for non-finite angles or a non-positive period. For every finite `psi` the
/// result satisfies `0 <= wrap < period`, and wrapping an already wrapped angle returns it
/// unchanged.
pub fn wrap_angle(psi: f64, period: f64) -> Option<f64> {
    if !psi.is_finite() || !period.is_finite() || period <= 0.0 {
        return None;
    }
    let wrapped = psi.rem_euclid(period);
    // rem_euclid rounds tiny negative inputs up to exactly `period`
    if wrapped >= period {
        Some(0.0)
    } else {
        Some(wrapped)
    }
}

/// Wrap an azimuth into `[0, 2pi)`.
pub fn wrap_phi(phi: f64) -> Option<f64> {
    wrap_angle(phi, TAU)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_binning() {
        let bin_index = get_bin_index(0.0, 3, (0.0, 1.0));
        assert_eq!(bin_index, Some(0));
        let bin_index = get_bin_index(0.1, 3, (0.0, 1.0));
        assert_eq!(bin_index, Some(0));
        let bin_index = get_bin_index(0.5, 3, (0.0, 1.0));
        assert_eq!(bin_index, Some(1));
        let bin_index = get_bin_index(0.9, 3, (0.0, 1.0));
        assert_eq!(bin_index, Some(2));
        let bin_index = get_bin_index(1.0, 3, (0.0, 1.0));
        assert_eq!(bin_index, None);
        let bin_index = get_bin_index(-0.1, 3, (0.0, 1.0));
        assert_eq!(bin_index, None);
        let edges = get_bin_edges(4, (0.0, 1.0));
        assert_eq!(edges, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_wrap_known_values() {
        assert_relative_eq!(wrap_angle(-PI / 2.0, TAU).unwrap(), 3.0 * PI / 2.0);
        assert_relative_eq!(wrap_angle(5.0 * PI / 2.0, TAU).unwrap(), PI / 2.0);
        assert_relative_eq!(wrap_angle(PI, PI).unwrap(), 0.0);
        assert_relative_eq!(wrap_angle(-0.1, PI).unwrap(), PI - 0.1);
        assert_eq!(wrap_angle(-1e-18, TAU), Some(0.0));
        assert_eq!(wrap_angle(f64::NAN, TAU), None);
        assert_eq!(wrap_angle(f64::INFINITY, TAU), None);
        assert_eq!(wrap_angle(1.0, 0.0), None);
    }

    #[test]
    fn test_wrap_range_and_idempotence() {
        for period in [TAU, PI, TAU / 3.0] {
            for _ in 0..10_000 {
                let psi = (fastrand::f64() - 0.5) * 1e4;
                let wrapped = wrap_angle(psi, period).unwrap();
                assert!((0.0..period).contains(&wrapped), "{psi} -> {wrapped}");
                assert_eq!(wrap_angle(wrapped, period), Some(wrapped));
            }
        }
    }
}
