//! Event-plane resolution from the correlation of two equal sub-events.
//!
//! For a plane reconstructed with resolution parameter $`\chi`$, the resolution for the
//! $`k`$-th multiple of its harmonic is
//! ```math
//! R_k(\chi) = \frac{\sqrt{\pi}}{2\sqrt{2}}\,\chi\,e^{-\chi^2/4}
//!   \left[I_{(k-1)/2}\left(\tfrac{\chi^2}{4}\right) + I_{(k+1)/2}\left(\tfrac{\chi^2}{4}\right)\right].
//! ```
//! Two independent halves of the detector give $`R_{\text{sub}} = \sqrt{\langle\cos n(\Psi_a - \Psi_b)\rangle}`$,
//! and since $`\chi \propto \sqrt{N}`$ the full plane has $`R = R_k(\sqrt{2}\chi_{\text{sub}})`$.
use std::{f64::consts::PI, fmt::Display};

const MAX_CHI: f64 = 20.0;

/// $`\Gamma(z)`$ for positive multiples of one half.
fn gamma_half_integer(z: f64) -> f64 {
    let (mut value, mut x) = if (z.fract() - 0.5).abs() < 1e-12 {
        (PI.sqrt(), 0.5)
    } else {
        (1.0, 1.0)
    };
    while x < z - 1e-12 {
        value *= x;
        x += 1.0;
    }
    value
}

/// The modified Bessel function $`I_\nu(x)`$ for half-integer or integer $`\nu \ge 0`$,
/// summed from its power series.
pub fn bessel_i(nu: f64, x: f64) -> f64 {
    let half_x = x / 2.0;
    let mut term = half_x.powf(nu) / gamma_half_integer(nu + 1.0);
    let mut sum = term;
    let mut m = 0.0;
    while term.abs() > f64::EPSILON * sum.abs() && m < 1000.0 {
        m += 1.0;
        term *= half_x * half_x / (m * (m + nu));
        sum += term;
    }
    sum
}

/// $`R_k(\chi)`$ as defined in the module documentation.
pub fn resolution_function(chi: f64, k: usize) -> f64 {
    let a = chi * chi / 4.0;
    let k = k as f64;
    PI.sqrt() / (2.0 * 2.0_f64.sqrt())
        * chi
        * (-a).exp()
        * (bessel_i((k - 1.0) / 2.0, a) + bessel_i((k + 1.0) / 2.0, a))
}

/// Invert [`resolution_function`] by bisection. Returns [`None`] unless `0 < r < 1`.
pub fn solve_chi(r: f64, k: usize) -> Option<f64> {
    if !(r > 0.0 && r < 1.0) {
        return None;
    }
    let (mut low, mut high) = (0.0, MAX_CHI);
    if resolution_function(high, k) < r {
        return None;
    }
    for _ in 0..200 {
        let mid = 0.5 * (low + high);
        if resolution_function(mid, k) < r {
            low = mid;
        } else {
            high = mid;
        }
        if high - low < 1e-12 {
            break;
        }
    }
    Some(0.5 * (low + high))
}

/// The resolution derived from one sub-event correlation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubEventResolution {
    /// The measured $`\langle\cos n(\Psi_a - \Psi_b)\rangle`$.
    pub correlation: f64,
    /// The resolution of either sub-event plane.
    pub sub: f64,
    /// $`\chi`$ of a sub-event.
    pub chi_sub: f64,
    /// The resolution of the combined plane.
    pub full: f64,
}

impl SubEventResolution {
    /// Derive the resolutions for harmonic multiple `k`. Returns [`None`] for a non-positive
    /// correlation, which carries no resolution information.
    pub fn from_correlation(correlation: f64, k: usize) -> Option<Self> {
        if !(correlation > 0.0) {
            return None;
        }
        let sub = correlation.sqrt();
        let chi_sub = solve_chi(sub, k)?;
        Some(Self {
            correlation,
            sub,
            chi_sub,
            full: resolution_function(2.0_f64.sqrt() * chi_sub, k),
        })
    }
}

impl Display for SubEventResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<cos> = {:.5}, R_sub = {:.5}, chi_sub = {:.4}, R_full = {:.5}",
            self.correlation, self.sub, self.chi_sub, self.full
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gamma_and_bessel() {
        assert_relative_eq!(gamma_half_integer(1.0), 1.0);
        assert_relative_eq!(gamma_half_integer(4.0), 6.0);
        assert_relative_eq!(gamma_half_integer(0.5), PI.sqrt());
        assert_relative_eq!(gamma_half_integer(2.5), 0.75 * PI.sqrt(), epsilon = 1e-14);
        assert_relative_eq!(bessel_i(0.0, 1.0), 1.2660658777520082, epsilon = 1e-13);
        assert_relative_eq!(bessel_i(1.0, 3.0), 3.953370217402609, epsilon = 1e-12);
        // I_{1/2}(x) = sqrt(2 / (pi x)) sinh(x)
        assert_relative_eq!(
            bessel_i(0.5, 2.0),
            (2.0 / (PI * 2.0)).sqrt() * 2.0_f64.sinh(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_resolution_function() {
        assert_eq!(resolution_function(0.0, 1), 0.0);
        assert_relative_eq!(resolution_function(1.0, 1), 0.5571794683822477, epsilon = 1e-12);
        assert_relative_eq!(resolution_function(2.0, 1), 0.8443201636405565, epsilon = 1e-12);
        assert_relative_eq!(resolution_function(2.0, 2), 0.5676676416183063, epsilon = 1e-12);
        let mut previous = 0.0;
        for i in 1..100 {
            let r = resolution_function(i as f64 * 0.1, 1);
            assert!(r > previous && r < 1.0);
            previous = r;
        }
    }

    #[test]
    fn test_solve_chi_inverts() {
        for r in [0.05, 0.3, 0.6, 0.9, 0.99] {
            let chi = solve_chi(r, 1).unwrap();
            assert_relative_eq!(resolution_function(chi, 1), r, epsilon = 1e-9);
        }
        assert!(solve_chi(0.0, 1).is_none());
        assert!(solve_chi(1.0, 1).is_none());
        assert!(solve_chi(f64::NAN, 1).is_none());
    }

    #[test]
    fn test_sub_event_resolution() {
        let res = SubEventResolution::from_correlation(0.36, 1).unwrap();
        assert_relative_eq!(res.sub, 0.6, epsilon = 1e-12);
        assert_relative_eq!(res.chi_sub, 1.1023919701968552, epsilon = 1e-8);
        assert_relative_eq!(res.full, 0.7515906201730911, epsilon = 1e-8);
        assert!(res.full > res.sub);
        assert!(SubEventResolution::from_correlation(-0.01, 1).is_none());
        assert!(SubEventResolution::from_correlation(0.0, 1).is_none());
    }
}
