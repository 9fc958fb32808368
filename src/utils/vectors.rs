use nalgebra::Vector3;

use crate::utils::wrap_phi;

/// Collider-coordinate accessors for a three-vector whose $`z`$-axis points along the beam.
pub trait ThreeVector {
    /// The transverse magnitude $`\sqrt{x^2 + y^2}`$.
    fn pt(&self) -> f64;
    /// The azimuthal angle wrapped into $`[0, 2\pi)`$, or [`None`] for a vector along the beam.
    fn phi(&self) -> Option<f64>;
    /// The cosine of the polar angle.
    fn costheta(&self) -> f64;
    /// The pseudorapidity $`\eta = -\ln\tan(\theta/2)`$. Vectors along the beam give an
    /// infinite value.
    fn eta(&self) -> f64;
}

impl ThreeVector for Vector3<f64> {
    fn pt(&self) -> f64 {
        self.x.hypot(self.y)
    }

    fn phi(&self) -> Option<f64> {
        if self.x == 0.0 && self.y == 0.0 {
            None
        } else {
            wrap_phi(self.y.atan2(self.x))
        }
    }

    fn costheta(&self) -> f64 {
        self.z / self.norm()
    }

    fn eta(&self) -> f64 {
        let pt = self.pt();
        if pt == 0.0 {
            return f64::INFINITY.copysign(self.z);
        }
        (self.z / pt).asinh()
    }
}
