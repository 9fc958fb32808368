use auto_ops::impl_op_ex;
use serde::{Deserialize, Serialize};

use crate::{
    event_plane::hits::DetectorHit,
    utils::{enums::Harmonic, wrap_angle},
    FlowError, FlowResult,
};

/// A flow vector $`\vec{Q}_n = \sum_i w_i (\cos n\phi_i, \sin n\phi_i)`$ for one region of one
/// event, together with the bookkeeping needed to decide whether it defines an angle.
///
/// The zero vector is a valid state meaning "no angle".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QVector {
    /// The $`x`$ component.
    pub x: f64,
    /// The $`y`$ component.
    pub y: f64,
    /// Sum of the weights of the contributing hits.
    pub sum_weight: f64,
    /// Number of contributing hits.
    pub count: usize,
}

impl QVector {
    /// A vector with the given components and no bookkeeping.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            ..Default::default()
        }
    }

    /// Add one hit at azimuth `phi` with weight `weight`.
    pub fn add(&mut self, phi: f64, weight: f64, harmonic: Harmonic) {
        let n_phi = harmonic.as_f64() * phi;
        self.x += weight * n_phi.cos();
        self.y += weight * n_phi.sin();
        self.sum_weight += weight;
        self.count += 1;
    }

    /// The length of the vector.
    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Whether both components are exactly zero.
    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    /// The event-plane angle $`\text{atan2}(Q_y, Q_x)/n`$ wrapped into $`[0, 2\pi/n)`$.
    ///
    /// Returns [`None`] when fewer than `min_hits` hits contributed or the vector vanishes.
    pub fn angle(&self, harmonic: Harmonic, min_hits: usize) -> Option<f64> {
        if self.count < min_hits || self.is_zero() {
            return None;
        }
        wrap_angle(self.y.atan2(self.x) / harmonic.as_f64(), harmonic.period())
    }
}

impl_op_ex!(+ |a: &QVector, b: &QVector| -> QVector {
    QVector {
        x: a.x + b.x,
        y: a.y + b.y,
        sum_weight: a.sum_weight + b.sum_weight,
        count: a.count + b.count,
    }
});
impl_op_ex!(-|a: &QVector| -> QVector {
    QVector {
        x: -a.x,
        y: -a.y,
        ..*a
    }
});

/// A slice of $`|\eta|`$ with the weight its hits receive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EtaBin {
    /// Lower edge of $`|\eta|`$ (inclusive).
    pub low: f64,
    /// Upper edge of $`|\eta|`$ (exclusive).
    pub high: f64,
    /// Weight applied to hits in this slice.
    pub weight: f64,
}

impl EtaBin {
    /// Construct a new slice.
    pub fn new(low: f64, high: f64, weight: f64) -> Self {
        Self { low, high, weight }
    }
    /// Whether `abs_eta` lies in `[low, high)`.
    pub fn contains(&self, abs_eta: f64) -> bool {
        self.low <= abs_eta && abs_eta < self.high
    }
    /// Whether the two slices have any $`|\eta|`$ in common.
    pub fn overlaps(&self, other: &EtaBin) -> bool {
        self.low < other.high && other.low < self.high
    }
}

/// A named pseudorapidity region: a lookup table from $`|\eta|`$ to hit weight.
///
/// Regions may overlap each other, but the slices of one region may not. Only regions that
/// share no hits are correlated as sub-events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaRegion {
    /// Name used in histogram and calibration keys.
    pub name: String,
    /// The weighted $`|\eta|`$ slices.
    pub bins: Vec<EtaBin>,
}

impl EtaRegion {
    /// Construct a new region.
    pub fn new(name: impl Into<String>, bins: Vec<EtaBin>) -> Self {
        Self {
            name: name.into(),
            bins,
        }
    }

    /// The weight of a hit at `abs_eta`, zero outside the region.
    pub fn weight(&self, abs_eta: f64) -> f64 {
        self.bins
            .iter()
            .find(|bin| bin.contains(abs_eta))
            .map_or(0.0, |bin| bin.weight)
    }

    /// Whether a hit can contribute to both regions. Sub-events used for resolution must not
    /// share hits.
    pub fn shares_hits_with(&self, other: &EtaRegion) -> bool {
        self.bins.iter().filter(|a| a.weight > 0.0).any(|a| {
            other
                .bins
                .iter()
                .filter(|b| b.weight > 0.0)
                .any(|b| a.overlaps(b))
        })
    }

    /// Check the slices for empty ranges, bad weights and overlaps.
    pub fn validate(&self) -> FlowResult<()> {
        let invalid = |reason: String| {
            Err(FlowError::InvalidConfig {
                reason: format!("eta region \"{}\": {reason}", self.name),
            })
        };
        if self.name.is_empty() || self.name.contains('/') {
            return invalid("name must be non-empty and free of '/'".to_string());
        }
        if self.bins.is_empty() {
            return invalid("no eta bins".to_string());
        }
        for bin in &self.bins {
            if !(bin.low >= 0.0 && bin.low < bin.high) {
                return invalid(format!("bad range [{}, {})", bin.low, bin.high));
            }
            if !(bin.weight.is_finite() && bin.weight >= 0.0) {
                return invalid(format!("bad weight {}", bin.weight));
            }
        }
        for (i, a) in self.bins.iter().enumerate() {
            if self.bins[i + 1..].iter().any(|b| a.overlaps(b)) {
                return invalid(format!("slice [{}, {}) overlaps another", a.low, a.high));
            }
        }
        Ok(())
    }
}

/// Accumulate one [`QVector`] per region from the selected hits.
///
/// Hits outside a region (zero region weight) do not count towards that region's hit count.
pub fn accumulate(hits: &[DetectorHit], regions: &[EtaRegion], harmonic: Harmonic) -> Vec<QVector> {
    regions
        .iter()
        .map(|region| {
            let mut q = QVector::default();
            for hit in hits {
                let region_weight = region.weight(hit.eta.abs());
                if region_weight > 0.0 {
                    q.add(hit.phi, region_weight * hit.weight, harmonic);
                }
            }
            q
        })
        .collect()
}
