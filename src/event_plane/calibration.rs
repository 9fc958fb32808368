//! Recentering and flattening corrections and the accumulators that produce them.
//!
//! A [`CalibrationProfile`] is read once at the start of a pass and never changes during it.
//! The pass feeds every event into a [`CalibrationBuilder`], whose [`finish`](CalibrationBuilder::finish)
//! merges the new measurements with the profile the pass started from. Running the same input
//! three times, each time feeding the previous output back in, moves the analysis through the
//! three [`CorrectionStage`]s.
use std::fmt::Display;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    event_plane::qvector::QVector,
    utils::{enums::Harmonic, stats::RunningStats, wrap_angle},
    FlowError, FlowResult, ReadWrite,
};

/// Identifies one set of correction constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalibrationKey {
    /// Name of the pseudorapidity region.
    pub region: String,
    /// Harmonic order of the plane.
    pub harmonic: Harmonic,
    /// Centrality bin index.
    pub centrality: usize,
}

impl CalibrationKey {
    /// Construct a new key.
    pub fn new(region: impl Into<String>, harmonic: Harmonic, centrality: usize) -> Self {
        Self {
            region: region.into(),
            harmonic,
            centrality,
        }
    }
}

impl Display for CalibrationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/cent{}",
            self.region,
            self.harmonic.order(),
            self.centrality
        )
    }
}

/// Mean and width of the $`Q`$-vector components for one key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecenterEntry {
    /// Mean of $`Q_x`$.
    pub mean_x: f64,
    /// Mean of $`Q_y`$.
    pub mean_y: f64,
    /// Population standard deviation of $`Q_x`$.
    pub sigma_x: f64,
    /// Population standard deviation of $`Q_y`$.
    pub sigma_y: f64,
    /// Number of events measured.
    pub entries: u64,
}

impl RecenterEntry {
    fn is_degenerate(&self) -> bool {
        !(self.sigma_x.is_finite()
            && self.sigma_y.is_finite()
            && self.sigma_x > 0.0
            && self.sigma_y > 0.0)
    }
}

/// Fourier coefficients $`\langle\sin(kn\Psi)\rangle`$ and $`\langle\cos(kn\Psi)\rangle`$ for
/// $`k = 1, \ldots, k_{\max}`$.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftEntry {
    /// $`\langle\sin(kn\Psi)\rangle`$, index `k - 1`.
    pub sin_avg: Vec<f64>,
    /// $`\langle\cos(kn\Psi)\rangle`$, index `k - 1`.
    pub cos_avg: Vec<f64>,
    /// Number of events measured.
    pub entries: u64,
}

impl ShiftEntry {
    /// The highest Fourier term available.
    pub fn order(&self) -> usize {
        self.sin_avg.len().min(self.cos_avg.len())
    }
}

/// How far a profile can correct the angles of one harmonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CorrectionStage {
    /// No constants: angles are used as measured.
    Raw,
    /// Recentering constants only.
    Recentered,
    /// Recentering and flattening constants.
    Flattened,
}

impl Display for CorrectionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrectionStage::Raw => write!(f, "raw"),
            CorrectionStage::Recentered => write!(f, "recentered"),
            CorrectionStage::Flattened => write!(f, "flattened"),
        }
    }
}

/// The correction constants of a run, keyed by [`CalibrationKey`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    recenter: IndexMap<CalibrationKey, RecenterEntry>,
    shift: IndexMap<CalibrationKey, ShiftEntry>,
}

impl ReadWrite for CalibrationProfile {}

impl CalibrationProfile {
    /// Add or replace a recentering entry.
    pub fn insert_recenter(&mut self, key: CalibrationKey, entry: RecenterEntry) {
        self.recenter.insert(key, entry);
    }

    /// Add or replace a flattening entry.
    pub fn insert_shift(&mut self, key: CalibrationKey, entry: ShiftEntry) {
        self.shift.insert(key, entry);
    }

    /// The recentering entry for a key.
    pub fn recenter_entry(&self, key: &CalibrationKey) -> Option<&RecenterEntry> {
        self.recenter.get(key)
    }

    /// The flattening entry for a key.
    pub fn shift_entry(&self, key: &CalibrationKey) -> Option<&ShiftEntry> {
        self.shift.get(key)
    }

    /// Number of recentering entries.
    pub fn n_recenter(&self) -> usize {
        self.recenter.len()
    }

    /// Number of flattening entries.
    pub fn n_shift(&self) -> usize {
        self.shift.len()
    }

    /// Whether the profile holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.recenter.is_empty() && self.shift.is_empty()
    }

    /// The most complete correction this profile supports for `harmonic`.
    pub fn stage(&self, harmonic: Harmonic) -> CorrectionStage {
        let has_recenter = self.recenter.keys().any(|key| key.harmonic == harmonic);
        let has_shift = self.shift.keys().any(|key| key.harmonic == harmonic);
        match (has_recenter, has_shift) {
            (true, true) => CorrectionStage::Flattened,
            (true, false) => CorrectionStage::Recentered,
            _ => CorrectionStage::Raw,
        }
    }

    /// Return $`Q' = (Q - \langle Q\rangle)/\sigma_Q`$, component-wise.
    ///
    /// # Errors
    ///
    /// [`FlowError::MissingCalibration`] if the key has no entry and
    /// [`FlowError::DegenerateCalibration`] if either width is zero, negative or not finite.
    pub fn recenter(&self, key: &CalibrationKey, q: &QVector) -> FlowResult<QVector> {
        let entry = self
            .recenter
            .get(key)
            .ok_or_else(|| FlowError::MissingCalibration {
                key: key.to_string(),
            })?;
        if entry.is_degenerate() {
            return Err(FlowError::DegenerateCalibration {
                key: key.to_string(),
                sigma_x: entry.sigma_x,
                sigma_y: entry.sigma_y,
            });
        }
        Ok(QVector {
            x: (q.x - entry.mean_x) / entry.sigma_x,
            y: (q.y - entry.mean_y) / entry.sigma_y,
            ..*q
        })
    }

    /// Apply the Fourier shift correction to a recentered angle.
    ///
    /// # Errors
    ///
    /// [`FlowError::MissingCalibration`] if the key has no flattening entry.
    pub fn flatten(&self, key: &CalibrationKey, psi: f64) -> FlowResult<Option<f64>> {
        let entry = self
            .shift
            .get(key)
            .ok_or_else(|| FlowError::MissingCalibration {
                key: key.to_string(),
            })?;
        Ok(flatten_angle(
            psi,
            key.harmonic,
            &entry.sin_avg,
            &entry.cos_avg,
        ))
    }
}

/// The truncated Fourier shift
/// ```math
/// \Psi' = \Psi + \sum_{k=1}^{k_{\max}} \frac{2}{kn}\left(-\langle\sin kn\Psi\rangle\cos kn\Psi
///   + \langle\cos kn\Psi\rangle\sin kn\Psi\right)
/// ```
/// wrapped into $`[0, 2\pi/n)`$.
pub fn flatten_angle(psi: f64, harmonic: Harmonic, sin_avg: &[f64], cos_avg: &[f64]) -> Option<f64> {
    let n = harmonic.as_f64();
    let shift: f64 = sin_avg
        .iter()
        .zip(cos_avg)
        .enumerate()
        .map(|(i, (s, c))| {
            let k = (i + 1) as f64;
            let arg = k * n * psi;
            2.0 / (k * n) * (-s * arg.cos() + c * arg.sin())
        })
        .sum();
    wrap_angle(psi + shift, harmonic.period())
}

#[derive(Debug, Clone, Default)]
struct ShiftAccumulator {
    sin: Vec<RunningStats>,
    cos: Vec<RunningStats>,
}

/// Collects the statistics for the next calibration step during a pass.
#[derive(Debug, Clone)]
pub struct CalibrationBuilder {
    flatten_order: usize,
    recenter: IndexMap<CalibrationKey, (RunningStats, RunningStats)>,
    shift: IndexMap<CalibrationKey, ShiftAccumulator>,
}

impl CalibrationBuilder {
    /// A builder measuring Fourier terms up to `flatten_order`.
    pub fn new(flatten_order: usize) -> Self {
        Self {
            flatten_order,
            recenter: IndexMap::new(),
            shift: IndexMap::new(),
        }
    }

    /// Record a raw $`Q`$-vector for the recentering step.
    pub fn fill_recenter(&mut self, key: &CalibrationKey, q: &QVector) {
        let (x, y) = self.recenter.entry(key.clone()).or_default();
        x.push(q.x);
        y.push(q.y);
    }

    /// Record a recentered angle for the flattening step.
    pub fn fill_shift(&mut self, key: &CalibrationKey, psi: f64) {
        let order = self.flatten_order;
        let accumulator = self
            .shift
            .entry(key.clone())
            .or_insert_with(|| ShiftAccumulator {
                sin: vec![RunningStats::default(); order],
                cos: vec![RunningStats::default(); order],
            });
        let n = key.harmonic.as_f64();
        for (i, (s, c)) in accumulator
            .sin
            .iter_mut()
            .zip(accumulator.cos.iter_mut())
            .enumerate()
        {
            let arg = (i + 1) as f64 * n * psi;
            s.push(arg.sin());
            c.push(arg.cos());
        }
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.recenter.is_empty() && self.shift.is_empty()
    }

    /// Merge the measurements into a copy of `input`.
    ///
    /// Keys measured in fewer than `min_entries` events are left out, as are recentering
    /// measurements with a vanishing width. New entries replace input entries with the same key.
    pub fn finish(self, input: &CalibrationProfile, min_entries: u64) -> CalibrationProfile {
        let mut profile = input.clone();
        for (key, (x, y)) in self.recenter {
            if x.entries() < min_entries {
                continue;
            }
            let entry = RecenterEntry {
                mean_x: x.mean(),
                mean_y: y.mean(),
                sigma_x: x.std_dev(),
                sigma_y: y.std_dev(),
                entries: x.entries(),
            };
            if entry.is_degenerate() {
                warn!(%key, "dropping recentering entry with vanishing width");
                continue;
            }
            profile.insert_recenter(key, entry);
        }
        for (key, accumulator) in self.shift {
            let entries = accumulator.sin.first().map_or(0, RunningStats::entries);
            if entries < min_entries {
                continue;
            }
            profile.insert_shift(
                key,
                ShiftEntry {
                    sin_avg: accumulator.sin.iter().map(RunningStats::mean).collect(),
                    cos_avg: accumulator.cos.iter().map(RunningStats::mean).collect(),
                    entries,
                },
            );
        }
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::temp_path;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::f64::consts::{FRAC_PI_2, PI, TAU};

    fn key() -> CalibrationKey {
        CalibrationKey::new("full", Harmonic::First, 3)
    }

    #[test]
    fn test_key_display() {
        assert_eq!(key().to_string(), "full/1/cent3");
    }

    #[test]
    fn test_recenter() {
        let mut profile = CalibrationProfile::default();
        profile.insert_recenter(
            key(),
            RecenterEntry {
                mean_x: 1.0,
                mean_y: -2.0,
                sigma_x: 2.0,
                sigma_y: 4.0,
                entries: 100,
            },
        );
        let q = QVector {
            x: 3.0,
            y: 2.0,
            sum_weight: 5.0,
            count: 6,
        };
        let q_rc = profile.recenter(&key(), &q).unwrap();
        assert_relative_eq!(q_rc.x, 1.0);
        assert_relative_eq!(q_rc.y, 1.0);
        assert_eq!(q_rc.count, 6);
        let other = CalibrationKey::new("full", Harmonic::First, 4);
        assert!(matches!(
            profile.recenter(&other, &q),
            Err(FlowError::MissingCalibration { .. })
        ));
    }

    #[test]
    fn test_zero_sigma_is_rejected() {
        for (sigma_x, sigma_y) in [(0.0, 1.0), (1.0, 0.0), (-1.0, 1.0), (f64::NAN, 1.0)] {
            let mut profile = CalibrationProfile::default();
            profile.insert_recenter(
                key(),
                RecenterEntry {
                    mean_x: 0.0,
                    mean_y: 0.0,
                    sigma_x,
                    sigma_y,
                    entries: 10,
                },
            );
            assert!(matches!(
                profile.recenter(&key(), &QVector::new(1.0, 1.0)),
                Err(FlowError::DegenerateCalibration { .. })
            ));
        }
    }

    #[test]
    fn test_flatten_with_zero_coefficients_is_identity() {
        for psi in [0.0, 0.3, FRAC_PI_2, 3.0] {
            assert_relative_eq!(
                flatten_angle(psi, Harmonic::Second, &[0.0; 4], &[0.0; 4]).unwrap(),
                psi.rem_euclid(PI),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_uniform_profile_is_idempotent() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut builder = CalibrationBuilder::new(8);
        let angles: Vec<f64> = (0..20000).map(|_| rng.gen_range(0.0..TAU)).collect();
        for psi in &angles {
            builder.fill_shift(&key(), *psi);
        }
        let profile = builder.finish(&CalibrationProfile::default(), 10);
        let entry = profile.shift_entry(&key()).unwrap();
        assert_eq!(entry.order(), 8);
        assert_eq!(entry.entries, 20000);
        let max_shift = angles
            .iter()
            .map(|psi| {
                let flat = profile.flatten(&key(), *psi).unwrap().unwrap();
                let diff = (flat - psi).rem_euclid(TAU);
                diff.min(TAU - diff)
            })
            .fold(0.0, f64::max);
        // coefficients of a uniform sample are O(1/sqrt(N))
        assert!(max_shift < 0.15, "max shift {max_shift}");
    }

    #[test]
    fn test_flattening_removes_a_first_harmonic_bias() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut biased = Vec::new();
        while biased.len() < 20000 {
            let psi: f64 = rng.gen_range(0.0..TAU);
            // accept with probability (1 + 0.4 cos psi) / 1.4
            if rng.gen::<f64>() * 1.4 < 1.0 + 0.4 * psi.cos() {
                biased.push(psi);
            }
        }
        let mut builder = CalibrationBuilder::new(6);
        for psi in &biased {
            builder.fill_shift(&key(), *psi);
        }
        let profile = builder.finish(&CalibrationProfile::default(), 10);
        let (before, after) = biased.iter().fold((0.0, 0.0), |(b, a), psi| {
            let flat = profile.flatten(&key(), *psi).unwrap().unwrap();
            (b + psi.cos(), a + flat.cos())
        });
        let n = biased.len() as f64;
        assert!(before / n > 0.15);
        assert!((after / n).abs() < 0.03);
    }

    #[test]
    fn test_flattening_removes_a_second_harmonic_bias() {
        let key = CalibrationKey::new("full", Harmonic::Second, 0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut biased = Vec::new();
        while biased.len() < 20000 {
            let psi: f64 = rng.gen_range(0.0..PI);
            // accept with probability (1 + 0.3 cos 2psi) / 1.3
            if rng.gen::<f64>() * 1.3 < 1.0 + 0.3 * (2.0 * psi).cos() {
                biased.push(psi);
            }
        }
        let mut builder = CalibrationBuilder::new(10);
        for psi in &biased {
            builder.fill_shift(&key, *psi);
        }
        let profile = builder.finish(&CalibrationProfile::default(), 10);
        let entry = profile.shift_entry(&key).unwrap();
        assert!(entry.cos_avg[0] > 0.1);
        let n = biased.len() as f64;
        let mean_cos2 = |angles: &mut dyn Iterator<Item = f64>| -> f64 {
            angles.map(|psi| (2.0 * psi).cos()).sum::<f64>() / n
        };
        let before = mean_cos2(&mut biased.iter().copied());
        let after = mean_cos2(&mut biased.iter().map(|psi| {
            let flat = profile.flatten(&key, *psi).unwrap().unwrap();
            assert!((0.0..PI).contains(&flat));
            flat
        }));
        assert!(before > 0.1, "raw <cos 2psi> = {before}");
        assert!(after.abs() < 0.02, "flattened <cos 2psi> = {after}");

        // a shift of 2/k without the 1/n overcorrects and flips the sign of the bias
        let doubled = |avg: &[f64]| avg.iter().map(|v| 2.0 * v).collect::<Vec<_>>();
        let (sin2, cos2) = (doubled(&entry.sin_avg), doubled(&entry.cos_avg));
        let overcorrected = mean_cos2(&mut biased.iter().map(|psi| {
            flatten_angle(*psi, Harmonic::Second, &sin2, &cos2).unwrap()
        }));
        assert!(overcorrected < -0.1, "2/k shift gives <cos 2psi> = {overcorrected}");
    }

    #[test]
    fn test_builder_recenter_and_stages() {
        let mut builder = CalibrationBuilder::new(4);
        for i in 0..20 {
            let offset = if i % 2 == 0 { 1.0 } else { -1.0 };
            builder.fill_recenter(&key(), &QVector::new(2.0 + offset, -1.0 + 2.0 * offset));
        }
        let sparse = CalibrationKey::new("inner", Harmonic::First, 0);
        builder.fill_recenter(&sparse, &QVector::new(1.0, 1.0));
        let profile = builder.finish(&CalibrationProfile::default(), 10);
        assert_eq!(profile.n_recenter(), 1);
        let entry = profile.recenter_entry(&key()).unwrap();
        assert_relative_eq!(entry.mean_x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(entry.mean_y, -1.0, epsilon = 1e-12);
        assert_relative_eq!(entry.sigma_x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(entry.sigma_y, 2.0, epsilon = 1e-12);
        assert_eq!(profile.stage(Harmonic::First), CorrectionStage::Recentered);
        assert_eq!(profile.stage(Harmonic::Second), CorrectionStage::Raw);

        let mut next = CalibrationBuilder::new(4);
        for _ in 0..10 {
            next.fill_shift(&key(), 1.0);
        }
        let merged = next.finish(&profile, 10);
        assert_eq!(merged.n_recenter(), 1);
        assert_eq!(merged.n_shift(), 1);
        assert_eq!(merged.stage(Harmonic::First), CorrectionStage::Flattened);
    }

    #[test]
    fn test_constant_q_is_not_written() {
        let mut builder = CalibrationBuilder::new(2);
        for _ in 0..50 {
            builder.fill_recenter(&key(), &QVector::new(1.0, 1.0));
        }
        assert!(builder
            .finish(&CalibrationProfile::default(), 10)
            .is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let mut builder = CalibrationBuilder::new(3);
        for i in 0..30 {
            builder.fill_recenter(&key(), &QVector::new(i as f64, -(i as f64) * 0.5));
            builder.fill_shift(&key(), 0.1 * i as f64);
        }
        let profile = builder.finish(&CalibrationProfile::default(), 10);
        let path = temp_path("calibration.bin");
        let path_str = path.to_str().unwrap();
        profile.save(path_str).unwrap();
        let loaded = CalibrationProfile::load(path_str).unwrap();
        assert_eq!(loaded, profile);
        std::fs::remove_file(path).unwrap();
    }
}
