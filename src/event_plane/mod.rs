use crate::{
    config::{EventPlaneConfig, HitCuts},
    data::Event,
    geometry::{EpdGeometry, TileGeometry},
    utils::enums::{Harmonic, Side},
    FlowError, FlowResult,
};

/// Recentering and flattening constants and their accumulators.
pub mod calibration;
/// Selection of forward-detector hits and their vertex-relative coordinates.
pub mod hits;
/// Flow vectors and pseudorapidity regions.
pub mod qvector;
/// Sub-event resolution and the $`R_k(\chi)`$ function.
pub mod resolution;

use calibration::{CalibrationKey, CalibrationProfile, CorrectionStage};
use hits::{select_hits, DetectorHit};
use qvector::{accumulate, EtaRegion, QVector};

/// Every stage of the event-plane angle for one region of one event.
///
/// Angles are [`None`] when the region has too few hits, the $`Q`$-vector vanishes, or the
/// profile does not reach that stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPlane {
    /// The $`Q`$-vector as accumulated (after the odd-harmonic flip, if any).
    pub q_raw: QVector,
    /// The angle of [`RegionPlane::q_raw`].
    pub psi_raw: Option<f64>,
    /// The recentered $`Q`$-vector.
    pub q_recentered: Option<QVector>,
    /// The angle of [`RegionPlane::q_recentered`].
    pub psi_recentered: Option<f64>,
    /// The recentered angle after the Fourier shift.
    pub psi_flat: Option<f64>,
    /// Whether a correction was skipped because the profile has no entry for this event's key.
    pub missing_calibration: bool,
}

impl RegionPlane {
    fn raw(q_raw: QVector, psi_raw: Option<f64>) -> Self {
        Self {
            q_raw,
            psi_raw,
            q_recentered: None,
            psi_recentered: None,
            psi_flat: None,
            missing_calibration: false,
        }
    }

    /// The angle at exactly `stage`, [`None`] if this region did not reach it.
    pub fn stage_angle(&self, stage: CorrectionStage) -> Option<f64> {
        match stage {
            CorrectionStage::Raw => self.psi_raw,
            CorrectionStage::Recentered => self.psi_recentered,
            CorrectionStage::Flattened => self.psi_flat,
        }
    }
}

/// Reconstructs the event plane of each configured region, applying whatever corrections the
/// calibration profile supports.
#[derive(Debug, Clone)]
pub struct EventPlane<G: TileGeometry = EpdGeometry> {
    config: EventPlaneConfig,
    hit_cuts: HitCuts,
    geometry: G,
    profile: CalibrationProfile,
    stage: CorrectionStage,
}

impl<G: TileGeometry> EventPlane<G> {
    /// Construct a reconstructor. The correction stage is fixed here from the profile.
    pub fn new(
        config: EventPlaneConfig,
        hit_cuts: HitCuts,
        geometry: G,
        profile: CalibrationProfile,
    ) -> Self {
        let stage = profile.stage(config.harmonic);
        Self {
            config,
            hit_cuts,
            geometry,
            profile,
            stage,
        }
    }

    /// The corrections applied by [`EventPlane::reconstruct`].
    pub fn stage(&self) -> CorrectionStage {
        self.stage
    }

    /// The harmonic order of the plane.
    pub fn harmonic(&self) -> Harmonic {
        self.config.harmonic
    }

    /// The configured regions.
    pub fn regions(&self) -> &[EtaRegion] {
        &self.config.regions
    }

    /// The calibration profile in use.
    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    /// The calibration key of a region in a centrality bin.
    pub fn key(&self, region: &EtaRegion, centrality: usize) -> CalibrationKey {
        CalibrationKey::new(region.name.as_str(), self.config.harmonic, centrality)
    }

    /// Select and position the event's hits on the configured side.
    pub fn select(&self, event: &Event) -> FlowResult<Vec<DetectorHit>> {
        select_hits(
            &event.hits,
            &event.vertex,
            self.config.side,
            &self.hit_cuts,
            &self.geometry,
        )
    }

    /// One $`Q`$-vector per region, flipped for odd harmonics on the east side when configured.
    pub fn q_vectors(&self, hits: &[DetectorHit]) -> Vec<QVector> {
        let flip = self.config.odd_harmonic_flip
            && self.config.harmonic.is_odd()
            && self.config.side == Side::East;
        accumulate(hits, &self.config.regions, self.config.harmonic)
            .into_iter()
            .map(|q| if flip { -q } else { q })
            .collect()
    }

    /// Reconstruct every region of an event classified into centrality bin `centrality`.
    ///
    /// # Errors
    ///
    /// Propagates [`FlowError::InvalidTile`] from hit selection and
    /// [`FlowError::DegenerateCalibration`] from recentering. A missing calibration entry is
    /// not an error: the affected region is flagged and left at the last stage it reached.
    pub fn reconstruct(&self, event: &Event, centrality: usize) -> FlowResult<Vec<RegionPlane>> {
        self.reconstruct_hits(&self.select(event)?, centrality)
    }

    /// Reconstruct every region from hits already returned by [`EventPlane::select`].
    ///
    /// # Errors
    ///
    /// Propagates [`FlowError::DegenerateCalibration`] from recentering.
    pub fn reconstruct_hits(
        &self,
        hits: &[DetectorHit],
        centrality: usize,
    ) -> FlowResult<Vec<RegionPlane>> {
        let harmonic = self.config.harmonic;
        let min_hits = self.config.min_hits;
        self.q_vectors(hits)
            .into_iter()
            .zip(&self.config.regions)
            .map(|(q_raw, region)| {
                let mut plane = RegionPlane::raw(q_raw, q_raw.angle(harmonic, min_hits));
                if plane.psi_raw.is_none() || self.stage == CorrectionStage::Raw {
                    return Ok(plane);
                }
                let key = self.key(region, centrality);
                let q_rc = match self.profile.recenter(&key, &q_raw) {
                    Ok(q_rc) => q_rc,
                    Err(FlowError::MissingCalibration { .. }) => {
                        plane.missing_calibration = true;
                        return Ok(plane);
                    }
                    Err(err) => return Err(err),
                };
                plane.q_recentered = Some(q_rc);
                plane.psi_recentered = q_rc.angle(harmonic, min_hits);
                if self.stage < CorrectionStage::Flattened {
                    return Ok(plane);
                }
                if let Some(psi_rc) = plane.psi_recentered {
                    match self.profile.flatten(&key, psi_rc) {
                        Ok(psi_flat) => plane.psi_flat = psi_flat,
                        Err(FlowError::MissingCalibration { .. }) => {
                            plane.missing_calibration = true
                        }
                        Err(err) => return Err(err),
                    }
                }
                Ok(plane)
            })
            .collect()
    }
}
