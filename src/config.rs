use std::fs;

use serde::{Deserialize, Serialize};

use crate::{
    centrality::{CentralityBin, CentralityClassifier},
    event_plane::qvector::{EtaBin, EtaRegion},
    expand_path,
    utils::enums::{Harmonic, Side},
    FlowError, FlowResult,
};

/// Every tunable number used by an analysis pass.
///
/// All fields have defaults, so a TOML file only needs to list the values it changes:
///
/// ```toml
/// [event_plane]
/// harmonic = 2
/// flatten_order = 12
///
/// [event_cuts]
/// vz_range = [-30.0, 30.0]
/// vr_center = [0.0, 0.0]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Vertex and trigger selection.
    pub event_cuts: EventCuts,
    /// Good-track definition used for multiplicity and flow observables.
    pub track_cuts: TrackCuts,
    /// Forward-detector hit selection.
    pub hit_cuts: HitCuts,
    /// Event-plane reconstruction parameters.
    pub event_plane: EventPlaneConfig,
    /// Multiplicity thresholds for centrality classes.
    pub centrality: CentralityConfig,
    /// Binning of the output histograms.
    pub binning: HistogramBinning,
}

impl AnalysisConfig {
    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(text: &str) -> FlowResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration from a TOML file and validate it.
    pub fn from_toml_file(file_path: &str) -> FlowResult<Self> {
        let path = expand_path(file_path)?;
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> FlowResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> FlowResult<()> {
        self.event_cuts.validate()?;
        self.hit_cuts.validate()?;
        self.event_plane.validate()?;
        self.binning.validate()?;
        CentralityClassifier::new(self.centrality.bins.clone())?;
        Ok(())
    }
}

fn invalid<T>(reason: impl Into<String>) -> FlowResult<T> {
    Err(FlowError::InvalidConfig {
        reason: reason.into(),
    })
}

/// Event-level selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventCuts {
    /// Accepted primary-vertex $`z`$ window in cm, exclusive at both ends.
    pub vz_range: (f64, f64),
    /// Beam-spot centre $`(x, y)`$ in cm.
    pub vr_center: (f64, f64),
    /// Maximum transverse distance of the vertex from the beam-spot centre in cm.
    pub vr_max: f64,
    /// Maximum $`|v_z - v_z^{\text{VPD}}|`$ in cm; disabled when absent.
    pub max_vz_vpd_diff: Option<f64>,
    /// The event must carry at least one of these trigger ids. An empty list accepts all.
    pub trigger_ids: Vec<i32>,
}

impl Default for EventCuts {
    fn default() -> Self {
        Self {
            vz_range: (198.0, 202.0),
            vr_center: (0.0, -2.0),
            vr_max: 2.0,
            max_vz_vpd_diff: None,
            trigger_ids: vec![620052],
        }
    }
}

impl EventCuts {
    fn validate(&self) -> FlowResult<()> {
        if !(self.vz_range.0 < self.vz_range.1) {
            return invalid(format!("empty vz range {:?}", self.vz_range));
        }
        if !(self.vr_max > 0.0) {
            return invalid(format!("vr_max must be positive, got {}", self.vr_max));
        }
        if let Some(diff) = self.max_vz_vpd_diff {
            if !(diff > 0.0) {
                return invalid(format!("max_vz_vpd_diff must be positive, got {diff}"));
            }
        }
        Ok(())
    }
}

/// Good-track definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackCuts {
    /// Minimum number of fit points.
    pub min_n_hits_fit: u32,
    /// Minimum ratio of fit points to possible points.
    pub min_hits_ratio: f64,
    /// Maximum distance of closest approach to the primary vertex in cm.
    pub max_dca: f64,
    /// Minimum transverse momentum in GeV/c.
    pub min_pt: f64,
}

impl Default for TrackCuts {
    fn default() -> Self {
        Self {
            min_n_hits_fit: 15,
            min_hits_ratio: 0.52,
            max_dca: 3.0,
            min_pt: 0.1,
        }
    }
}

/// Forward-detector hit selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HitCuts {
    /// Hits below this many MIP equivalents are discarded.
    pub nmip_threshold: f64,
    /// Per-hit weights are clamped to this many MIP equivalents.
    pub max_weight: f64,
}

impl Default for HitCuts {
    fn default() -> Self {
        Self {
            nmip_threshold: 0.3,
            max_weight: 2.0,
        }
    }
}

impl HitCuts {
    fn validate(&self) -> FlowResult<()> {
        if !(self.nmip_threshold >= 0.0) {
            return invalid(format!(
                "nmip_threshold must be non-negative, got {}",
                self.nmip_threshold
            ));
        }
        if !(self.max_weight > 0.0) {
            return invalid(format!(
                "max_weight must be positive, got {}",
                self.max_weight
            ));
        }
        Ok(())
    }
}

/// Event-plane reconstruction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPlaneConfig {
    /// Harmonic order of the reconstructed plane.
    pub harmonic: Harmonic,
    /// Detector side whose hits build the plane.
    pub side: Side,
    /// Pseudorapidity regions, each yielding its own angle.
    pub regions: Vec<EtaRegion>,
    /// A region needs at least this many contributing hits to define an angle.
    pub min_hits: usize,
    /// Highest Fourier term used by the flattening correction.
    pub flatten_order: usize,
    /// Flip $`Q`$ for odd harmonics on the east side so both sides share one sign convention.
    pub odd_harmonic_flip: bool,
    /// Calibration keys with fewer events than this are not written out.
    pub min_calibration_entries: u64,
}

impl Default for EventPlaneConfig {
    fn default() -> Self {
        Self {
            harmonic: Harmonic::First,
            side: Side::East,
            regions: vec![
                EtaRegion::new("full", vec![EtaBin::new(2.0, 6.0, 1.0)]),
                EtaRegion::new("inner", vec![EtaBin::new(3.5, 6.0, 1.0)]),
                EtaRegion::new("outer", vec![EtaBin::new(2.0, 3.5, 1.0)]),
            ],
            min_hits: 5,
            flatten_order: 10,
            odd_harmonic_flip: true,
            min_calibration_entries: 10,
        }
    }
}

impl EventPlaneConfig {
    fn validate(&self) -> FlowResult<()> {
        if self.regions.is_empty() {
            return invalid("at least one eta region is required");
        }
        for region in &self.regions {
            region.validate()?;
        }
        for (i, a) in self.regions.iter().enumerate() {
            if self.regions[i + 1..].iter().any(|b| b.name == a.name) {
                return invalid(format!("duplicate region name \"{}\"", a.name));
            }
        }
        if self.flatten_order == 0 {
            return invalid("flatten_order must be at least 1");
        }
        Ok(())
    }
}

/// Multiplicity thresholds for centrality classes, ordered from most to least central.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralityConfig {
    /// Contiguous `[low, high)` multiplicity ranges.
    pub bins: Vec<CentralityBin>,
}

impl Default for CentralityConfig {
    fn default() -> Self {
        let edges: [(&str, u32, u32); 9] = [
            ("0-5%", 79, 196),
            ("5-10%", 64, 79),
            ("10-20%", 44, 64),
            ("20-30%", 30, 44),
            ("30-40%", 20, 30),
            ("40-50%", 13, 20),
            ("50-60%", 8, 13),
            ("60-70%", 5, 8),
            ("70-80%", 3, 5),
        ];
        Self {
            bins: edges
                .iter()
                .map(|(label, low, high)| CentralityBin::new(*label, *low, *high))
                .collect(),
        }
    }
}

/// Binning of the output histograms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramBinning {
    /// Bins used for every event-plane angle histogram.
    pub angle_bins: usize,
    /// Pseudorapidity bins of the track-flow profiles.
    pub eta_bins: usize,
    /// Pseudorapidity range of the track-flow profiles.
    pub eta_range: (f64, f64),
    /// Transverse-momentum bins of the track QA histograms.
    pub pt_bins: usize,
    /// Transverse-momentum range of the track QA histograms in GeV/c.
    pub pt_range: (f64, f64),
    /// Upper edge of the multiplicity histogram.
    pub max_multiplicity: u32,
    /// $`|\eta|`$ bins of the forward-hit occupancy map.
    pub hit_eta_bins: usize,
    /// $`|\eta|`$ range of the forward-hit occupancy map.
    pub hit_eta_range: (f64, f64),
}

impl Default for HistogramBinning {
    fn default() -> Self {
        Self {
            angle_bins: 100,
            eta_bins: 20,
            eta_range: (-2.0, 2.0),
            pt_bins: 40,
            pt_range: (0.0, 4.0),
            max_multiplicity: 300,
            hit_eta_bins: 50,
            hit_eta_range: (1.5, 6.5),
        }
    }
}

impl HistogramBinning {
    fn validate(&self) -> FlowResult<()> {
        if self.angle_bins == 0 || self.eta_bins == 0 || self.pt_bins == 0 || self.hit_eta_bins == 0
        {
            return invalid("histogram bin counts must be positive");
        }
        if !(self.eta_range.0 < self.eta_range.1)
            || !(self.pt_range.0 < self.pt_range.1)
            || !(self.hit_eta_range.0 < self.hit_eta_range.1)
        {
            return invalid("histogram ranges must be non-empty");
        }
        if self.max_multiplicity == 0 {
            return invalid("max_multiplicity must be positive");
        }
        Ok(())
    }
}
