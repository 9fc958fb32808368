use std::{f64::consts::TAU, fmt::Display};

use tracing::{info, warn};

use crate::{
    centrality::{Centrality, CentralityClassifier},
    config::AnalysisConfig,
    data::{Event, EventReader, Track},
    event_plane::{
        calibration::{CalibrationBuilder, CalibrationProfile, CorrectionStage},
        resolution::SubEventResolution,
        EventPlane, RegionPlane,
    },
    expand_path,
    geometry::{EpdGeometry, TileGeometry},
    histograms::{Axis, HistKey, HistogramStore},
    FlowResult, ReadWrite,
};

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOutcome {
    /// Passed every cut and was reconstructed.
    Accepted,
    /// None of the accepted trigger ids fired.
    Trigger,
    /// Vertex $`z`$ outside the window.
    Vz,
    /// Vertex too far from the beam spot.
    Vr,
    /// Vertex $`z`$ disagrees with the timing detector.
    VzVpd,
    /// Too few good tracks to classify.
    TooLow,
    /// Too many good tracks to be a single collision.
    Pileup,
}

impl EventOutcome {
    /// Every outcome, in cut-flow order.
    pub const ALL: [EventOutcome; 7] = [
        EventOutcome::Accepted,
        EventOutcome::Trigger,
        EventOutcome::Vz,
        EventOutcome::Vr,
        EventOutcome::VzVpd,
        EventOutcome::TooLow,
        EventOutcome::Pileup,
    ];

    /// Position in [`EventOutcome::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// A short label.
    pub fn label(&self) -> &'static str {
        match self {
            EventOutcome::Accepted => "accepted",
            EventOutcome::Trigger => "trigger",
            EventOutcome::Vz => "vz",
            EventOutcome::Vr => "vr",
            EventOutcome::VzVpd => "vz-vpd",
            EventOutcome::TooLow => "too low",
            EventOutcome::Pileup => "pileup",
        }
    }
}

/// Counts of each [`EventOutcome`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutFlow {
    counts: [u64; EventOutcome::ALL.len()],
}

impl CutFlow {
    /// Count one event.
    pub fn record(&mut self, outcome: EventOutcome) {
        self.counts[outcome.index()] += 1;
    }
    /// Events with the given outcome.
    pub fn count(&self, outcome: EventOutcome) -> u64 {
        self.counts[outcome.index()]
    }
    /// Events seen.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

impl Display for CutFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for outcome in EventOutcome::ALL {
            writeln!(f, "  {:<10} {}", outcome.label(), self.count(outcome))?;
        }
        Ok(())
    }
}

/// Everything a pass writes to while it runs.
#[derive(Debug, Clone)]
pub struct RunAccumulator {
    /// Output histograms.
    pub hists: HistogramStore,
    /// Statistics for the next calibration step.
    pub calibration: CalibrationBuilder,
    /// Event counts per outcome.
    pub cut_flow: CutFlow,
    /// Region-events whose correction was skipped for lack of a calibration entry.
    pub missing_calibration: u64,
}

struct RegionKeys {
    psi_raw: HistKey,
    psi_recentered: HistKey,
    psi_flat: HistKey,
    qx: HistKey,
    qy: HistKey,
}

/// The per-event analysis: cuts, centrality, event-plane reconstruction and histogram filling.
///
/// An `Analysis` never changes while events are processed; everything that accumulates lives in
/// the [`RunAccumulator`] passed to [`Analysis::process_event`].
pub struct Analysis<G: TileGeometry = EpdGeometry> {
    config: AnalysisConfig,
    classifier: CentralityClassifier,
    plane: EventPlane<G>,
    region_keys: Vec<RegionKeys>,
    pair_keys: Vec<(usize, usize, HistKey)>,
}

impl<G: TileGeometry> Analysis<G> {
    /// Validate the configuration and build the analysis.
    pub fn new(
        config: AnalysisConfig,
        geometry: G,
        profile: CalibrationProfile,
    ) -> FlowResult<Self> {
        config.validate()?;
        let classifier = CentralityClassifier::new(config.centrality.bins.clone())?;
        let plane = EventPlane::new(
            config.event_plane.clone(),
            config.hit_cuts.clone(),
            geometry,
            profile,
        );
        let regions = &config.event_plane.regions;
        let region_keys = regions
            .iter()
            .map(|region| RegionKeys {
                psi_raw: HistKey::new("psi_raw").with(&region.name),
                psi_recentered: HistKey::new("psi_recentered").with(&region.name),
                psi_flat: HistKey::new("psi_flat").with(&region.name),
                qx: HistKey::new("qx").with(&region.name),
                qy: HistKey::new("qy").with(&region.name),
            })
            .collect();
        let pair_keys = (0..regions.len())
            .flat_map(|a| ((a + 1)..regions.len()).map(move |b| (a, b)))
            .filter(|&(a, b)| !regions[a].shares_hits_with(&regions[b]))
            .map(|(a, b)| {
                let key = HistKey::new("correlation")
                    .with(&regions[a].name)
                    .with(&regions[b].name);
                (a, b, key)
            })
            .collect();
        Ok(Self {
            config,
            classifier,
            plane,
            region_keys,
            pair_keys,
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The centrality classifier.
    pub fn classifier(&self) -> &CentralityClassifier {
        &self.classifier
    }

    /// The event-plane reconstructor.
    pub fn event_plane(&self) -> &EventPlane<G> {
        &self.plane
    }

    /// The correction stage this pass runs at.
    pub fn stage(&self) -> CorrectionStage {
        self.plane.stage()
    }

    /// A fresh accumulator with every histogram booked.
    pub fn accumulator(&self) -> RunAccumulator {
        let binning = &self.config.binning;
        let cuts = &self.config.event_cuts;
        let n_cent = self.classifier.n_bins();
        let cent_axis = Axis::new(n_cent, (0.0, n_cent as f64));
        let angle_axis = Axis::new(binning.angle_bins, (0.0, self.plane.harmonic().period()));
        let eta_axis = Axis::new(binning.eta_bins, binning.eta_range);
        let pt_axis = Axis::new(binning.pt_bins, binning.pt_range);
        let n_outcomes = EventOutcome::ALL.len();

        let mut hists = HistogramStore::new();
        hists.book_1d(
            HistKey::new("event").with("cut_flow"),
            Axis::new(n_outcomes, (0.0, n_outcomes as f64)),
        );
        hists.book_1d(HistKey::new("event").with("vz"), Axis::new(100, cuts.vz_range));
        hists.book_1d(
            HistKey::new("event").with("vr"),
            Axis::new(50, (0.0, cuts.vr_max)),
        );
        hists.book_1d(
            HistKey::new("event").with("multiplicity"),
            Axis::new(
                binning.max_multiplicity as usize,
                (0.0, binning.max_multiplicity as f64),
            ),
        );
        hists.book_1d(HistKey::new("event").with("centrality"), cent_axis);
        hists.book_1d(HistKey::new("track").with("pt"), pt_axis);
        hists.book_1d(HistKey::new("track").with("eta"), eta_axis);
        hists.book_1d(
            HistKey::new("track").with("phi"),
            Axis::new(binning.angle_bins, (0.0, TAU)),
        );
        hists.book_2d(
            HistKey::new("hits").with("occupancy"),
            Axis::new(binning.hit_eta_bins, binning.hit_eta_range),
            Axis::new(binning.angle_bins, (0.0, TAU)),
        );
        for keys in &self.region_keys {
            hists.book_1d(keys.psi_raw.clone(), angle_axis);
            hists.book_1d(keys.psi_recentered.clone(), angle_axis);
            hists.book_1d(keys.psi_flat.clone(), angle_axis);
            hists.book_profile_1d(keys.qx.clone(), cent_axis);
            hists.book_profile_1d(keys.qy.clone(), cent_axis);
        }
        for (_, _, key) in &self.pair_keys {
            hists.book_profile_1d(key.clone(), cent_axis);
        }
        hists.book_profile_2d(HistKey::new("flow").with("eta"), cent_axis, eta_axis);
        hists.book_profile_2d(HistKey::new("flow").with("pt"), cent_axis, pt_axis);

        RunAccumulator {
            hists,
            calibration: CalibrationBuilder::new(self.config.event_plane.flatten_order),
            cut_flow: CutFlow::default(),
            missing_calibration: 0,
        }
    }

    /// Apply the event-level cuts, returning the first one that fails.
    pub fn event_cut(&self, event: &Event) -> Option<EventOutcome> {
        let cuts = &self.config.event_cuts;
        if !event.has_any_trigger(&cuts.trigger_ids) {
            return Some(EventOutcome::Trigger);
        }
        let vz = event.vertex.z;
        if !(vz > cuts.vz_range.0 && vz < cuts.vz_range.1) {
            return Some(EventOutcome::Vz);
        }
        if !(event.vr(cuts.vr_center) < cuts.vr_max) {
            return Some(EventOutcome::Vr);
        }
        if let (Some(max_diff), Some(vz_vpd)) = (cuts.max_vz_vpd_diff, event.vz_vpd) {
            if !((vz - vz_vpd).abs() < max_diff) {
                return Some(EventOutcome::VzVpd);
            }
        }
        None
    }

    /// Whether a track passes the good-track cuts.
    pub fn is_good_track(&self, track: &Track) -> bool {
        let cuts = &self.config.track_cuts;
        track.n_hits_fit >= cuts.min_n_hits_fit
            && track.hits_ratio() >= cuts.min_hits_ratio
            && track.dca < cuts.max_dca
            && track.pt() >= cuts.min_pt
    }

    /// Number of good tracks.
    pub fn multiplicity(&self, event: &Event) -> u32 {
        event
            .tracks
            .iter()
            .filter(|track| self.is_good_track(track))
            .count() as u32
    }

    /// Run one event through the analysis.
    ///
    /// Events failing a cut are counted and otherwise ignored. Errors are fatal for the pass:
    /// an unknown tile id or a degenerate calibration entry.
    pub fn process_event(
        &self,
        event: &Event,
        acc: &mut RunAccumulator,
    ) -> FlowResult<EventOutcome> {
        let outcome = self.classify_and_fill(event, acc)?;
        acc.cut_flow.record(outcome);
        acc.hists.fill_1d(
            &HistKey::new("event").with("cut_flow"),
            outcome.index() as f64,
            1.0,
        )?;
        Ok(outcome)
    }

    fn classify_and_fill(&self, event: &Event, acc: &mut RunAccumulator) -> FlowResult<EventOutcome> {
        if let Some(failed) = self.event_cut(event) {
            return Ok(failed);
        }
        let multiplicity = self.multiplicity(event);
        let centrality = match self.classifier.classify(multiplicity) {
            Centrality::Bin(index) => index,
            Centrality::Pileup => return Ok(EventOutcome::Pileup),
            Centrality::TooLow => return Ok(EventOutcome::TooLow),
        };
        let selected = self.plane.select(event)?;
        let planes = self.plane.reconstruct_hits(&selected, centrality)?;

        let hists = &mut acc.hists;
        let occupancy = HistKey::new("hits").with("occupancy");
        for hit in &selected {
            hists.fill_2d(&occupancy, hit.eta.abs(), hit.phi, hit.weight)?;
        }
        let cent = centrality as f64;
        hists.fill_1d(&HistKey::new("event").with("vz"), event.vertex.z, 1.0)?;
        hists.fill_1d(
            &HistKey::new("event").with("vr"),
            event.vr(self.config.event_cuts.vr_center),
            1.0,
        )?;
        hists.fill_1d(
            &HistKey::new("event").with("multiplicity"),
            multiplicity as f64,
            1.0,
        )?;
        hists.fill_1d(&HistKey::new("event").with("centrality"), cent, 1.0)?;

        for ((plane, keys), region) in planes
            .iter()
            .zip(&self.region_keys)
            .zip(self.plane.regions())
        {
            if plane.missing_calibration {
                acc.missing_calibration += 1;
            }
            let Some(psi_raw) = plane.psi_raw else {
                continue;
            };
            hists.fill_1d(&keys.psi_raw, psi_raw, 1.0)?;
            hists.fill_profile_1d(&keys.qx, cent, plane.q_raw.x)?;
            hists.fill_profile_1d(&keys.qy, cent, plane.q_raw.y)?;
            if let Some(psi) = plane.psi_recentered {
                hists.fill_1d(&keys.psi_recentered, psi, 1.0)?;
            }
            if let Some(psi) = plane.psi_flat {
                hists.fill_1d(&keys.psi_flat, psi, 1.0)?;
            }
            let key = self.plane.key(region, centrality);
            match self.stage() {
                CorrectionStage::Raw => acc.calibration.fill_recenter(&key, &plane.q_raw),
                CorrectionStage::Recentered => {
                    if let Some(psi) = plane.psi_recentered {
                        acc.calibration.fill_shift(&key, psi);
                    }
                }
                CorrectionStage::Flattened => {}
            }
        }

        // both sub-events at the pass's own stage, never one corrected and one raw
        let stage = self.stage();
        let n = self.plane.harmonic().as_f64();
        for (a, b, key) in &self.pair_keys {
            if let (Some(psi_a), Some(psi_b)) =
                (planes[*a].stage_angle(stage), planes[*b].stage_angle(stage))
            {
                hists.fill_profile_1d(key, cent, (n * (psi_a - psi_b)).cos())?;
            }
        }

        self.fill_tracks(event, cent, planes.first(), hists)?;
        Ok(EventOutcome::Accepted)
    }

    fn fill_tracks(
        &self,
        event: &Event,
        cent: f64,
        plane: Option<&RegionPlane>,
        hists: &mut HistogramStore,
    ) -> FlowResult<()> {
        let psi = plane.and_then(|plane| plane.psi_flat);
        let n = self.plane.harmonic().as_f64();
        for track in event.tracks.iter().filter(|track| self.is_good_track(track)) {
            let (pt, eta) = (track.pt(), track.eta());
            hists.fill_1d(&HistKey::new("track").with("pt"), pt, 1.0)?;
            hists.fill_1d(&HistKey::new("track").with("eta"), eta, 1.0)?;
            let Some(phi) = track.phi() else {
                continue;
            };
            hists.fill_1d(&HistKey::new("track").with("phi"), phi, 1.0)?;
            if let Some(psi) = psi {
                let v = (n * (phi - psi)).cos();
                hists.fill_profile_2d(&HistKey::new("flow").with("eta"), cent, eta, v)?;
                hists.fill_profile_2d(&HistKey::new("flow").with("pt"), cent, pt, v)?;
            }
        }
        Ok(())
    }

    /// Close the pass: hand back the histograms and the merged calibration profile.
    pub fn finish(&self, acc: RunAccumulator) -> (HistogramStore, CalibrationProfile) {
        let profile = acc.calibration.finish(
            self.plane.profile(),
            self.config.event_plane.min_calibration_entries,
        );
        (acc.hists, profile)
    }
}

/// Paths and limits of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassOptions {
    /// Input event file.
    pub input: String,
    /// Output histogram file.
    pub histogram_output: String,
    /// Output calibration file.
    pub calibration_output: String,
    /// Calibration produced by a previous pass, if any.
    pub calibration_input: Option<String>,
    /// Rows decoded per record batch.
    pub batch_size: usize,
    /// Stop after this many events.
    pub max_events: Option<usize>,
}

impl PassOptions {
    /// Options for a pass without calibration input.
    pub fn new(
        input: impl Into<String>,
        histogram_output: impl Into<String>,
        calibration_output: impl Into<String>,
    ) -> Self {
        Self {
            input: input.into(),
            histogram_output: histogram_output.into(),
            calibration_output: calibration_output.into(),
            calibration_input: None,
            batch_size: crate::data::io::DEFAULT_BATCH_SIZE,
            max_events: None,
        }
    }

    /// Read calibration constants from `path`.
    pub fn with_calibration_input(mut self, path: impl Into<String>) -> Self {
        self.calibration_input = Some(path.into());
        self
    }

    /// Decode `batch_size` rows at a time.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Stop after `max_events` events.
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = Some(max_events);
        self
    }
}

/// What a pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct PassSummary {
    /// The correction stage the pass ran at.
    pub stage: CorrectionStage,
    /// Event counts per outcome.
    pub cut_flow: CutFlow,
    /// Region-events whose correction was skipped for lack of a calibration entry.
    pub missing_calibration: u64,
    /// Histograms written.
    pub n_histograms: usize,
    /// Recentering entries written.
    pub n_recenter: usize,
    /// Flattening entries written.
    pub n_shift: usize,
}

impl Display for PassSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Pass at stage {}:", self.stage)?;
        writeln!(f, "  events read: {}", self.cut_flow.total())?;
        write!(f, "{}", self.cut_flow)?;
        writeln!(f, "  missing calibration: {}", self.missing_calibration)?;
        writeln!(f, "  histograms written: {}", self.n_histograms)?;
        writeln!(
            f,
            "  calibration entries: {} recentering, {} flattening",
            self.n_recenter, self.n_shift
        )
    }
}

/// Load a calibration profile, falling back to an empty one when the file does not exist.
pub fn load_profile(file_path: Option<&str>) -> FlowResult<CalibrationProfile> {
    let Some(file_path) = file_path else {
        return Ok(CalibrationProfile::default());
    };
    if !expand_path(file_path)?.exists() {
        warn!(path = file_path, "calibration file not found, running without corrections");
        return Ok(CalibrationProfile::default());
    }
    CalibrationProfile::load(file_path)
}

/// Run one full pass over an input file and write its outputs.
pub fn run_pass(config: &AnalysisConfig, options: &PassOptions) -> FlowResult<PassSummary> {
    let profile = load_profile(options.calibration_input.as_deref())?;
    let analysis = Analysis::new(config.clone(), EpdGeometry::default(), profile)?;
    let reader = EventReader::open_with_batch_size(&options.input, options.batch_size)?;
    info!(
        input = options.input.as_str(),
        events = reader.n_events(),
        stage = %analysis.stage(),
        harmonic = %config.event_plane.harmonic,
        "starting pass"
    );

    let mut acc = analysis.accumulator();
    for event in reader.take(options.max_events.unwrap_or(usize::MAX)) {
        analysis.process_event(&event?, &mut acc)?;
    }
    if acc.missing_calibration > 0 {
        warn!(
            count = acc.missing_calibration,
            "corrections skipped for keys absent from the calibration input"
        );
    }

    let cut_flow = acc.cut_flow.clone();
    let missing_calibration = acc.missing_calibration;
    let (hists, profile) = analysis.finish(acc);
    hists.save(&options.histogram_output)?;
    profile.save(&options.calibration_output)?;
    let summary = PassSummary {
        stage: analysis.stage(),
        cut_flow,
        missing_calibration,
        n_histograms: hists.len(),
        n_recenter: profile.n_recenter(),
        n_shift: profile.n_shift(),
    };
    info!(
        accepted = summary.cut_flow.count(EventOutcome::Accepted),
        total = summary.cut_flow.total(),
        histograms = summary.n_histograms,
        "pass finished"
    );
    Ok(summary)
}

/// One row of a resolution table.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionRow {
    /// The correlation profile the row comes from.
    pub key: HistKey,
    /// Centrality bin index.
    pub centrality: usize,
    /// Events in the bin.
    pub entries: u64,
    /// The derived resolution, [`None`] for a non-positive correlation.
    pub resolution: Option<SubEventResolution>,
}

/// Derive the event-plane resolution in every centrality bin of every sub-event correlation
/// profile in a histogram store.
pub fn correlation_resolutions(store: &HistogramStore) -> FlowResult<Vec<ResolutionRow>> {
    let mut rows = Vec::new();
    for (key, _) in store
        .iter()
        .filter(|(key, _)| key.as_str().starts_with("correlation/"))
    {
        let profile = store.profile_1d(key)?;
        for (centrality, bin) in profile.bins.iter().enumerate() {
            if bin.entries() == 0 {
                continue;
            }
            rows.push(ResolutionRow {
                key: key.clone(),
                centrality,
                entries: bin.entries(),
                resolution: SubEventResolution::from_correlation(bin.mean(), 1),
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{test_event, write_parquet, RawHit},
        event_plane::calibration::{CalibrationKey, RecenterEntry},
        tests::temp_path,
        utils::enums::Harmonic,
        FlowError,
    };

    fn analysis() -> Analysis {
        Analysis::new(
            AnalysisConfig::default(),
            EpdGeometry::default(),
            CalibrationProfile::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_accepted_event_fills_histograms() {
        let analysis = analysis();
        let mut acc = analysis.accumulator();
        let outcome = analysis.process_event(&test_event(), &mut acc).unwrap();
        assert_eq!(outcome, EventOutcome::Accepted);
        assert_eq!(analysis.multiplicity(&test_event()), 4);
        let hists = &acc.hists;
        assert_eq!(
            hists
                .hist_1d(&HistKey::new("event").with("centrality"))
                .unwrap()
                .counts[8],
            1.0
        );
        assert_eq!(
            hists
                .hist_1d(&HistKey::new("psi_raw").with("full"))
                .unwrap()
                .integral(),
            1.0
        );
        assert_eq!(
            hists
                .hist_1d(&HistKey::new("psi_flat").with("full"))
                .unwrap()
                .integral(),
            0.0
        );
        assert_eq!(
            hists
                .hist_1d(&HistKey::new("track").with("pt"))
                .unwrap()
                .entries,
            4
        );
        assert_eq!(acc.cut_flow.count(EventOutcome::Accepted), 1);
    }

    #[test]
    fn test_raw_pass_measures_recentering() {
        let mut config = AnalysisConfig::default();
        config.event_plane.min_calibration_entries = 2;
        let analysis =
            Analysis::new(config, EpdGeometry::default(), CalibrationProfile::default()).unwrap();
        let dimmer = Event {
            hits: test_event()
                .hits
                .iter()
                .map(|h| RawHit::new(h.tile_id, h.nmip * 0.9))
                .collect(),
            ..test_event()
        };
        let mut acc = analysis.accumulator();
        analysis.process_event(&test_event(), &mut acc).unwrap();
        analysis.process_event(&dimmer, &mut acc).unwrap();
        let (_, profile) = analysis.finish(acc);
        let entry = profile
            .recenter_entry(&CalibrationKey::new("full", Harmonic::First, 8))
            .unwrap();
        assert_eq!(entry.entries, 2);
        assert!(entry.sigma_x > 0.0 && entry.sigma_y > 0.0);
    }

    #[test]
    fn test_cut_flow() {
        let analysis = analysis();
        let mut acc = analysis.accumulator();
        let base = test_event();
        let cases = [
            (
                Event {
                    trigger_ids: vec![1],
                    ..base.clone()
                },
                EventOutcome::Trigger,
            ),
            (
                Event {
                    vertex: nalgebra::Vector3::new(0.0, -2.0, 202.0),
                    ..base.clone()
                },
                EventOutcome::Vz,
            ),
            (
                Event {
                    vertex: nalgebra::Vector3::new(2.5, -2.0, 200.0),
                    ..base.clone()
                },
                EventOutcome::Vr,
            ),
            (
                Event {
                    tracks: vec![],
                    ..base.clone()
                },
                EventOutcome::TooLow,
            ),
            (
                Event {
                    tracks: vec![base.tracks[0]; 250],
                    ..base.clone()
                },
                EventOutcome::Pileup,
            ),
        ];
        for (event, expected) in cases {
            assert_eq!(analysis.process_event(&event, &mut acc).unwrap(), expected);
        }
        assert_eq!(acc.cut_flow.total(), 5);
        assert_eq!(acc.cut_flow.count(EventOutcome::Accepted), 0);
        assert_eq!(
            acc.hists
                .hist_1d(&HistKey::new("event").with("cut_flow"))
                .unwrap()
                .integral(),
            5.0
        );
    }

    #[test]
    fn test_vpd_cut_only_applies_when_configured() {
        let event = Event {
            vz_vpd: Some(190.0),
            ..test_event()
        };
        assert_eq!(analysis().event_cut(&event), None);
        let mut config = AnalysisConfig::default();
        config.event_cuts.max_vz_vpd_diff = Some(3.0);
        let strict = Analysis::new(config, EpdGeometry::default(), CalibrationProfile::default())
            .unwrap();
        assert_eq!(strict.event_cut(&event), Some(EventOutcome::VzVpd));
        assert_eq!(strict.event_cut(&test_event()), None);
    }

    #[test]
    fn test_track_cuts() {
        let analysis = analysis();
        let good = test_event().tracks[0];
        assert!(analysis.is_good_track(&good));
        assert!(!analysis.is_good_track(&Track {
            n_hits_fit: 14,
            ..good
        }));
        assert!(!analysis.is_good_track(&Track {
            n_hits_max: 60,
            ..good
        }));
        assert!(!analysis.is_good_track(&Track { dca: 3.0, ..good }));
        assert!(!analysis.is_good_track(&Track {
            p: nalgebra::Vector3::new(0.05, 0.05, 1.0),
            ..good
        }));
    }

    #[test]
    fn test_invalid_tile_is_fatal() {
        let analysis = analysis();
        let mut acc = analysis.accumulator();
        let mut event = test_event();
        event.hits.push(RawHit::new(-1399, 1.0));
        assert!(matches!(
            analysis.process_event(&event, &mut acc),
            Err(FlowError::InvalidTile { tile_id: -1399 })
        ));
    }

    #[test]
    fn test_missing_calibration_is_counted() {
        let mut profile = CalibrationProfile::default();
        profile.insert_recenter(
            CalibrationKey::new("full", Harmonic::First, 0),
            RecenterEntry {
                mean_x: 0.0,
                mean_y: 0.0,
                sigma_x: 1.0,
                sigma_y: 1.0,
                entries: 10,
            },
        );
        let analysis =
            Analysis::new(AnalysisConfig::default(), EpdGeometry::default(), profile).unwrap();
        assert_eq!(analysis.stage(), CorrectionStage::Recentered);
        let mut acc = analysis.accumulator();
        analysis.process_event(&test_event(), &mut acc).unwrap();
        assert_eq!(acc.missing_calibration, 1);
    }

    fn low_threshold_analysis(profile: CalibrationProfile) -> Analysis {
        let mut config = AnalysisConfig::default();
        config.event_plane.min_hits = 1;
        Analysis::new(config, EpdGeometry::default(), profile).unwrap()
    }

    #[test]
    fn test_only_disjoint_regions_are_correlated() {
        let analysis = low_threshold_analysis(CalibrationProfile::default());
        let mut acc = analysis.accumulator();
        let correlations = acc
            .hists
            .iter()
            .filter(|(key, _)| key.as_str().starts_with("correlation/"))
            .map(|(key, _)| key.to_string())
            .collect::<Vec<_>>();
        assert_eq!(correlations, vec!["correlation/inner/outer".to_string()]);

        analysis.process_event(&test_event(), &mut acc).unwrap();
        let rows = correlation_resolutions(&acc.hists).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.as_str(), "correlation/inner/outer");
        assert!(rows
            .iter()
            .all(|row| !row.key.as_str().contains("full")));
    }

    #[test]
    fn test_hit_occupancy_map() {
        let analysis = analysis();
        let mut acc = analysis.accumulator();
        analysis.process_event(&test_event(), &mut acc).unwrap();
        let occupancy = acc
            .hists
            .hist_2d(&HistKey::new("hits").with("occupancy"))
            .unwrap();
        assert_eq!(occupancy.entries, 5);
        // weights are capped at two MIPs
        approx::assert_relative_eq!(occupancy.integral(), 6.2, epsilon = 1e-12);
        assert_eq!(occupancy.out_of_range, 0.0);
    }

    #[test]
    fn test_correlation_needs_both_regions_at_pass_stage() {
        let unit = RecenterEntry {
            mean_x: 0.0,
            mean_y: 0.0,
            sigma_x: 1.0,
            sigma_y: 1.0,
            entries: 10,
        };
        let mut profile = CalibrationProfile::default();
        profile.insert_recenter(CalibrationKey::new("full", Harmonic::First, 8), unit);
        profile.insert_recenter(CalibrationKey::new("inner", Harmonic::First, 8), unit);
        let key = HistKey::new("correlation").with("inner").with("outer");

        let partial = low_threshold_analysis(profile.clone());
        assert_eq!(partial.stage(), CorrectionStage::Recentered);
        let mut acc = partial.accumulator();
        partial.process_event(&test_event(), &mut acc).unwrap();
        assert_eq!(acc.missing_calibration, 1);
        assert_eq!(acc.hists.profile_1d(&key).unwrap().bins[8].entries(), 0);

        profile.insert_recenter(CalibrationKey::new("outer", Harmonic::First, 8), unit);
        let complete = low_threshold_analysis(profile);
        let mut acc = complete.accumulator();
        complete.process_event(&test_event(), &mut acc).unwrap();
        assert_eq!(acc.missing_calibration, 0);
        assert_eq!(acc.hists.profile_1d(&key).unwrap().bins[8].entries(), 1);
    }

    #[test]
    fn test_missing_profile_file_falls_back() {
        let path = temp_path("does_not_exist.bin");
        let profile = load_profile(path.to_str()).unwrap();
        assert!(profile.is_empty());
        assert!(load_profile(None).unwrap().is_empty());
    }

    #[test]
    fn test_run_pass_writes_outputs() {
        let input = temp_path("pass_input.parquet");
        let hists = temp_path("pass_hists.bin");
        let calib = temp_path("pass_calib.bin");
        let events = vec![test_event(); 3];
        write_parquet(&events, input.to_str().unwrap(), 2).unwrap();
        let options = PassOptions::new(
            input.to_str().unwrap(),
            hists.to_str().unwrap(),
            calib.to_str().unwrap(),
        )
        .with_max_events(2);
        let summary = run_pass(&AnalysisConfig::default(), &options).unwrap();
        assert_eq!(summary.stage, CorrectionStage::Raw);
        assert_eq!(summary.cut_flow.total(), 2);
        // two events fall short of the minimum entry count
        assert_eq!(summary.n_recenter, 0);
        let store = HistogramStore::load(hists.to_str().unwrap()).unwrap();
        assert_eq!(store.len(), summary.n_histograms);
        assert!(format!("{summary}").contains("accepted"));
        assert!(CalibrationProfile::load(calib.to_str().unwrap())
            .unwrap()
            .is_empty());
        for path in [input, hists, calib] {
            std::fs::remove_file(path).unwrap();
        }
    }

    #[test]
    fn test_correlation_resolutions() {
        let mut store = HistogramStore::new();
        let key = HistKey::new("correlation").with("inner").with("outer");
        store.book_profile_1d(key.clone(), Axis::new(3, (0.0, 3.0)));
        store.fill_profile_1d(&key, 1.5, 0.36).unwrap();
        store.fill_profile_1d(&key, 2.5, -0.1).unwrap();
        store.book_profile_1d(HistKey::new("qx").with("full"), Axis::new(3, (0.0, 3.0)));
        let rows = correlation_resolutions(&store).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].centrality, 1);
        approx::assert_relative_eq!(rows[0].resolution.unwrap().sub, 0.6, epsilon = 1e-12);
        assert!(rows[1].resolution.is_none());
    }
}
