use std::fmt::Display;

use nalgebra::Vector3;

use crate::utils::vectors::ThreeVector;

/// Event I/O implementations and shared column helpers.
pub mod io;

pub use io::{write_parquet, EventReader};

/// A single forward-detector reading as stored in the input file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawHit {
    /// Signed tile id; the sign selects the detector side.
    pub tile_id: i32,
    /// Signal expressed in minimum-ionizing-particle equivalents.
    pub nmip: f64,
}

impl RawHit {
    /// Construct a new hit.
    pub fn new(tile_id: i32, nmip: f64) -> Self {
        Self { tile_id, nmip }
    }
}

/// A reconstructed charged track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Track {
    /// Momentum at the primary vertex in GeV/c.
    pub p: Vector3<f64>,
    /// Electric charge in units of $`e`$.
    pub charge: i32,
    /// Number of points used in the track fit.
    pub n_hits_fit: u32,
    /// Number of points the track could have had.
    pub n_hits_max: u32,
    /// Distance of closest approach to the primary vertex in cm.
    pub dca: f64,
}

impl Track {
    /// Transverse momentum.
    pub fn pt(&self) -> f64 {
        self.p.pt()
    }
    /// Pseudorapidity.
    pub fn eta(&self) -> f64 {
        self.p.eta()
    }
    /// Azimuth in $`[0, 2\pi)`$, or [`None`] for a track along the beam.
    pub fn phi(&self) -> Option<f64> {
        self.p.phi()
    }
    /// Ratio of fit points to possible points (zero when no points were possible).
    pub fn hits_ratio(&self) -> f64 {
        if self.n_hits_max == 0 {
            0.0
        } else {
            self.n_hits_fit as f64 / self.n_hits_max as f64
        }
    }
}

/// One collision event: vertex, trigger ids, tracks, and forward-detector hits.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Run number.
    pub run_id: i64,
    /// Event number within the run.
    pub event_id: i64,
    /// Primary vertex in cm.
    pub vertex: Vector3<f64>,
    /// Vertex $`z`$ from the timing detector, when available.
    pub vz_vpd: Option<f64>,
    /// Trigger ids fired in this event.
    pub trigger_ids: Vec<i32>,
    /// Reconstructed tracks.
    pub tracks: Vec<Track>,
    /// Forward-detector hits.
    pub hits: Vec<RawHit>,
}

impl Event {
    /// Transverse distance of the vertex from a beam-spot centre.
    pub fn vr(&self, center: (f64, f64)) -> f64 {
        (self.vertex.x - center.0).hypot(self.vertex.y - center.1)
    }
    /// Whether any of the given trigger ids fired. An empty list accepts every event.
    pub fn has_any_trigger(&self, accepted: &[i32]) -> bool {
        accepted.is_empty() || self.trigger_ids.iter().any(|id| accepted.contains(id))
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Event {} (run {}):", self.event_id, self.run_id)?;
        writeln!(
            f,
            "  vertex: ({}, {}, {})",
            self.vertex.x, self.vertex.y, self.vertex.z
        )?;
        writeln!(f, "  triggers: {:?}", self.trigger_ids)?;
        writeln!(f, "  tracks: {}", self.tracks.len())?;
        writeln!(f, "  hits: {}", self.hits.len())?;
        Ok(())
    }
}

/// An event that passes the default cuts, with a handful of tracks and east-side hits. Useful
/// for tests of the per-event kernel.
pub fn test_event() -> Event {
    let track = |px: f64, py: f64, pz: f64, charge: i32| Track {
        p: Vector3::new(px, py, pz),
        charge,
        n_hits_fit: 30,
        n_hits_max: 45,
        dca: 0.8,
    };
    Event {
        run_id: 19151029,
        event_id: 1,
        vertex: Vector3::new(0.1, -2.2, 200.3),
        vz_vpd: None,
        trigger_ids: vec![620052],
        tracks: vec![
            track(0.5, 0.1, -0.4, 1),
            track(-0.3, 0.6, -0.9, -1),
            track(0.05, -0.7, -0.2, 1),
            track(0.4, 0.4, -1.5, 1),
        ],
        hits: vec![
            RawHit::new(-101, 1.2),
            RawHit::new(-312, 0.9),
            RawHit::new(-405, 2.7),
            RawHit::new(-723, 0.2),
            RawHit::new(-1130, 1.5),
            RawHit::new(-1201, 0.6),
            RawHit::new(508, 1.1),
        ],
    }
}
