//! Seeded toy events with a known reaction plane.
//!
//! Forward-detector tiles fire with a probability modulated by $`v_1`$ and $`v_2`$ around a
//! uniformly drawn reaction plane, and tracks are drawn from the same azimuthal distribution.
//! Switched-off supersectors give the detector the acceptance holes that recentering and
//! flattening are there to correct.
use std::{f64::consts::TAU, fs};

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Event, RawHit, Track},
    expand_path,
    geometry::{EpdGeometry, TileGeometry},
    utils::{enums::Side, vectors::ThreeVector},
    FlowError, FlowResult,
};

/// Parameters of the toy generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed of the random stream; equal seeds give equal events.
    pub seed: u64,
    /// Number of events to generate.
    pub n_events: usize,
    /// Run number written to every event.
    pub run_id: i64,
    /// Directed flow of forward hits on the west side (the east side gets the opposite sign).
    pub hit_v1: f64,
    /// Elliptic flow of forward hits.
    pub hit_v2: f64,
    /// Directed flow of tracks.
    pub track_v1: f64,
    /// Elliptic flow of tracks.
    pub track_v2: f64,
    /// Mean probability that a tile fires.
    pub occupancy: f64,
    /// Supersectors that never fire, on both sides.
    pub dead_supersectors: Vec<u32>,
    /// Range of the number of generated tracks.
    pub multiplicity_range: (u32, u32),
    /// Range of the vertex $`z`$ in cm.
    pub vz_range: (f64, f64),
    /// Centre of the vertex distribution in the transverse plane, in cm.
    pub beam_spot: (f64, f64),
    /// Trigger id written to every event.
    pub trigger_id: i32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            n_events: 1000,
            run_id: 1,
            hit_v1: 0.15,
            hit_v2: 0.04,
            track_v1: -0.05,
            track_v2: 0.04,
            occupancy: 0.3,
            dead_supersectors: vec![3],
            multiplicity_range: (10, 150),
            vz_range: (198.5, 201.5),
            beam_spot: (0.0, -2.0),
            trigger_id: 620052,
        }
    }
}

impl SimulationConfig {
    /// Read a configuration from a TOML file and validate it.
    pub fn from_toml_file(file_path: &str) -> FlowResult<Self> {
        let path = expand_path(file_path)?;
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that probabilities and ranges make sense.
    pub fn validate(&self) -> FlowResult<()> {
        let invalid = |reason: String| Err(FlowError::InvalidConfig { reason });
        if !(self.occupancy > 0.0 && self.occupancy <= 1.0) {
            return invalid(format!("occupancy must be in (0, 1], got {}", self.occupancy));
        }
        for v in [self.hit_v1, self.hit_v2, self.track_v1, self.track_v2] {
            if !(v.abs() < 0.25) {
                return invalid(format!("flow coefficient {v} is out of range"));
            }
        }
        if self.multiplicity_range.0 > self.multiplicity_range.1 {
            return invalid(format!(
                "empty multiplicity range {:?}",
                self.multiplicity_range
            ));
        }
        if !(self.vz_range.0 < self.vz_range.1) {
            return invalid(format!("empty vz range {:?}", self.vz_range));
        }
        Ok(())
    }
}

/// A toy event and the reaction plane it was generated with.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedEvent {
    /// The event record.
    pub event: Event,
    /// The true reaction-plane angle in $`[0, 2\pi)`$.
    pub reaction_plane: f64,
}

/// Produces [`GeneratedEvent`]s from a [`SimulationConfig`].
pub struct EventGenerator {
    config: SimulationConfig,
    geometry: EpdGeometry,
    rng: ChaCha8Rng,
    produced: usize,
}

impl EventGenerator {
    /// A generator seeded from the configuration.
    pub fn new(config: SimulationConfig) -> FlowResult<Self> {
        config.validate()?;
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            geometry: EpdGeometry::default(),
            rng,
            produced: 0,
        })
    }

    fn azimuth(&mut self, psi: f64, v1: f64, v2: f64) -> f64 {
        let max = 1.0 + 2.0 * v1.abs() + 2.0 * v2.abs();
        loop {
            let phi = self.rng.gen_range(0.0..TAU);
            let density = 1.0 + 2.0 * v1 * (phi - psi).cos() + 2.0 * v2 * (2.0 * (phi - psi)).cos();
            if self.rng.gen::<f64>() * max < density {
                return phi;
            }
        }
    }

    fn hits(&mut self, vertex: &Vector3<f64>, psi: f64) -> FlowResult<Vec<RawHit>> {
        let mut hits = Vec::new();
        for side in [Side::East, Side::West] {
            let v1 = side.sign() * self.config.hit_v1;
            for tile_id in EpdGeometry::tile_ids(side) {
                let (_, supersector, _) = EpdGeometry::decode(tile_id)?;
                if self.config.dead_supersectors.contains(&supersector) {
                    continue;
                }
                let Some(phi) = (self.geometry.tile_center(tile_id)? - vertex).phi() else {
                    continue;
                };
                let modulation = 1.0
                    + 2.0 * v1 * (phi - psi).cos()
                    + 2.0 * self.config.hit_v2 * (2.0 * (phi - psi)).cos();
                if self.rng.gen::<f64>() < (self.config.occupancy * modulation).clamp(0.0, 1.0) {
                    // roughly Landau-shaped: a floor plus an exponential tail
                    let nmip = 0.4 - 0.6 * (1.0 - self.rng.gen::<f64>()).ln();
                    hits.push(RawHit::new(tile_id, nmip));
                }
            }
        }
        Ok(hits)
    }

    fn track(&mut self, psi: f64) -> Track {
        let phi = self.azimuth(psi, self.config.track_v1, self.config.track_v2);
        let pt = 0.05 - 0.45 * (1.0 - self.rng.gen::<f64>()).ln();
        let eta: f64 = self.rng.gen_range(-2.0..0.0);
        Track {
            p: Vector3::new(pt * phi.cos(), pt * phi.sin(), pt * eta.sinh()),
            charge: if self.rng.gen_bool(0.5) { 1 } else { -1 },
            n_hits_fit: self.rng.gen_range(10..=45),
            n_hits_max: 45,
            dca: self.rng.gen_range(0.0..4.0),
        }
    }

    /// Generate one event.
    pub fn generate(&mut self) -> FlowResult<GeneratedEvent> {
        let psi = self.rng.gen_range(0.0..TAU);
        let (x0, y0) = self.config.beam_spot;
        let vertex = Vector3::new(
            x0 + self.rng.gen_range(-0.5..0.5),
            y0 + self.rng.gen_range(-0.5..0.5),
            self.rng.gen_range(self.config.vz_range.0..self.config.vz_range.1),
        );
        let (low, high) = self.config.multiplicity_range;
        let n_tracks = self.rng.gen_range(low..=high);
        let tracks = (0..n_tracks).map(|_| self.track(psi)).collect();
        let hits = self.hits(&vertex, psi)?;
        self.produced += 1;
        Ok(GeneratedEvent {
            event: Event {
                run_id: self.config.run_id,
                event_id: self.produced as i64,
                vertex,
                vz_vpd: None,
                trigger_ids: vec![self.config.trigger_id],
                tracks,
                hits,
            },
            reaction_plane: psi,
        })
    }
}

impl Iterator for EventGenerator {
    type Item = FlowResult<GeneratedEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.produced >= self.config.n_events {
            return None;
        }
        Some(self.generate())
    }
}

/// Generate every event of a configuration, dropping the reaction planes.
pub fn generate_events(config: &SimulationConfig) -> FlowResult<Vec<Event>> {
    EventGenerator::new(config.clone())?
        .map(|generated| generated.map(|g| g.event))
        .collect()
}
