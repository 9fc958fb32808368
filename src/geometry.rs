use std::f64::consts::PI;

use nalgebra::Vector3;

use crate::{utils::enums::Side, FlowError, FlowResult};

/// Maps a forward-detector tile id to the position of the tile centre.
pub trait TileGeometry {
    /// The centre of the tile in the detector frame (cm).
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InvalidTile`] if the id does not name a tile of this detector.
    fn tile_center(&self, tile_id: i32) -> FlowResult<Vector3<f64>>;
}

/// A wheel-shaped event-plane detector with one wheel on each side of the interaction region.
///
/// Each wheel has 12 supersectors of 30 degrees, numbered clockwise from the top when seen from
/// the west side, and each supersector holds 31 tiles in 16 radial rows. A tile id is
/// `sign * (100 * supersector + tile)`, the sign selecting the side (negative is east). Tile
/// 1 fills the innermost row on its own; tiles 2 to 31 come in pairs, one on each half of the
/// supersector.
#[derive(Debug, Clone, PartialEq)]
pub struct EpdGeometry {
    /// Distance of each wheel from the nominal interaction point along the beam (cm).
    pub wheel_z: f64,
    /// Inner radius of the innermost row (cm).
    pub inner_radius: f64,
    /// Outer radius of the outermost row (cm).
    pub outer_radius: f64,
}

impl Default for EpdGeometry {
    fn default() -> Self {
        Self {
            wheel_z: 375.0,
            inner_radius: 4.6,
            outer_radius: 90.0,
        }
    }
}

impl EpdGeometry {
    /// Supersectors per wheel.
    pub const N_SUPERSECTORS: u32 = 12;
    /// Tiles per supersector.
    pub const N_TILES: u32 = 31;
    /// Radial rows per supersector.
    pub const N_ROWS: u32 = 16;

    /// Split a tile id into its side, supersector and tile numbers.
    pub fn decode(tile_id: i32) -> FlowResult<(Side, u32, u32)> {
        let side = Side::from_tile_id(tile_id).ok_or(FlowError::InvalidTile { tile_id })?;
        let id = tile_id.unsigned_abs();
        let (supersector, tile) = (id / 100, id % 100);
        if !(1..=Self::N_SUPERSECTORS).contains(&supersector) || !(1..=Self::N_TILES).contains(&tile)
        {
            return Err(FlowError::InvalidTile { tile_id });
        }
        Ok((side, supersector, tile))
    }

    /// Build the id of a tile from its side, supersector and tile numbers.
    pub fn encode(side: Side, supersector: u32, tile: u32) -> i32 {
        side.sign() as i32 * (100 * supersector + tile) as i32
    }

    /// Every tile id on one side, in supersector-then-tile order.
    pub fn tile_ids(side: Side) -> Vec<i32> {
        (1..=Self::N_SUPERSECTORS)
            .flat_map(|pp| (1..=Self::N_TILES).map(move |tt| Self::encode(side, pp, tt)))
            .collect()
    }

    /// The radial row (1 to 16) of a tile number.
    pub fn row(tile: u32) -> u32 {
        if tile == 1 {
            1
        } else {
            tile / 2 + 1
        }
    }

    fn row_radius(&self, row: u32) -> f64 {
        let width = (self.outer_radius - self.inner_radius) / Self::N_ROWS as f64;
        self.inner_radius + (row as f64 - 0.5) * width
    }

    fn tile_phi(side: Side, supersector: u32, tile: u32) -> f64 {
        let sector_width = PI / 6.0;
        let step = (supersector - 1) as f64 * sector_width;
        // the east wheel is seen from behind, so its numbering runs the other way
        let (center, half) = match side {
            Side::West => (PI / 2.0 - step, 1.0),
            Side::East => (PI / 2.0 + step, -1.0),
        };
        let offset = match tile {
            1 => 0.0,
            t if t % 2 == 0 => sector_width / 4.0,
            _ => -sector_width / 4.0,
        };
        center + half * offset
    }
}

impl TileGeometry for EpdGeometry {
    fn tile_center(&self, tile_id: i32) -> FlowResult<Vector3<f64>> {
        let (side, supersector, tile) = Self::decode(tile_id)?;
        let radius = self.row_radius(Self::row(tile));
        let phi = Self::tile_phi(side, supersector, tile);
        Ok(Vector3::new(
            radius * phi.cos(),
            radius * phi.sin(),
            side.sign() * self.wheel_z,
        ))
    }
}
