use nalgebra::Vector3;

use crate::{
    config::HitCuts,
    data::RawHit,
    geometry::TileGeometry,
    utils::{enums::Side, vectors::ThreeVector},
    FlowError, FlowResult,
};

/// A selected forward-detector hit, positioned relative to the primary vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorHit {
    /// The tile that fired.
    pub tile_id: i32,
    /// The detector side of the tile.
    pub side: Side,
    /// The raw signal in MIP equivalents.
    pub nmip: f64,
    /// The signal clamped to the configured maximum weight.
    pub weight: f64,
    /// Azimuth of the tile centre seen from the vertex, in $`[0, 2\pi)`$.
    pub phi: f64,
    /// Pseudorapidity of the tile centre seen from the vertex.
    pub eta: f64,
}

/// Select the hits on `side` above threshold and map them to vertex-relative coordinates.
///
/// Hits on the other side or below `cuts.nmip_threshold` are dropped. The input is left
/// untouched.
///
/// # Errors
///
/// Any hit whose tile the geometry does not know yields [`FlowError::InvalidTile`], on either
/// side and whatever its signal, as does a hit with tile id zero.
pub fn select_hits<G: TileGeometry + ?Sized>(
    hits: &[RawHit],
    vertex: &Vector3<f64>,
    side: Side,
    cuts: &HitCuts,
    geometry: &G,
) -> FlowResult<Vec<DetectorHit>> {
    let mut selected = Vec::with_capacity(hits.len());
    for hit in hits {
        let hit_side = Side::from_tile_id(hit.tile_id).ok_or(FlowError::InvalidTile {
            tile_id: hit.tile_id,
        })?;
        let center = geometry.tile_center(hit.tile_id)?;
        if hit_side != side || !(hit.nmip >= cuts.nmip_threshold) {
            continue;
        }
        let direction = center - vertex;
        let Some(phi) = direction.phi() else {
            continue;
        };
        selected.push(DetectorHit {
            tile_id: hit.tile_id,
            side: hit_side,
            nmip: hit.nmip,
            weight: hit.nmip.min(cuts.max_weight),
            phi,
            eta: direction.eta(),
        });
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::test_event, geometry::EpdGeometry};
    use approx::assert_relative_eq;

    #[test]
    fn test_selects_side_and_threshold() {
        let event = test_event();
        let cuts = HitCuts::default();
        let geometry = EpdGeometry::default();
        let east = select_hits(&event.hits, &event.vertex, Side::East, &cuts, &geometry).unwrap();
        let ids: Vec<i32> = east.iter().map(|h| h.tile_id).collect();
        assert_eq!(ids, vec![-101, -312, -405, -1130, -1201]);
        assert!(east.iter().all(|h| h.weight <= cuts.max_weight));
        assert_eq!(east[2].nmip, 2.7);
        assert_eq!(east[2].weight, 2.0);
        assert!(east.iter().all(|h| h.eta < 0.0));
        assert!(east.iter().all(|h| (0.0..std::f64::consts::TAU).contains(&h.phi)));

        let west = select_hits(&event.hits, &event.vertex, Side::West, &cuts, &geometry).unwrap();
        assert_eq!(west.len(), 1);
        assert!(west[0].eta > 0.0);
    }

    #[test]
    fn test_coordinates_are_vertex_relative() {
        let geometry = EpdGeometry::default();
        let hits = [RawHit::new(101, 1.0)];
        let at_origin = select_hits(
            &hits,
            &Vector3::zeros(),
            Side::West,
            &HitCuts::default(),
            &geometry,
        )
        .unwrap();
        let shifted = select_hits(
            &hits,
            &Vector3::new(0.0, 0.0, 200.0),
            Side::West,
            &HitCuts::default(),
            &geometry,
        )
        .unwrap();
        let center = geometry.tile_center(101).unwrap();
        assert_relative_eq!(at_origin[0].eta, center.eta(), epsilon = 1e-12);
        assert!(shifted[0].eta < at_origin[0].eta);
        assert_relative_eq!(shifted[0].phi, at_origin[0].phi, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_tiles_are_errors() {
        let geometry = EpdGeometry::default();
        let cuts = HitCuts::default();
        let bad = [RawHit::new(-1345, 1.0)];
        assert!(matches!(
            select_hits(&bad, &Vector3::zeros(), Side::East, &cuts, &geometry),
            Err(FlowError::InvalidTile { tile_id: -1345 })
        ));
        let zero = [RawHit::new(0, 1.0)];
        assert!(select_hits(&zero, &Vector3::zeros(), Side::East, &cuts, &geometry).is_err());
    }

    #[test]
    fn test_unselected_side_is_validated() {
        let geometry = EpdGeometry::default();
        let cuts = HitCuts::default();
        let mut hits = test_event().hits;
        hits.push(RawHit::new(1399, 1.0));
        assert!(matches!(
            select_hits(&hits, &Vector3::zeros(), Side::East, &cuts, &geometry),
            Err(FlowError::InvalidTile { tile_id: 1399 })
        ));
        let below_threshold = [RawHit::new(-1332, 0.0)];
        assert!(matches!(
            select_hits(&below_threshold, &Vector3::zeros(), Side::East, &cuts, &geometry),
            Err(FlowError::InvalidTile { tile_id: -1332 })
        ));
    }
}
