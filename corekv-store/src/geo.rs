//! # Geospatial Index
//!
//! Geo commands are a thin layer over the sorted set container: each
//! member's score is a 52-bit interleaved geohash of its (longitude,
//! latitude) pair. `GEORADIUS` picks the coarsest geohash step whose
//! cell is still at least as wide as the search radius, scans that
//! step's `3x3` neighborhood of cells via `ZRANGEBYSCORE` on each
//! cell's score range, then confirms every candidate with a true
//! Haversine distance check. The bit interleaving, coordinate bounds,
//! and Earth radius constant are grounded directly in the original
//! source's `geo.cc`/`geo.hh`.

use corekv_common::error::{CoreError, CoreResult};
use rand::Rng;

use crate::zset::{ScoreBound, ZAddFlags, ZAddOutcome, ZSet};

const GEO_STEP_MAX: u32 = 26;
const GEO_LAT_MIN: f64 = -85.05112878;
const GEO_LAT_MAX: f64 = 85.05112878;
const GEO_LONG_MIN: f64 = -180.0;
const GEO_LONG_MAX: f64 = 180.0;

/// Mean Earth radius in meters, matching `geo.cc`'s `EARTH_RADIUS_IN_METERS`.
pub const EARTH_RADIUS_IN_METERS: f64 = 6_372_797.560856;

const GEOALPHABET: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// A `GEODIST`/`GEORADIUS` distance unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeoUnit {
    Meters,
    Kilometers,
    Miles,
    Feet,
}

impl GeoUnit {
    fn meters_per_unit(self) -> f64 {
        match self {
            GeoUnit::Meters => 1.0,
            GeoUnit::Kilometers => 1000.0,
            GeoUnit::Miles => 1609.34,
            GeoUnit::Feet => 0.3048,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "m" => Some(GeoUnit::Meters),
            "km" => Some(GeoUnit::Kilometers),
            "mi" => Some(GeoUnit::Miles),
            "ft" => Some(GeoUnit::Feet),
            _ => None,
        }
    }

    pub fn meters_to(self, meters: f64) -> f64 {
        meters / self.meters_per_unit()
    }

    pub fn to_meters(self, value: f64) -> f64 {
        value * self.meters_per_unit()
    }
}

/// Spreads the low 32 bits of `value` across every other bit, the
/// standard Morton/Z-order interleave step (`geo.cc::interleave64`).
fn spread_bits(value: u32) -> u64 {
    let mut v = value as u64;
    v = (v | (v << 16)) & 0x0000FFFF0000FFFF;
    v = (v | (v << 8)) & 0x00FF00FF00FF00FF;
    v = (v | (v << 4)) & 0x0F0F0F0F0F0F0F0F;
    v = (v | (v << 2)) & 0x3333333333333333;
    v = (v | (v << 1)) & 0x5555555555555555;
    v
}

fn squash_bits(value: u64) -> u32 {
    let mut v = value & 0x5555555555555555;
    v = (v | (v >> 1)) & 0x3333333333333333;
    v = (v | (v >> 2)) & 0x0F0F0F0F0F0F0F0F;
    v = (v | (v >> 4)) & 0x00FF00FF00FF00FF;
    v = (v | (v >> 8)) & 0x0000FFFF0000FFFF;
    v = (v | (v >> 16)) & 0x00000000FFFFFFFF;
    v as u32
}

/// Interleaves two 32-bit lattice coordinates into one 64-bit Z-order
/// value, `x` in the even bit positions and `y` in the odd ones.
fn interleave64(xlo: u32, ylo: u32) -> u64 {
    spread_bits(xlo) | (spread_bits(ylo) << 1)
}

fn deinterleave64(interleaved: u64) -> (u32, u32) {
    (squash_bits(interleaved), squash_bits(interleaved >> 1))
}

fn lat_long_to_lattice(lon: f64, lat: f64) -> (u32, u32) {
    let lat_offset = (lat - GEO_LAT_MIN) / (GEO_LAT_MAX - GEO_LAT_MIN);
    let long_offset = (lon - GEO_LONG_MIN) / (GEO_LONG_MAX - GEO_LONG_MIN);
    let scale = (1u64 << GEO_STEP_MAX) as f64;
    ((long_offset * scale) as u32, (lat_offset * scale) as u32)
}

fn lattice_to_lat_long(xlo: u32, ylo: u32) -> (f64, f64) {
    let scale = (1u64 << GEO_STEP_MAX) as f64;
    let lon = GEO_LONG_MIN + (xlo as f64 + 0.5) / scale * (GEO_LONG_MAX - GEO_LONG_MIN);
    let lat = GEO_LAT_MIN + (ylo as f64 + 0.5) / scale * (GEO_LAT_MAX - GEO_LAT_MIN);
    (lon, lat)
}

/// Encodes `(lon, lat)` into the 52-bit interleaved geohash used as a
/// sorted set score.
pub fn encode(lon: f64, lat: f64) -> CoreResult<u64> {
    if !(GEO_LONG_MIN..=GEO_LONG_MAX).contains(&lon) || !(GEO_LAT_MIN..=GEO_LAT_MAX).contains(&lat) {
        return Err(CoreError::OutOfRange);
    }
    let (xlo, ylo) = lat_long_to_lattice(lon, lat);
    Ok(interleave64(xlo, ylo))
}

/// Decodes a score back to the center point of its geohash cell.
pub fn decode(bits: u64) -> (f64, f64) {
    let (xlo, ylo) = deinterleave64(bits);
    lattice_to_lat_long(xlo, ylo)
}

/// Renders the standard 11-character base32 geohash string for a point,
/// following `geo.cc`'s alphabet (distinct from the sorted set score,
/// which packs bits for ordering rather than human-readable display).
pub fn geohash_string(lon: f64, lat: f64) -> String {
    // Standard geohash normalizes latitude to [-90, 90]; our internal
    // score uses the narrower Mercator-safe band, so re-derive bits here.
    let lat_range = (-90.0f64, 90.0f64);
    let lon_range = (-180.0f64, 180.0f64);
    let mut bits: u64 = 0;
    let mut lat_lo = lat_range.0;
    let mut lat_hi = lat_range.1;
    let mut lon_lo = lon_range.0;
    let mut lon_hi = lon_range.1;
    for i in 0..55 {
        bits <<= 1;
        if i % 2 == 0 {
            let mid = (lon_lo + lon_hi) / 2.0;
            if lon >= mid {
                bits |= 1;
                lon_lo = mid;
            } else {
                lon_hi = mid;
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if lat >= mid {
                bits |= 1;
                lat_lo = mid;
            } else {
                lat_hi = mid;
            }
        }
    }
    let mut out = String::with_capacity(11);
    for chunk in 0..11 {
        let shift = 55 - (chunk + 1) * 5;
        let idx = ((bits >> shift) & 0x1f) as usize;
        out.push(GEOALPHABET[idx] as char);
    }
    out
}

/// Great-circle distance between two points in meters (Haversine),
/// matching `geo.cc::geohash_get_distance`.
pub fn haversine_distance(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let lat1r = lat1.to_radians();
    let lat2r = lat2.to_radians();
    let u = ((lat2r - lat1r) / 2.0).sin();
    let v = ((lon2 - lon1).to_radians() / 2.0).sin();
    2.0 * EARTH_RADIUS_IN_METERS * (u * u + lat1r.cos() * lat2r.cos() * v * v).sqrt().asin()
}

/// `GEOADD`: stores `member` at the geohash score for `(lon, lat)`.
pub fn geo_add<R: Rng>(zset: &mut ZSet, rng: &mut R, member: Vec<u8>, lon: f64, lat: f64) -> CoreResult<ZAddOutcome> {
    let score = encode(lon, lat)? as f64;
    zset.zadd(rng, member, score, ZAddFlags::default())
}

/// `GEOPOS`: recovers the approximate `(lon, lat)` stored for `member`.
pub fn geo_pos(zset: &ZSet, member: &[u8]) -> Option<(f64, f64)> {
    let score = zset.score(member)?;
    Some(decode(score as u64))
}

/// `GEODIST`: distance between two members' positions, in `unit`.
pub fn geo_dist(zset: &ZSet, member_a: &[u8], member_b: &[u8], unit: GeoUnit) -> Option<f64> {
    let (lon1, lat1) = geo_pos(zset, member_a)?;
    let (lon2, lat2) = geo_pos(zset, member_b)?;
    Some(unit.meters_to(haversine_distance(lon1, lat1, lon2, lat2)))
}

/// `GEOHASH`: the standard base32 geohash string for `member`.
pub fn geo_hash(zset: &ZSet, member: &[u8]) -> Option<String> {
    let (lon, lat) = geo_pos(zset, member)?;
    Some(geohash_string(lon, lat))
}

/// One `GEORADIUS`/`GEORADIUSBYMEMBER` result row.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoMatch {
    pub member: Vec<u8>,
    pub distance: f64,
    /// The raw 52-bit interleaved geohash score (`WITHHASH`).
    pub score: u64,
}

impl GeoMatch {
    /// The `(lon, lat)` this match's score decodes to (`WITHCOORD`).
    pub fn coords(&self) -> (f64, f64) {
        decode(self.score)
    }
}

/// Ordering requested via `GEORADIUS ASC|DESC`; `None` leaves the
/// distance-ascending order `geo_radius` already produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeoOrder {
    Asc,
    Desc,
}

/// Meters per degree of latitude; treated as constant since the
/// variation across the supported latitude band is small relative to
/// the margin `estimate_step` already builds in.
const METERS_PER_DEGREE_LAT: f64 = 110_574.0;

fn meters_per_degree_lon(lat: f64) -> f64 {
    (111_320.0 * lat.to_radians().cos()).max(1.0)
}

/// The axis-aligned box of `(lon, lat)` within `radius_m` of the center,
/// clamped to the supported coordinate range.
pub fn bounding_box(lon: f64, lat: f64, radius_m: f64) -> (f64, f64, f64, f64) {
    let lat_delta = radius_m / METERS_PER_DEGREE_LAT;
    let lon_delta = radius_m / meters_per_degree_lon(lat);
    ((lon - lon_delta).max(GEO_LONG_MIN), (lat - lat_delta).max(GEO_LAT_MIN), (lon + lon_delta).min(GEO_LONG_MAX), (lat + lat_delta).min(GEO_LAT_MAX))
}

/// The coarsest geohash step (fewest bits per axis) whose cell is still
/// at least as wide as `radius_m` on both axes, so the `3x3` neighbor
/// block is guaranteed to cover the search circle.
fn estimate_step(lat: f64, radius_m: f64) -> u32 {
    let lon_unit_m = meters_per_degree_lon(lat);
    for step in (1..=GEO_STEP_MAX).rev() {
        let cells = (1u64 << step) as f64;
        let lon_width_m = (GEO_LONG_MAX - GEO_LONG_MIN) / cells * lon_unit_m;
        let lat_width_m = (GEO_LAT_MAX - GEO_LAT_MIN) / cells * METERS_PER_DEGREE_LAT;
        if lon_width_m >= radius_m && lat_width_m >= radius_m {
            return step;
        }
    }
    1
}

fn cell_index(lon: f64, lat: f64, step: u32) -> (u32, u32) {
    let (xlo, ylo) = lat_long_to_lattice(lon, lat);
    let shift = GEO_STEP_MAX - step;
    (xlo >> shift, ylo >> shift)
}

/// The inclusive `[min_score, max_score]` range every member inside
/// cell `(cell_x, cell_y)` at `step` falls into: fixing the cell's
/// high-order bits and letting the low-order bits range over every
/// value gives the cell's Morton-order minimum and maximum directly.
fn cell_score_range(cell_x: u32, cell_y: u32, step: u32) -> (u64, u64) {
    let shift = GEO_STEP_MAX - step;
    let low_mask = if shift >= 32 { u32::MAX } else { (1u32 << shift) - 1 };
    let x_lo = cell_x << shift;
    let y_lo = cell_y << shift;
    let x_hi = x_lo | low_mask;
    let y_hi = y_lo | low_mask;
    (interleave64(x_lo, y_lo), interleave64(x_hi, y_hi))
}

/// The score ranges of the `3x3` block of geohash cells around
/// `(lon, lat)` at the step [`estimate_step`] picks for `radius_m`.
/// Edge cells off the supported coordinate range are simply omitted
/// (the grid doesn't wrap at the antimeridian or poles).
pub fn neighbors(lon: f64, lat: f64, radius_m: f64) -> Vec<(u64, u64)> {
    let step = estimate_step(lat, radius_m);
    let (cx, cy) = cell_index(lon, lat, step);
    let max_cell = (1u64 << step) - 1;
    let mut ranges = Vec::with_capacity(9);
    for dx in -1i64..=1 {
        for dy in -1i64..=1 {
            let nx = cx as i64 + dx;
            let ny = cy as i64 + dy;
            if nx < 0 || ny < 0 || nx as u64 > max_cell || ny as u64 > max_cell {
                continue;
            }
            ranges.push(cell_score_range(nx as u32, ny as u32, step));
        }
    }
    ranges
}

/// `GEORADIUS`: every member within `radius` of `(lon, lat)`, sorted by
/// distance ascending unless `order` requests `DESC`, truncated to
/// `count` results if given (`COUNT`/`ASC`/`DESC`). Narrows the
/// scan to the `3x3` grid of geohash cells around the center
/// ([`neighbors`]) before confirming each candidate with a true
/// Haversine distance check, rather than scanning every member in the
/// set.
pub fn geo_radius(zset: &ZSet, lon: f64, lat: f64, radius: f64, unit: GeoUnit, order: Option<GeoOrder>, count: Option<usize>) -> Vec<GeoMatch> {
    let radius_m = unit.to_meters(radius);
    let mut matches = Vec::new();
    for (min_score, max_score) in neighbors(lon, lat, radius_m) {
        let candidates = zset.range_by_score(ScoreBound::inclusive(min_score as f64), ScoreBound::inclusive(max_score as f64), false, 0, None);
        for m in candidates {
            let (mlon, mlat) = decode(m.score as u64);
            let dist = haversine_distance(lon, lat, mlon, mlat);
            if dist <= radius_m {
                matches.push(GeoMatch {
                    member: m.member,
                    distance: unit.meters_to(dist),
                    score: m.score as u64,
                });
            }
        }
    }
    matches.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
    if order == Some(GeoOrder::Desc) {
        matches.reverse();
    }
    if let Some(count) = count {
        matches.truncate(count);
    }
    matches
}

/// `GEORADIUSBYMEMBER`: same as [`geo_radius`] but centered on an
/// existing member's position.
pub fn geo_radius_by_member(zset: &ZSet, member: &[u8], radius: f64, unit: GeoUnit, order: Option<GeoOrder>, count: Option<usize>) -> Option<Vec<GeoMatch>> {
    let (lon, lat) = geo_pos(zset, member)?;
    Some(geo_radius(zset, lon, lat, radius, unit, order, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(1)
    }

    #[test]
    fn encode_decode_round_trip_is_approximate() {
        let bits = encode(13.361389, 38.115556).unwrap();
        let (lon, lat) = decode(bits);
        assert!((lon - 13.361389).abs() < 0.001);
        assert!((lat - 38.115556).abs() < 0.001);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        assert_eq!(encode(200.0, 0.0), Err(CoreError::OutOfRange));
    }

    #[test]
    fn haversine_known_distance() {
        // Palermo to Catania, matching the original source's own test fixture.
        let d = haversine_distance(13.361389, 38.115556, 15.087269, 37.502669);
        assert!((d - 166274.0).abs() < 2000.0);
    }

    #[test]
    fn geo_dist_uses_stored_positions() {
        let mut zset = ZSet::new();
        let mut rng = rng();
        geo_add(&mut zset, &mut rng, b"Palermo".to_vec(), 13.361389, 38.115556).unwrap();
        geo_add(&mut zset, &mut rng, b"Catania".to_vec(), 15.087269, 37.502669).unwrap();
        let dist = geo_dist(&zset, b"Palermo", b"Catania", GeoUnit::Kilometers).unwrap();
        assert!((dist - 166.2).abs() < 2.0);
    }

    #[test]
    fn bounding_box_shrinks_with_smaller_radius() {
        let wide = bounding_box(15.0, 37.0, 200_000.0);
        let narrow = bounding_box(15.0, 37.0, 20_000.0);
        assert!(wide.0 < narrow.0 && wide.2 > narrow.2);
    }

    #[test]
    fn neighbors_covers_center_cell() {
        let ranges = neighbors(15.0, 37.0, 50_000.0);
        assert!(!ranges.is_empty());
        let (cx, cy) = cell_index(15.0, 37.0, estimate_step(37.0, 50_000.0));
        let center_range = cell_score_range(cx, cy, estimate_step(37.0, 50_000.0));
        assert!(ranges.contains(&center_range));
    }

    #[test]
    fn geo_radius_finds_nearby_members() {
        let mut zset = ZSet::new();
        let mut rng = rng();
        geo_add(&mut zset, &mut rng, b"Palermo".to_vec(), 13.361389, 38.115556).unwrap();
        geo_add(&mut zset, &mut rng, b"Catania".to_vec(), 15.087269, 37.502669).unwrap();
        let matches = geo_radius(&zset, 15.0, 37.0, 200.0, GeoUnit::Kilometers, None, None);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].member, b"Catania".to_vec());
    }

    #[test]
    fn geo_radius_applies_order_and_count() {
        let mut zset = ZSet::new();
        let mut rng = rng();
        geo_add(&mut zset, &mut rng, b"Palermo".to_vec(), 13.361389, 38.115556).unwrap();
        geo_add(&mut zset, &mut rng, b"Catania".to_vec(), 15.087269, 37.502669).unwrap();
        let desc = geo_radius(&zset, 15.0, 37.0, 200.0, GeoUnit::Kilometers, Some(GeoOrder::Desc), None);
        assert_eq!(desc[0].member, b"Palermo".to_vec());
        let limited = geo_radius(&zset, 15.0, 37.0, 200.0, GeoUnit::Kilometers, None, Some(1));
        assert_eq!(limited.len(), 1);
    }
}
