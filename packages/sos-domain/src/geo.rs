use std::{f64::consts::PI, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
pub const MAX_GEOHASH_PRECISION: u8 = 12;
pub const MAX_GEOTILE_ZOOM: u8 = 29;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLonCoordinate {
	pub latitude: f64,
	pub longitude: f64,
}
impl LatLonCoordinate {
	pub fn new(latitude: f64, longitude: f64) -> Self {
		Self { latitude, longitude }
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLonBoundingBox {
	pub top_left: LatLonCoordinate,
	pub bottom_right: LatLonCoordinate,
}
impl LatLonBoundingBox {
	pub fn new(top_left: LatLonCoordinate, bottom_right: LatLonCoordinate) -> Self {
		Self { top_left, bottom_right }
	}

	pub fn world() -> Self {
		Self::new(LatLonCoordinate::new(90.0, -180.0), LatLonCoordinate::new(-90.0, 180.0))
	}

	pub fn is_valid(&self) -> bool {
		let lat_ok = |lat: f64| (-90.0..=90.0).contains(&lat);
		let lon_ok = |lon: f64| (-180.0..=180.0).contains(&lon);

		lat_ok(self.top_left.latitude)
			&& lat_ok(self.bottom_right.latitude)
			&& lon_ok(self.top_left.longitude)
			&& lon_ok(self.bottom_right.longitude)
			&& self.top_left.latitude >= self.bottom_right.latitude
	}
}

/// Decodes a geohash into the cell it denotes. Returns `None` for empty, over-long, or
/// non-base32 input.
pub fn decode_geohash(geohash: &str) -> Option<LatLonBoundingBox> {
	if geohash.is_empty() || geohash.len() > usize::from(MAX_GEOHASH_PRECISION) {
		return None;
	}

	let (mut lat_min, mut lat_max) = (-90.0_f64, 90.0_f64);
	let (mut lon_min, mut lon_max) = (-180.0_f64, 180.0_f64);
	let mut even_bit = true;

	for ch in geohash.bytes() {
		let value = GEOHASH_ALPHABET.iter().position(|c| *c == ch.to_ascii_lowercase())?;

		for shift in (0..5).rev() {
			let bit = (value >> shift) & 1;

			if even_bit {
				let mid = (lon_min + lon_max) / 2.0;

				if bit == 1 {
					lon_min = mid;
				} else {
					lon_max = mid;
				}
			} else {
				let mid = (lat_min + lat_max) / 2.0;

				if bit == 1 {
					lat_min = mid;
				} else {
					lat_max = mid;
				}
			}

			even_bit = !even_bit;
		}
	}

	Some(LatLonBoundingBox::new(
		LatLonCoordinate::new(lat_max, lon_min),
		LatLonCoordinate::new(lat_min, lon_max),
	))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeoTileKey {
	pub zoom: u8,
	pub x: u32,
	pub y: u32,
}
impl GeoTileKey {
	pub fn bounding_box(&self) -> LatLonBoundingBox {
		let n = f64::from(1_u32 << self.zoom);
		let lon = |x: f64| x / n * 360.0 - 180.0;
		let lat = |y: f64| (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();

		LatLonBoundingBox::new(
			LatLonCoordinate::new(lat(f64::from(self.y)), lon(f64::from(self.x))),
			LatLonCoordinate::new(lat(f64::from(self.y) + 1.0), lon(f64::from(self.x) + 1.0)),
		)
	}
}
impl fmt::Display for GeoTileKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
	}
}
impl FromStr for GeoTileKey {
	type Err = String;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		let mut parts = raw.split('/');
		let (Some(zoom), Some(x), Some(y), None) =
			(parts.next(), parts.next(), parts.next(), parts.next())
		else {
			return Err(format!("Geotile key '{raw}' must have the form zoom/x/y."));
		};
		let zoom: u8 = zoom.parse().map_err(|_| format!("Invalid geotile zoom in '{raw}'."))?;

		if zoom > MAX_GEOTILE_ZOOM {
			return Err(format!("Geotile zoom {zoom} exceeds {MAX_GEOTILE_ZOOM}."));
		}

		let x: u32 = x.parse().map_err(|_| format!("Invalid geotile x in '{raw}'."))?;
		let y: u32 = y.parse().map_err(|_| format!("Invalid geotile y in '{raw}'."))?;
		let tiles = 1_u64 << zoom;

		if u64::from(x) >= tiles || u64::from(y) >= tiles {
			return Err(format!("Geotile '{raw}' is outside zoom level {zoom}."));
		}

		Ok(Self { zoom, x, y })
	}
}

pub fn decode_geotile(key: &str) -> Option<LatLonBoundingBox> {
	key.parse::<GeoTileKey>().ok().map(|tile| tile.bounding_box())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoGridCell {
	pub geohash: String,
	pub observations_count: u64,
	pub taxa_count: u64,
	pub bounding_box: LatLonBoundingBox,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoGridResult {
	pub bounding_box: LatLonBoundingBox,
	pub precision: u8,
	pub grid_cell_count: usize,
	pub grid_cells: Vec<GeoGridCell>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoGridTileCell {
	pub tile: GeoTileKey,
	pub observations_count: u64,
	pub taxa_count: u64,
	pub bounding_box: LatLonBoundingBox,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoGridTileResult {
	pub bounding_box: LatLonBoundingBox,
	pub zoom: u8,
	pub grid_cell_tile_count: usize,
	pub grid_cell_tiles: Vec<GeoGridTileCell>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoTileTaxonCount {
	pub taxon_id: i32,
	pub observation_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoTileTaxaCell {
	pub tile: GeoTileKey,
	pub bounding_box: LatLonBoundingBox,
	pub taxa: Vec<GeoTileTaxonCount>,
}

/// One page of the cell x taxon aggregation. The `next_*` keys resume after the last pair
/// returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoTileTaxaPage {
	pub cells: Vec<GeoTileTaxaCell>,
	pub next_geo_tile_key: Option<String>,
	pub next_taxon_id_key: Option<i32>,
	pub has_more_data: bool,
}
