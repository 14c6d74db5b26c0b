use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use sos_domain::{
	LimitExceeded, Limited,
	filter::Filter,
	geo::{
		self, GeoGridCell, GeoGridResult, GeoGridTileCell, GeoGridTileResult, GeoTileKey,
		GeoTileTaxaCell, GeoTileTaxaPage, GeoTileTaxonCount, LatLonBoundingBox,
		MAX_GEOHASH_PRECISION, MAX_GEOTILE_ZOOM,
	},
};

use crate::{
	Error, Result, SosService,
	composite::CompositePager,
	query::{self, CompiledQuery, field},
	response::{self, BucketList, CellBucket, CompositeBucket, NoAggregations},
};

const CELLS: &str = "cells";
const TILE_TAXA: &str = "tile_taxa";

#[derive(Clone, Debug, Default)]
pub struct GeoTileTaxaRequest {
	pub filter: Filter,
	pub zoom: u8,
	pub bounding_box: Option<LatLonBoundingBox>,
	/// Resume cursor from a previous page; both keys or neither.
	pub geo_tile_key: Option<String>,
	pub taxon_id_key: Option<i32>,
	/// Upper bound of (cell, taxon) pairs returned by one page.
	pub max_buckets: u32,
}

#[derive(Debug, Deserialize)]
struct TileTaxonKey {
	geotile: String,
	taxon_id: i32,
}

impl SosService {
	/// Observation and distinct-taxon counts per geohash cell inside `bbox`. More cells than the
	/// bucket limit yields a limit failure instead of a truncated grid.
	pub async fn geo_grid(
		&self,
		filter: &Filter,
		precision: u8,
		bbox: &LatLonBoundingBox,
	) -> Result<Limited<GeoGridResult>> {
		if precision == 0 || precision > MAX_GEOHASH_PRECISION {
			return Err(Error::InvalidRequest {
				message: format!("Geohash precision must be between 1 and {MAX_GEOHASH_PRECISION}."),
			});
		}

		validate_bbox(bbox)?;

		let span = tracing::info_span!("geo_grid", precision);
		let buckets = match self
			.cell_buckets(filter, bbox, "geohash_grid", precision)
			.instrument(span)
			.await?
		{
			Ok(buckets) => buckets,
			Err(limit) => return Ok(Err(limit)),
		};
		let grid_cells = buckets
			.into_iter()
			.filter_map(|bucket| {
				let Some(bounding_box) = geo::decode_geohash(&bucket.key) else {
					tracing::warn!(geohash = %bucket.key, "Skipping undecodable geohash cell.");

					return None;
				};

				Some(GeoGridCell {
					observations_count: bucket.doc_count,
					taxa_count: bucket.taxa_count.as_count(),
					geohash: bucket.key,
					bounding_box,
				})
			})
			.collect::<Vec<_>>();

		Ok(Ok(GeoGridResult {
			bounding_box: *bbox,
			precision,
			grid_cell_count: grid_cells.len(),
			grid_cells,
		}))
	}

	/// Same as [`SosService::geo_grid`] on web-mercator tiles.
	pub async fn geo_tile(
		&self,
		filter: &Filter,
		zoom: u8,
		bbox: &LatLonBoundingBox,
	) -> Result<Limited<GeoGridTileResult>> {
		validate_zoom(zoom)?;
		validate_bbox(bbox)?;

		let span = tracing::info_span!("geo_tile", zoom);
		let buckets = match self
			.cell_buckets(filter, bbox, "geotile_grid", zoom)
			.instrument(span)
			.await?
		{
			Ok(buckets) => buckets,
			Err(limit) => return Ok(Err(limit)),
		};
		let mut grid_cell_tiles = Vec::with_capacity(buckets.len());

		for bucket in buckets {
			let tile = parse_tile(&bucket.key)?;

			grid_cell_tiles.push(GeoGridTileCell {
				tile,
				observations_count: bucket.doc_count,
				taxa_count: bucket.taxa_count.as_count(),
				bounding_box: tile.bounding_box(),
			});
		}

		Ok(Ok(GeoGridTileResult {
			bounding_box: *bbox,
			zoom,
			grid_cell_tile_count: grid_cell_tiles.len(),
			grid_cell_tiles,
		}))
	}

	/// Every tile with the taxa observed in it. Pages until the aggregation is exhausted;
	/// `cancel` is checked between pages.
	pub async fn geo_tile_taxa_complete(
		&self,
		filter: &Filter,
		zoom: u8,
		bbox: Option<&LatLonBoundingBox>,
		cancel: &CancellationToken,
	) -> Result<Vec<GeoTileTaxaCell>> {
		validate_zoom(zoom)?;

		let span = tracing::info_span!("geo_tile_taxa_complete", zoom);

		async {
			let scope = self.resolve_indices(filter).await?;
			let target = scope.target();
			let query = self.compile_within(filter, bbox)?;
			let mut pager = self.tile_taxa_pager(&target, &query, zoom, self.cfg.composite_page_size);
			let mut cells = TileCells::default();

			while let Some(buckets) = pager.next_page(cancel).await? {
				cells.extend(buckets)?;
			}

			Ok(cells.into_cells())
		}
		.instrument(span)
		.await
	}

	/// A bounded slice of the tile x taxon aggregation that can be resumed with the returned
	/// keys.
	pub async fn geo_tile_taxa_page(&self, req: &GeoTileTaxaRequest) -> Result<GeoTileTaxaPage> {
		validate_zoom(req.zoom)?;

		if req.max_buckets == 0 || req.max_buckets > self.cfg.max_nr_aggregation_buckets {
			return Err(Error::InvalidRequest {
				message: format!(
					"max_buckets must be between 1 and {}.",
					self.cfg.max_nr_aggregation_buckets
				),
			});
		}

		let after = match (&req.geo_tile_key, req.taxon_id_key) {
			(Some(geo_tile_key), Some(taxon_id)) => {
				parse_tile(geo_tile_key)?;

				Some(json!({ "geotile": geo_tile_key, "taxon_id": taxon_id }))
			},
			(None, None) => None,
			_ => {
				return Err(Error::InvalidRequest {
					message: "geo_tile_key and taxon_id_key must be given together.".to_string(),
				});
			},
		};
		let span = tracing::info_span!("geo_tile_taxa_page", zoom = req.zoom, resumed = after.is_some());

		async {
			let scope = self.resolve_indices(&req.filter).await?;
			let target = scope.target();
			let query = self.compile_within(&req.filter, req.bounding_box.as_ref())?;
			let page_size = self.cfg.composite_page_size.min(req.max_buckets);
			let mut pager =
				self.tile_taxa_pager(&target, &query, req.zoom, page_size).starting_after(after);
			let cancel = CancellationToken::new();
			let mut cells = TileCells::default();

			while cells.pairs < req.max_buckets as usize {
				pager.shrink_page_size(req.max_buckets - cells.pairs as u32);

				let Some(buckets) = pager.next_page(&cancel).await? else {
					break;
				};

				cells.extend(buckets)?;
			}

			let next = pager.after_key().map(decode_tile_taxon_cursor).transpose()?;
			let (next_geo_tile_key, next_taxon_id_key) = match next {
				Some((geo_tile_key, taxon_id)) => (Some(geo_tile_key), Some(taxon_id)),
				None => (None, None),
			};

			Ok(GeoTileTaxaPage {
				cells: cells.into_cells(),
				has_more_data: !pager.is_done(),
				next_geo_tile_key,
				next_taxon_id_key,
			})
		}
		.instrument(span)
		.await
	}

	fn compile_within(
		&self,
		filter: &Filter,
		bbox: Option<&LatLonBoundingBox>,
	) -> Result<CompiledQuery> {
		let query = query::compile(filter, self.taxa())?;

		match bbox {
			Some(bbox) => {
				validate_bbox(bbox)?;

				Ok(query.within(bbox))
			},
			None => Ok(query),
		}
	}

	fn tile_taxa_pager<'a>(
		&'a self,
		target: &'a str,
		query: &CompiledQuery,
		zoom: u8,
		page_size: u32,
	) -> CompositePager<'a, TileTaxonKey, NoAggregations> {
		CompositePager::new(
			self.engine(),
			target,
			TILE_TAXA,
			query.to_query(),
			json!([
				{ "geotile": { "geotile_grid": { "field": field::POINT_LOCATION, "precision": zoom } } },
				{ "taxon_id": { "terms": { "field": field::TAXON_ID } } },
			]),
			page_size,
		)
	}

	/// One-round-trip cell aggregation. Asks for one bucket more than the limit so an overflow
	/// is detected rather than silently truncated.
	async fn cell_buckets(
		&self,
		filter: &Filter,
		bbox: &LatLonBoundingBox,
		grid: &str,
		precision: u8,
	) -> Result<Limited<Vec<CellBucket>>> {
		let max = self.cfg.max_nr_aggregation_buckets;
		let scope = self.resolve_indices(filter).await?;
		let query = query::compile(filter, self.taxa())?.within(bbox);
		let body = json!({
			"size": 0,
			"track_total_hits": false,
			"query": query.to_query(),
			"aggs": {
				CELLS: {
					(grid): {
						"field": field::POINT_LOCATION,
						"precision": precision,
						"size": u64::from(max) + 1,
					},
					"aggs": { "taxa_count": { "cardinality": { "field": field::TAXON_ID } } },
				},
			},
		});
		let raw = self.engine().search(&scope.target(), &body).await?;
		let buckets: BucketList<CellBucket> = response::aggregation(CELLS, raw)?;

		if buckets.buckets.len() > max as usize {
			tracing::info!(
				buckets = buckets.buckets.len(),
				max,
				"Cell aggregation exceeded the bucket limit."
			);

			return Ok(Err(LimitExceeded::aggregation_buckets(
				max,
				"Try a lower precision or a smaller bounding box.",
			)));
		}

		Ok(Ok(buckets.buckets))
	}
}

/// Groups (tile, taxon) buckets by tile, keeping first-seen tile order.
#[derive(Default)]
struct TileCells {
	cells: Vec<GeoTileTaxaCell>,
	positions: HashMap<GeoTileKey, usize>,
	pairs: usize,
}
impl TileCells {
	fn extend(&mut self, buckets: Vec<CompositeBucket<TileTaxonKey, NoAggregations>>) -> Result<()> {
		for bucket in buckets {
			let tile = parse_tile(&bucket.key.geotile)?;
			let position = *self.positions.entry(tile).or_insert_with(|| {
				self.cells.push(GeoTileTaxaCell {
					tile,
					bounding_box: tile.bounding_box(),
					taxa: Vec::new(),
				});

				self.cells.len() - 1
			});

			self.cells[position].taxa.push(GeoTileTaxonCount {
				taxon_id: bucket.key.taxon_id,
				observation_count: bucket.doc_count,
			});
			self.pairs += 1;
		}

		Ok(())
	}

	fn into_cells(self) -> Vec<GeoTileTaxaCell> {
		self.cells
	}
}

fn decode_tile_taxon_cursor(after: &Value) -> Result<(String, i32)> {
	let key: TileTaxonKey = response::decode("tile taxa cursor", after.clone())?;

	Ok((key.geotile, key.taxon_id))
}

fn parse_tile(raw: &str) -> Result<GeoTileKey> {
	raw.parse().map_err(|message| Error::InvalidRequest { message })
}

fn validate_zoom(zoom: u8) -> Result<()> {
	if zoom > MAX_GEOTILE_ZOOM {
		return Err(Error::InvalidRequest {
			message: format!("Geotile zoom must be at most {MAX_GEOTILE_ZOOM}."),
		});
	}

	Ok(())
}

fn validate_bbox(bbox: &LatLonBoundingBox) -> Result<()> {
	if !bbox.is_valid() {
		return Err(Error::InvalidRequest {
			message: "Bounding box must have its top left corner above and within valid coordinates."
				.to_string(),
		});
	}

	Ok(())
}
