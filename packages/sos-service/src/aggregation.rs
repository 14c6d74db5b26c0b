use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use sos_domain::{
	LimitExceeded, Limited, PagedResult,
	aggregation::{AggregationItem, AggregationType},
	filter::Filter,
};

use crate::{
	Result, SosService,
	composite::CompositePager,
	query::{self, CompiledQuery, field},
	response::{self, BucketList, DateHistogramBucket, NoAggregations, ValueAggregation},
};

const HISTOGRAM: &str = "histogram";
const SPECIES: &str = "species";
const TAXON_COUNT: &str = "taxon_count";

#[derive(Clone, Debug)]
pub struct AggregationRequest {
	pub filter: Filter,
	pub aggregation_type: AggregationType,
	pub skip: u64,
	pub take: u64,
}

#[derive(Debug, Deserialize)]
struct TaxonKey {
	taxon_id: i32,
}

impl SosService {
	/// Histogram or species-list aggregation. An inactive filter yields an empty page without
	/// touching the engine.
	pub async fn aggregate(
		&self,
		req: &AggregationRequest,
	) -> Result<Limited<PagedResult<AggregationItem>>> {
		if !req.filter.is_active() {
			return Ok(Ok(PagedResult::empty(req.skip, req.take)));
		}

		let span = tracing::info_span!("aggregate", aggregation_type = ?req.aggregation_type);

		self.aggregate_inner(req).instrument(span).await
	}

	async fn aggregate_inner(
		&self,
		req: &AggregationRequest,
	) -> Result<Limited<PagedResult<AggregationItem>>> {
		let scope = self.resolve_indices(&req.filter).await?;
		let query = query::compile(&req.filter, self.taxa())?;
		let target = scope.target();

		match req.aggregation_type {
			AggregationType::SpeciesSightingsList => self.species_list(&target, &query, req).await,
			AggregationType::SpeciesSightingsListTaxonCount => {
				let count = self.taxon_count(&target, &query).await?;

				Ok(Ok(PagedResult {
					records: Vec::new(),
					skip: req.skip,
					take: req.take,
					total_count: count,
				}))
			},
			histogram => self.date_histogram(&target, &query, histogram, req).await,
		}
	}

	async fn date_histogram(
		&self,
		target: &str,
		query: &CompiledQuery,
		aggregation_type: AggregationType,
		req: &AggregationRequest,
	) -> Result<Limited<PagedResult<AggregationItem>>> {
		let (interval, format) = match aggregation_type {
			AggregationType::SightingsPerDay => ("day", "yyyy-MM-dd"),
			AggregationType::SightingsPerWeek => ("week", "yyyy-MM-dd"),
			_ => ("year", "yyyy"),
		};
		let mut histogram = json!({
			"date_histogram": {
				"field": field::EVENT_START_DATE,
				"calendar_interval": interval,
				"format": format,
				"min_doc_count": 1,
			},
		});

		if aggregation_type == AggregationType::QuantityPerYear {
			histogram["aggs"] = json!({ "quantity": { "sum": { "field": field::QUANTITY } } });
		}

		let body = json!({
			"size": 0,
			"track_total_hits": false,
			"query": query.to_query(),
			"aggs": { HISTOGRAM: histogram },
		});
		let raw = self.engine().search(target, &body).await?;
		let buckets: BucketList<DateHistogramBucket> = response::aggregation(HISTOGRAM, raw)?;
		let items = buckets
			.buckets
			.into_iter()
			.map(|bucket| AggregationItem {
				doc_count: match &bucket.quantity {
					Some(quantity) => quantity.as_count(),
					None => bucket.doc_count,
				},
				aggregation_key: bucket.key_as_string,
			})
			.collect::<Vec<_>>();

		Ok(Ok(page(items, req.skip, req.take)))
	}

	/// Every taxon with its observation count, most observed first. `skip == 0 && take == 0`
	/// returns the complete list.
	async fn species_list(
		&self,
		target: &str,
		query: &CompiledQuery,
		req: &AggregationRequest,
	) -> Result<Limited<PagedResult<AggregationItem>>> {
		let return_all = req.skip == 0 && req.take == 0;

		if !return_all && req.skip.saturating_add(req.take) > self.cfg.max_result_window {
			return Ok(Err(LimitExceeded::result_window(
				self.cfg.max_result_window,
				req.skip,
				req.take,
			)));
		}

		let mut pager = CompositePager::<TaxonKey, NoAggregations>::new(
			self.engine(),
			target,
			SPECIES,
			query.to_query(),
			json!([{ "taxon_id": { "terms": { "field": field::TAXON_ID } } }]),
			self.cfg.composite_page_size,
		);
		let mut buckets = pager.collect_all(&CancellationToken::new()).await?;

		buckets.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then(a.key.taxon_id.cmp(&b.key.taxon_id)));

		let items = buckets
			.into_iter()
			.map(|bucket| AggregationItem {
				aggregation_key: bucket.key.taxon_id.to_string(),
				doc_count: bucket.doc_count,
			})
			.collect::<Vec<_>>();

		if return_all {
			let total_count = items.len() as u64;

			return Ok(Ok(PagedResult { records: items, skip: 0, take: total_count, total_count }));
		}

		Ok(Ok(page(items, req.skip, req.take)))
	}

	async fn taxon_count(&self, target: &str, query: &CompiledQuery) -> Result<u64> {
		let body = json!({
			"size": 0,
			"track_total_hits": false,
			"query": query.to_query(),
			"aggs": {
				TAXON_COUNT: {
					"cardinality": { "field": field::TAXON_ID, "precision_threshold": 40_000 },
				},
			},
		});
		let raw = self.engine().search(target, &body).await?;
		let count: ValueAggregation = response::aggregation(TAXON_COUNT, raw)?;

		Ok(count.as_count())
	}
}

fn page(items: Vec<AggregationItem>, skip: u64, take: u64) -> PagedResult<AggregationItem> {
	let total_count = items.len() as u64;
	let records = items
		.into_iter()
		.skip(usize::try_from(skip).unwrap_or(usize::MAX))
		.take(usize::try_from(take).unwrap_or(usize::MAX))
		.collect();

	PagedResult { records, skip, take, total_count }
}
