use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use sos_domain::{
	LimitExceeded, Limited, PagedResult,
	filter::Filter,
	geo::LatLonBoundingBox,
	taxon_sum::{
		ProvinceObservations, RecentHit, TaxonAggregationItem, TaxonObservations,
		TaxonSumAggregationItem, sum_by_taxon, sum_by_taxon_and_province,
	},
	taxon_tree::BIOTA_TAXON_ID,
};

use crate::{
	Error, Result, SosService,
	composite::CompositePager,
	query::{self, CompiledQuery, field},
	response::{self, BucketList, KeyedBucket, NoAggregations, TopHits, ValueAggregation},
};

const TAXA: &str = "taxa";
const TAXA_BY_PROVINCE: &str = "taxa_by_province";

#[derive(Clone, Debug, Default)]
pub struct TaxonAggregationRequest {
	pub filter: Filter,
	pub bounding_box: Option<LatLonBoundingBox>,
	pub skip: Option<u64>,
	pub take: Option<u64>,
	/// Report counts that include every underlying taxon.
	pub sum_underlying_taxa: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonExistsIndication {
	pub taxon_id: i32,
	pub exists: bool,
}

#[derive(Debug, Deserialize)]
struct TaxonKey {
	taxon_id: i32,
}

#[derive(Debug, Deserialize)]
struct TaxonProvinceKey {
	taxon_id: i32,
	/// `None` for the bucket of observations without a province.
	province_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObservationAggregations {
	first_sighting: ValueAggregation,
	last_sighting: ValueAggregation,
	recent_hits: Option<TopHits<RecentHitSource>>,
}

#[derive(Debug, Deserialize)]
struct RecentHitSource {
	occurrence: OccurrenceSource,
	event: EventSource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OccurrenceSource {
	occurrence_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventSource {
	#[serde(with = "time::serde::rfc3339")]
	start_date: OffsetDateTime,
}

impl SosService {
	/// Observation counts per taxon, most observed first. With `sum_underlying_taxa` every count
	/// includes the observations of all underlying taxa.
	pub async fn get_taxon_aggregation(
		&self,
		req: &TaxonAggregationRequest,
	) -> Result<Limited<PagedResult<TaxonAggregationItem>>> {
		let max = self.cfg.max_nr_aggregation_buckets;
		let skip = req.skip.unwrap_or(0);
		let take = req.take.unwrap_or(u64::from(max));

		if skip.saturating_add(take) > u64::from(max) {
			return Ok(Err(LimitExceeded::aggregation_buckets(
				max,
				"Skip + take must stay within the bucket limit; request a smaller page.",
			)));
		}

		let span = tracing::info_span!(
			"taxon_aggregation",
			sum_underlying_taxa = req.sum_underlying_taxa,
			taxa = req.filter.taxon_ids().len()
		);
		let mut items = self.taxon_aggregation_items(req).instrument(span).await?;

		items.sort_by(|a, b| {
			b.sum_observation_count.cmp(&a.sum_observation_count).then(a.taxon_id.cmp(&b.taxon_id))
		});

		let total_count = items.len() as u64;
		let records = items
			.into_iter()
			.skip(usize::try_from(skip).unwrap_or(usize::MAX))
			.take(usize::try_from(take).unwrap_or(usize::MAX))
			.collect();

		Ok(Ok(PagedResult { records, skip, take, total_count }))
	}

	/// Province coverage per taxon summed over the whole taxon tree. Meant for long-running batch
	/// jobs; `cancel` is checked between pages and a cancelled run returns no partial sums.
	pub async fn get_taxon_sum_aggregation(
		&self,
		filter: &Filter,
		cancel: &CancellationToken,
	) -> Result<Vec<TaxonSumAggregationItem>> {
		let span = tracing::info_span!("taxon_sum_aggregation");

		self.taxon_sum_aggregation_inner(filter, cancel).instrument(span).await
	}

	/// Whether any observation matching `filter` exists for each requested taxon.
	pub async fn taxa_exist(
		&self,
		filter: &Filter,
		taxon_ids: &[i32],
	) -> Result<Limited<Vec<TaxonExistsIndication>>> {
		let max = self.cfg.max_nr_aggregation_buckets;

		if taxon_ids.is_empty() {
			return Ok(Ok(Vec::new()));
		}
		if taxon_ids.len() > max as usize {
			return Ok(Err(LimitExceeded::aggregation_buckets(
				max,
				"Ask for fewer taxa per request.",
			)));
		}

		let derived = filter.with_taxon_ids(taxon_ids.to_vec(), false);
		let scope = self.resolve_indices(&derived).await?;
		let query = query::compile(&derived, self.taxa())?;
		let body = json!({
			"size": 0,
			"track_total_hits": false,
			"query": query.to_query(),
			"aggs": { TAXA: { "terms": { "field": field::TAXON_ID, "size": taxon_ids.len() } } },
		});
		let raw = self.engine().search(&scope.target(), &body).await?;
		let buckets: BucketList<KeyedBucket<i32>> = response::aggregation(TAXA, raw)?;
		let found = buckets
			.buckets
			.iter()
			.filter(|bucket| bucket.doc_count > 0)
			.map(|bucket| bucket.key)
			.collect::<HashSet<_>>();

		Ok(Ok(taxon_ids
			.iter()
			.map(|taxon_id| TaxonExistsIndication {
				taxon_id: *taxon_id,
				exists: found.contains(taxon_id),
			})
			.collect()))
	}

	async fn taxon_aggregation_items(
		&self,
		req: &TaxonAggregationRequest,
	) -> Result<Vec<TaxonAggregationItem>> {
		let scope = self.resolve_indices(&req.filter).await?;
		let target = scope.target();
		let cancel = CancellationToken::new();
		let compile = |filter: &Filter| -> Result<CompiledQuery> {
			let query = query::compile(filter, self.taxa())?;

			Ok(match &req.bounding_box {
				Some(bbox) => query.within(bbox),
				None => query,
			})
		};

		if !req.sum_underlying_taxa {
			let raw = self.raw_observations(&target, &compile(&req.filter)?, &cancel).await?;

			return Ok(raw
				.iter()
				.map(|(taxon_id, observations)| TaxonAggregationItem::from_raw(*taxon_id, observations))
				.collect());
		}

		let tree = self.taxa().tree();
		let max_recent_hits = self.cfg.recent_hits_per_taxon as usize;

		if req.filter.output_taxon_keys().is_none() {
			let raw = self.raw_observations(&target, &compile(&req.filter)?, &cancel).await?;

			return Ok(sum_by_taxon(&raw, &tree, max_recent_hits).into_values().collect());
		}

		// Sum over the unrestricted counts, then keep only the taxa the filter selects.
		let unfiltered =
			self.raw_observations(&target, &compile(&req.filter.without_taxa())?, &cancel).await?;
		let filtered = self.raw_observations(&target, &compile(&req.filter)?, &cancel).await?;
		let mut keep = filtered.keys().copied().collect::<HashSet<_>>();

		if req.filter.taxon_ids().is_empty() && req.filter.include_underlying_taxa() {
			keep.insert(BIOTA_TAXON_ID);
		}

		let mut sums = sum_by_taxon(&unfiltered, &tree, max_recent_hits);

		sums.retain(|taxon_id, _| keep.contains(taxon_id));

		tracing::debug!(
			unfiltered = unfiltered.len(),
			filtered = filtered.len(),
			kept = sums.len(),
			"Summed underlying taxa."
		);

		Ok(sums.into_values().collect())
	}

	async fn raw_observations(
		&self,
		target: &str,
		query: &CompiledQuery,
		cancel: &CancellationToken,
	) -> Result<HashMap<i32, TaxonObservations>> {
		let mut sub_aggregations = json!({
			"first_sighting": { "min": { "field": field::EVENT_START_DATE } },
			"last_sighting": { "max": { "field": field::EVENT_START_DATE } },
		});

		if self.cfg.recent_hits_per_taxon > 0 {
			sub_aggregations["recent_hits"] = json!({
				"top_hits": {
					"size": self.cfg.recent_hits_per_taxon,
					"sort": [{ (field::EVENT_START_DATE): { "order": "desc" } }],
					"_source": { "includes": [field::OCCURRENCE_ID, field::EVENT_START_DATE] },
				},
			});
		}

		let mut pager = CompositePager::<TaxonKey, ObservationAggregations>::new(
			self.engine(),
			target,
			TAXA,
			query.to_query(),
			taxon_sources(),
			self.cfg.composite_page_size,
		)
		.with_sub_aggregations(sub_aggregations);
		let mut out = HashMap::new();

		while let Some(buckets) = pager.next_page(cancel).await? {
			for bucket in buckets {
				let aggregations = bucket.aggregations;
				let recent_hits = aggregations
					.recent_hits
					.map(|top| {
						top.hits
							.hits
							.into_iter()
							.map(|hit| RecentHit {
								occurrence_id: hit.source.occurrence.occurrence_id,
								event_start_date: hit.source.event.start_date,
							})
							.collect()
					})
					.unwrap_or_default();

				out.insert(bucket.key.taxon_id, TaxonObservations {
					observation_count: bucket.doc_count,
					first_sighting: aggregations.first_sighting.as_date(),
					last_sighting: aggregations.last_sighting.as_date(),
					recent_hits,
				});
			}
		}

		Ok(out)
	}

	async fn taxon_sum_aggregation_inner(
		&self,
		filter: &Filter,
		cancel: &CancellationToken,
	) -> Result<Vec<TaxonSumAggregationItem>> {
		let scope = self.resolve_indices(filter).await?;
		let target = scope.target();
		let query = query::compile(filter, self.taxa())?;
		let mut pager = CompositePager::<TaxonProvinceKey, NoAggregations>::new(
			self.engine(),
			&target,
			TAXA_BY_PROVINCE,
			query.to_query(),
			json!([
				{ "taxon_id": { "terms": { "field": field::TAXON_ID } } },
				{
					"province_id": {
						"terms": { "field": field::PROVINCE_ID, "missing_bucket": true },
					},
				},
			]),
			self.cfg.composite_page_size,
		);
		let mut raw: HashMap<i32, ProvinceObservations> = HashMap::new();

		while let Some(buckets) = pager.next_page(cancel).await? {
			for bucket in buckets {
				raw.entry(bucket.key.taxon_id)
					.or_default()
					.add(bucket.key.province_id, bucket.doc_count);
			}
		}

		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		let tree = self.taxa().tree();
		let mut items = sum_by_taxon_and_province(&raw, &tree).into_values().collect::<Vec<_>>();

		items.sort_by_key(|item| item.taxon_id);

		tracing::info!(
			taxa = items.len(),
			round_trips = pager.round_trips(),
			"Computed taxon sum aggregation."
		);

		Ok(items)
	}
}

fn taxon_sources() -> Value {
	json!([{ "taxon_id": { "terms": { "field": field::TAXON_ID } } }])
}
