use std::{sync::Arc, time::Duration};

use color_eyre::{Result, eyre};
use time::OffsetDateTime;
use tokio::time::{self as tokio_time, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use sos_domain::{filter::Filter, taxon_sum::TaxonSumAggregationItem};
use sos_service::SosService;
use sos_storage::{db::Db, models::TaxonSumRow, queries};

pub struct SummationState {
	pub db: Arc<Db>,
	pub service: SosService,
	pub interval: Duration,
}

/// Recomputes the stored taxon sums every `interval` until `cancel` fires. A failed run is logged
/// and retried on the next tick; the previous sums stay in place.
pub async fn run_summation(state: SummationState, cancel: CancellationToken) -> Result<()> {
	let mut ticker = tokio_time::interval(state.interval);

	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = ticker.tick() => {},
		}

		match summarize_once(&state, &cancel).await {
			Ok(rows) => tracing::info!(rows, "Stored taxon sums."),
			Err(err) if cancel.is_cancelled() => {
				tracing::info!(error = %err, "Summation cancelled.");

				break;
			},
			Err(err) => tracing::error!(error = %err, "Taxon summation failed."),
		}
	}

	Ok(())
}

async fn summarize_once(state: &SummationState, cancel: &CancellationToken) -> Result<usize> {
	let started = OffsetDateTime::now_utc();
	let items = state.service.get_taxon_sum_aggregation(&Filter::default(), cancel).await?;
	let rows = to_rows(&items, started)?;

	queries::replace_taxon_sums(&state.db, &rows).await?;

	Ok(rows.len())
}

fn to_rows(items: &[TaxonSumAggregationItem], computed_at: OffsetDateTime) -> Result<Vec<TaxonSumRow>> {
	items
		.iter()
		.map(|item| -> Result<TaxonSumRow> {
			Ok(TaxonSumRow {
				taxon_id: item.taxon_id,
				observation_count: i64::try_from(item.observation_count)?,
				sum_observation_count: i64::try_from(item.sum_observation_count)?,
				province_count: i32::try_from(item.province_count)?,
				sum_province_count: i32::try_from(item.sum_province_count)?,
				sum_observation_count_by_province_id: serde_json::to_value(
					&item.sum_observation_count_by_province_id,
				)
				.map_err(|err| eyre::eyre!("Failed to encode province sums: {err}."))?,
				computed_at,
			})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use serde_json::json;
	use time::macros::datetime;

	use sos_domain::taxon_sum::TaxonSumAggregationItem;

	use crate::summation::to_rows;

	#[test]
	fn rows_carry_counts_and_province_breakdown() {
		let item = TaxonSumAggregationItem {
			taxon_id: 42,
			observation_count: 5,
			sum_observation_count: 10,
			province_count: 1,
			sum_province_count: 2,
			sum_observation_count_by_province_id: BTreeMap::from([
				("1".to_string(), 7),
				("2".to_string(), 3),
			]),
		};
		let rows = to_rows(&[item], datetime!(2024-03-01 12:00 UTC)).expect("Failed to convert sums.");

		assert_eq!(rows[0].taxon_id, 42);
		assert_eq!(rows[0].sum_observation_count, 10);
		assert_eq!(rows[0].sum_province_count, 2);
		assert_eq!(rows[0].sum_observation_count_by_province_id, json!({ "1": 7, "2": 3 }));
	}
}
