//! Typed shapes of the engine responses this crate reads. Each call site decodes exactly the
//! projection it asked for.

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{Error, Result};

pub(crate) fn decode<T>(what: &str, value: Value) -> Result<T>
where
	T: DeserializeOwned,
{
	serde_json::from_value(value).map_err(|err| Error::decode(what, err))
}

/// The named aggregation of a search response.
pub(crate) fn aggregation<T>(name: &str, mut response: Value) -> Result<T>
where
	T: DeserializeOwned,
{
	let value = response
		.get_mut("aggregations")
		.and_then(|aggregations| aggregations.get_mut(name))
		.map(Value::take)
		.ok_or_else(|| Error::Engine {
			message: format!("Engine response is missing the {name} aggregation."),
			debug: response.to_string(),
		})?;

	decode(name, value)
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse<T> {
	pub(crate) hits: Hits<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Hits<T> {
	pub(crate) total: TotalHits,
	#[serde(default = "Vec::new")]
	pub(crate) hits: Vec<Hit<T>>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TotalRelation {
	Eq,
	Gte,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub(crate) struct TotalHits {
	pub(crate) value: u64,
	pub(crate) relation: TotalRelation,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Hit<T> {
	#[serde(rename = "_source")]
	pub(crate) source: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BucketList<B> {
	pub(crate) buckets: Vec<B>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompositeAggregation<K, A> {
	pub(crate) after_key: Option<Value>,
	pub(crate) buckets: Vec<CompositeBucket<K, A>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompositeBucket<K, A> {
	pub(crate) key: K,
	pub(crate) doc_count: u64,
	#[serde(flatten)]
	pub(crate) aggregations: A,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NoAggregations {}

#[derive(Debug, Deserialize)]
pub(crate) struct KeyedBucket<K> {
	pub(crate) key: K,
	pub(crate) doc_count: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CellBucket {
	pub(crate) key: String,
	pub(crate) doc_count: u64,
	pub(crate) taxa_count: ValueAggregation,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DateHistogramBucket {
	pub(crate) key_as_string: String,
	pub(crate) doc_count: u64,
	pub(crate) quantity: Option<ValueAggregation>,
}

/// Single-value metric (`min`, `max`, `sum`, `cardinality`). `value` is null for empty sets.
#[derive(Debug, Deserialize)]
pub(crate) struct ValueAggregation {
	pub(crate) value: Option<f64>,
}
impl ValueAggregation {
	pub(crate) fn as_count(&self) -> u64 {
		self.value.map(|value| value.max(0.0).round() as u64).unwrap_or(0)
	}

	/// Date metrics are reported as epoch milliseconds.
	pub(crate) fn as_date(&self) -> Option<OffsetDateTime> {
		let millis = self.value?;

		OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000).ok()
	}
}

#[derive(Debug, Deserialize)]
pub(crate) struct TopHits<T> {
	pub(crate) hits: HitList<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HitList<T> {
	pub(crate) hits: Vec<Hit<T>>,
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use time::macros::datetime;

	use crate::response::{self, SearchResponse, TotalRelation, ValueAggregation};

	#[test]
	fn decodes_total_relation() {
		let response: SearchResponse<serde_json::Value> = response::decode(
			"hits",
			json!({ "hits": { "total": { "value": 10000, "relation": "gte" }, "hits": [] } }),
		)
		.expect("Failed to decode response.");

		assert_eq!(response.hits.total.relation, TotalRelation::Gte);
	}

	#[test]
	fn date_metrics_are_epoch_millis() {
		let metric = ValueAggregation { value: Some(1_577_836_800_000.0) };

		assert_eq!(metric.as_date(), Some(datetime!(2020-01-01 00:00 UTC)));
		assert_eq!(ValueAggregation { value: None }.as_date(), None);
	}

	#[test]
	fn missing_aggregation_is_an_engine_error() {
		let err = response::aggregation::<serde_json::Value>("taxa", json!({ "hits": {} }))
			.expect_err("Expected missing aggregation error.");

		assert!(matches!(err, crate::Error::Engine { .. }));
	}
}
