use serde::{Deserialize, Serialize};

pub type Limited<T> = std::result::Result<T, LimitExceeded>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedResult<T> {
	pub records: Vec<T>,
	pub skip: u64,
	pub take: u64,
	pub total_count: u64,
}
impl<T> PagedResult<T> {
	pub fn empty(skip: u64, take: u64) -> Self {
		Self { records: Vec::new(), skip, take, total_count: 0 }
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceLimit {
	ResultWindow { max: u64 },
	AggregationBuckets { max: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct LimitExceeded {
	pub limit: ResourceLimit,
	pub message: String,
}
impl LimitExceeded {
	pub fn result_window(max: u64, skip: u64, take: u64) -> Self {
		Self {
			limit: ResourceLimit::ResultWindow { max },
			message: format!(
				"Skip ({skip}) + take ({take}) exceeds the result window of {max}. Narrow the filter or request a smaller page."
			),
		}
	}

	pub fn aggregation_buckets(max: u32, detail: &str) -> Self {
		Self {
			limit: ResourceLimit::AggregationBuckets { max },
			message: format!("The number of buckets exceeds the limit of {max}. {detail}"),
		}
	}
}
