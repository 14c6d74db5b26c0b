use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
	SightingsPerDay,
	SightingsPerWeek,
	SightingsPerYear,
	QuantityPerYear,
	SpeciesSightingsList,
	SpeciesSightingsListTaxonCount,
}
impl AggregationType {
	pub fn is_date_histogram(self) -> bool {
		matches!(
			self,
			Self::SightingsPerDay | Self::SightingsPerWeek | Self::SightingsPerYear | Self::QuantityPerYear
		)
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationItem {
	pub aggregation_key: String,
	pub doc_count: u64,
}
