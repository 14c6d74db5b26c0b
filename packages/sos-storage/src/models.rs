use serde_json::Value;
use time::OffsetDateTime;

#[derive(Debug, sqlx::FromRow)]
pub struct TaxonRelationRow {
	pub taxon_id: i32,
	pub parent_id: Option<i32>,
	pub secondary_parent_ids: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TaxonSumRow {
	pub taxon_id: i32,
	pub observation_count: i64,
	pub sum_observation_count: i64,
	pub province_count: i32,
	pub sum_province_count: i32,
	pub sum_observation_count_by_province_id: Value,
	pub computed_at: OffsetDateTime,
}
