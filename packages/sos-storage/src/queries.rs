use sqlx::{Postgres, QueryBuilder};

use crate::{
	Result,
	db::Db,
	models::{TaxonRelationRow, TaxonSumRow},
};

pub const OBSERVATION_CONFIGURATION_ID: &str = "observation";

const TAXON_SUM_INSERT_BATCH: usize = 1_000;

pub async fn active_instance(db: &Db) -> Result<Option<i16>> {
	let instance: Option<i16> =
		sqlx::query_scalar("SELECT active_instance FROM processed_configuration WHERE id = $1")
			.bind(OBSERVATION_CONFIGURATION_ID)
			.fetch_optional(&db.pool)
			.await?;

	Ok(instance)
}

pub async fn set_active_instance(db: &Db, instance: i16) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO processed_configuration (id, active_instance, updated_at)
VALUES ($1, $2, now())
ON CONFLICT (id) DO UPDATE
SET active_instance = EXCLUDED.active_instance,
	updated_at = EXCLUDED.updated_at",
	)
	.bind(OBSERVATION_CONFIGURATION_ID)
	.bind(instance)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn list_taxon_relations(db: &Db) -> Result<Vec<TaxonRelationRow>> {
	let rows = sqlx::query_as::<_, TaxonRelationRow>(
		"\
SELECT taxon_id, parent_id, secondary_parent_ids
FROM taxa
ORDER BY taxon_id",
	)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}

pub async fn insert_taxon_relations(db: &Db, rows: &[TaxonRelationRow]) -> Result<()> {
	if rows.is_empty() {
		return Ok(());
	}

	let mut builder = QueryBuilder::<Postgres>::new(
		"INSERT INTO taxa (taxon_id, parent_id, secondary_parent_ids) ",
	);

	builder.push_values(rows, |mut b, row| {
		b.push_bind(row.taxon_id).push_bind(row.parent_id).push_bind(&row.secondary_parent_ids);
	});
	builder.push(
		" ON CONFLICT (taxon_id) DO UPDATE SET parent_id = EXCLUDED.parent_id, secondary_parent_ids = EXCLUDED.secondary_parent_ids",
	);
	builder.build().execute(&db.pool).await?;

	Ok(())
}

/// Swaps the stored taxon sums for `rows` atomically.
pub async fn replace_taxon_sums(db: &Db, rows: &[TaxonSumRow]) -> Result<()> {
	let mut tx = db.pool.begin().await?;

	sqlx::query("DELETE FROM taxon_sum_aggregations").execute(&mut *tx).await?;

	for chunk in rows.chunks(TAXON_SUM_INSERT_BATCH) {
		let mut builder = QueryBuilder::<Postgres>::new(
			"\
INSERT INTO taxon_sum_aggregations (
	taxon_id,
	observation_count,
	sum_observation_count,
	province_count,
	sum_province_count,
	sum_observation_count_by_province_id,
	computed_at
) ",
		);

		builder.push_values(chunk, |mut b, row| {
			b.push_bind(row.taxon_id)
				.push_bind(row.observation_count)
				.push_bind(row.sum_observation_count)
				.push_bind(row.province_count)
				.push_bind(row.sum_province_count)
				.push_bind(&row.sum_observation_count_by_province_id)
				.push_bind(row.computed_at);
		});
		builder.build().execute(&mut *tx).await?;
	}

	tx.commit().await?;

	Ok(())
}

pub async fn list_taxon_sums(db: &Db) -> Result<Vec<TaxonSumRow>> {
	let rows = sqlx::query_as::<_, TaxonSumRow>(
		"\
SELECT
	taxon_id,
	observation_count,
	sum_observation_count,
	province_count,
	sum_province_count,
	sum_observation_count_by_province_id,
	computed_at
FROM taxon_sum_aggregations
ORDER BY taxon_id",
	)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}
