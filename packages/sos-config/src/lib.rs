mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Config, Postgres, Search, SearchEngine, Service, Storage, Summation};

use std::{fs, path::Path};

const NON_EMPTY: &str = "must be non-empty";
const POSITIVE: &str = "must be greater than zero";
const WITHIN_BUCKET_CAP: &str = "must be between 1 and search.max_nr_aggregation_buckets";

pub fn load(path: &Path) -> Result<Config> {
	let raw =
		fs::read_to_string(path).map_err(|source| Error::Read { path: path.to_path_buf(), source })?;
	let mut cfg: Config =
		toml::from_str(&raw).map_err(|source| Error::Parse { path: path.to_path_buf(), source })?;

	normalize(&mut cfg);
	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	let postgres = &cfg.storage.postgres;
	let engine = &cfg.storage.search;
	let search = &cfg.search;
	let page_size_fits = |page_size: u32| (1..=search.max_nr_aggregation_buckets).contains(&page_size);

	require(!cfg.service.log_level.trim().is_empty(), "service.log_level", NON_EMPTY)?;
	require(!postgres.dsn.trim().is_empty(), "storage.postgres.dsn", NON_EMPTY)?;
	require(postgres.pool_max_conns > 0, "storage.postgres.pool_max_conns", POSITIVE)?;
	require(!engine.url.is_empty(), "storage.search.url", NON_EMPTY)?;
	require(!engine.index_prefix.trim().is_empty(), "storage.search.index_prefix", NON_EMPTY)?;
	require(engine.timeout_ms > 0, "storage.search.timeout_ms", POSITIVE)?;
	require(
		engine.username.is_none() || engine.password.is_some(),
		"storage.search.password",
		"is required when storage.search.username is set",
	)?;
	require(search.max_result_window > 0, "search.max_result_window", POSITIVE)?;
	require(search.max_nr_aggregation_buckets > 0, "search.max_nr_aggregation_buckets", POSITIVE)?;
	require(
		page_size_fits(search.composite_page_size),
		"search.composite_page_size",
		WITHIN_BUCKET_CAP,
	)?;
	require(search.track_total_hits_limit > 0, "search.track_total_hits_limit", POSITIVE)?;
	require(cfg.summation.interval_seconds > 0, "summation.interval_seconds", POSITIVE)?;
	require(page_size_fits(cfg.summation.page_size), "summation.page_size", WITHIN_BUCKET_CAP)?;

	Ok(())
}

fn require(holds: bool, field: &'static str, rule: &'static str) -> Result<()> {
	if holds { Ok(()) } else { Err(Error::Invalid { field, rule }) }
}

// Blank credentials mean "no credentials"; the base URL never ends with a slash.
fn normalize(cfg: &mut Config) {
	let engine = &mut cfg.storage.search;

	for credential in [&mut engine.username, &mut engine.password] {
		if credential.as_deref().is_some_and(|value| value.trim().is_empty()) {
			*credential = None;
		}
	}

	engine.url = engine.url.trim().trim_end_matches('/').to_string();
}
