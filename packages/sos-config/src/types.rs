use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub search: Search,
	pub summation: Summation,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub search: SearchEngine,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct SearchEngine {
	pub url: String,
	/// Prefix of every observation index name, e.g. "sos" yields "sos-observation-1".
	pub index_prefix: String,
	pub timeout_ms: u64,
	pub username: Option<String>,
	pub password: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Search {
	#[serde(default = "default_max_result_window")]
	pub max_result_window: u64,
	#[serde(default = "default_max_nr_aggregation_buckets")]
	pub max_nr_aggregation_buckets: u32,
	#[serde(default = "default_composite_page_size")]
	pub composite_page_size: u32,
	#[serde(default = "default_track_total_hits_limit")]
	pub track_total_hits_limit: u64,
	#[serde(default = "default_recent_hits_per_taxon")]
	pub recent_hits_per_taxon: u32,
}
impl Default for Search {
	fn default() -> Self {
		Self {
			max_result_window: default_max_result_window(),
			max_nr_aggregation_buckets: default_max_nr_aggregation_buckets(),
			composite_page_size: default_composite_page_size(),
			track_total_hits_limit: default_track_total_hits_limit(),
			recent_hits_per_taxon: default_recent_hits_per_taxon(),
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct Summation {
	pub interval_seconds: u64,
	#[serde(default = "default_composite_page_size")]
	pub page_size: u32,
}

fn default_max_result_window() -> u64 {
	10_000
}

fn default_max_nr_aggregation_buckets() -> u32 {
	10_000
}

fn default_composite_page_size() -> u32 {
	1_000
}

fn default_track_total_hits_limit() -> u64 {
	10_000
}

fn default_recent_hits_per_taxon() -> u32 {
	3
}
