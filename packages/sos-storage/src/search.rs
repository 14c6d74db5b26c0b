use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use crate::{BoxFuture, Error, Result};

pub const OBSERVATION_INDEX: &str = "observation";
pub const PROTECTED_OBSERVATION_INDEX: &str = "observation-protected";

/// Query, count and aggregate primitives of the document search engine. Bodies and responses
/// are the engine's JSON; typed decoding happens at each call site.
pub trait SearchEngine
where
	Self: Send + Sync,
{
	fn search<'a>(&'a self, index: &'a str, body: &'a Value) -> BoxFuture<'a, Result<Value>>;

	fn count<'a>(&'a self, index: &'a str, body: &'a Value) -> BoxFuture<'a, Result<u64>>;
}

pub fn index_name(prefix: &str, instance: i16, protected: bool) -> String {
	let base = if protected { PROTECTED_OBSERVATION_INDEX } else { OBSERVATION_INDEX };

	format!("{prefix}-{base}-{instance}")
}

pub struct ElasticsearchStore {
	client: Client,
	url: String,
	username: Option<String>,
	password: Option<String>,
}
impl ElasticsearchStore {
	pub fn new(cfg: &sos_config::SearchEngine) -> Result<Self> {
		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;

		Ok(Self {
			client,
			url: cfg.url.trim_end_matches('/').to_string(),
			username: cfg.username.clone(),
			password: cfg.password.clone(),
		})
	}

	fn post(&self, index: &str, endpoint: &str) -> RequestBuilder {
		let url = format!("{}/{index}/{endpoint}", self.url);
		let request = self.client.post(url).query(&[("ignore_unavailable", "true")]);

		match self.username.as_deref() {
			Some(username) => request.basic_auth(username, self.password.as_deref()),
			None => request,
		}
	}

	async fn send(&self, request: RequestBuilder, body: &Value) -> Result<Value> {
		let res = request.json(body).send().await?;
		let status = res.status();

		if !status.is_success() {
			let debug = res
				.text()
				.await
				.unwrap_or_else(|err| format!("Failed to read error response body: {err}."));

			return Err(Error::Engine { status: status.as_u16(), debug });
		}

		Ok(res.json().await?)
	}

	async fn search_inner(&self, index: &str, body: &Value) -> Result<Value> {
		self.send(self.post(index, "_search"), body).await
	}

	async fn count_inner(&self, index: &str, body: &Value) -> Result<u64> {
		let json = self.send(self.post(index, "_count"), body).await?;

		parse_count_response(&json)
	}
}
impl SearchEngine for ElasticsearchStore {
	fn search<'a>(&'a self, index: &'a str, body: &'a Value) -> BoxFuture<'a, Result<Value>> {
		Box::pin(self.search_inner(index, body))
	}

	fn count<'a>(&'a self, index: &'a str, body: &'a Value) -> BoxFuture<'a, Result<u64>> {
		Box::pin(self.count_inner(index, body))
	}
}

fn parse_count_response(json: &Value) -> Result<u64> {
	json.get("count").and_then(Value::as_u64).ok_or_else(|| Error::Engine {
		status: 200,
		debug: format!("Count response is missing a numeric count: {json}."),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builds_instance_index_names() {
		assert_eq!(index_name("sos", 1, false), "sos-observation-1");
		assert_eq!(index_name("sos", 0, true), "sos-observation-protected-0");
	}

	#[test]
	fn parses_count_response() {
		let json = serde_json::json!({ "count": 42, "_shards": { "total": 1 } });

		assert_eq!(parse_count_response(&json).expect("parse failed"), 42);
	}

	#[test]
	fn rejects_count_response_without_count() {
		let json = serde_json::json!({ "error": "boom" });
		let err = parse_count_response(&json).expect_err("Expected missing count error.");

		assert!(matches!(err, Error::Engine { status: 200, .. }));
	}
}
