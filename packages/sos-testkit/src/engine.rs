use std::sync::Mutex;

use serde_json::{Value, json};

use sos_storage::{BoxFuture, search::SearchEngine};

type Handler = Box<dyn Fn(&EngineCall) -> sos_storage::Result<Value> + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub enum EngineCall {
	Search { index: String, body: Value },
	Count { index: String, body: Value },
}
impl EngineCall {
	pub fn index(&self) -> &str {
		match self {
			Self::Search { index, .. } | Self::Count { index, .. } => index,
		}
	}

	pub fn body(&self) -> &Value {
		match self {
			Self::Search { body, .. } | Self::Count { body, .. } => body,
		}
	}

	pub fn is_count(&self) -> bool {
		matches!(self, Self::Count { .. })
	}
}

/// In-memory engine answering every call through a scripted handler. Count handlers return
/// `{ "count": n }`.
pub struct FakeEngine {
	handler: Handler,
	calls: Mutex<Vec<EngineCall>>,
}
impl FakeEngine {
	pub fn new<F>(handler: F) -> Self
	where
		F: Fn(&EngineCall) -> sos_storage::Result<Value> + Send + Sync + 'static,
	{
		Self { handler: Box::new(handler), calls: Mutex::new(Vec::new()) }
	}

	pub fn empty() -> Self {
		Self::new(|call| {
			Ok(if call.is_count() { json!({ "count": 0 }) } else { search_response(0, "eq", &[]) })
		})
	}

	pub fn calls(&self) -> Vec<EngineCall> {
		self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
	}

	pub fn call_count(&self) -> usize {
		self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
	}

	fn dispatch(&self, call: EngineCall) -> sos_storage::Result<Value> {
		let out = (self.handler)(&call);

		if let Ok(mut calls) = self.calls.lock() {
			calls.push(call);
		}

		out
	}

	async fn search_inner(&self, index: &str, body: &Value) -> sos_storage::Result<Value> {
		self.dispatch(EngineCall::Search { index: index.to_string(), body: body.clone() })
	}

	async fn count_inner(&self, index: &str, body: &Value) -> sos_storage::Result<u64> {
		let json =
			self.dispatch(EngineCall::Count { index: index.to_string(), body: body.clone() })?;

		json.get("count").and_then(Value::as_u64).ok_or_else(|| sos_storage::Error::Engine {
			status: 200,
			debug: format!("Fake count response is missing a count: {json}."),
		})
	}
}
impl SearchEngine for FakeEngine {
	fn search<'a>(
		&'a self,
		index: &'a str,
		body: &'a Value,
	) -> BoxFuture<'a, sos_storage::Result<Value>> {
		Box::pin(self.search_inner(index, body))
	}

	fn count<'a>(&'a self, index: &'a str, body: &'a Value) -> BoxFuture<'a, sos_storage::Result<u64>> {
		Box::pin(self.count_inner(index, body))
	}
}

/// A plain hit-list response with the given total.
pub fn search_response(total: u64, relation: &str, hits: &[Value]) -> Value {
	let hits = hits.iter().map(|source| json!({ "_source": source })).collect::<Vec<_>>();

	json!({
		"hits": { "total": { "value": total, "relation": relation }, "hits": hits },
	})
}

/// A response carrying a single aggregation named `name`.
pub fn composite_response(name: &str, buckets: &[Value], after_key: Option<&Value>) -> Value {
	let mut aggregation = json!({ "buckets": buckets });

	if let Some(after_key) = after_key {
		aggregation["after_key"] = after_key.clone();
	}

	json!({
		"hits": { "total": { "value": 0, "relation": "eq" }, "hits": [] },
		"aggregations": { name: aggregation },
	})
}

/// Serves the next composite page of `buckets` for the request `body`, honoring the requested
/// `size` and `after` key. `after_key` is only present while more buckets remain.
pub fn serve_composite(name: &str, buckets: &[Value], body: &Value) -> Value {
	let composite = &body["aggs"][name]["composite"];
	let size = composite["size"].as_u64().unwrap_or(10) as usize;
	let start = match composite.get("after") {
		Some(after) => buckets
			.iter()
			.position(|bucket| &bucket["key"] == after)
			.map(|position| position + 1)
			.unwrap_or(buckets.len()),
		None => 0,
	};
	let end = (start + size).min(buckets.len());
	let page = &buckets[start..end];
	let after_key = if end < buckets.len() { page.last().map(|bucket| &bucket["key"]) } else { None };

	composite_response(name, page, after_key)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serves_composite_pages_in_order() {
		let buckets = (0..5)
			.map(|id| json!({ "key": { "taxon_id": id }, "doc_count": 1 }))
			.collect::<Vec<_>>();
		let first = serve_composite(
			"taxa",
			&buckets,
			&json!({ "aggs": { "taxa": { "composite": { "size": 3 } } } }),
		);

		assert_eq!(first["aggregations"]["taxa"]["buckets"].as_array().map(Vec::len), Some(3));
		assert_eq!(first["aggregations"]["taxa"]["after_key"], json!({ "taxon_id": 2 }));

		let second = serve_composite(
			"taxa",
			&buckets,
			&json!({ "aggs": { "taxa": { "composite": { "size": 3, "after": { "taxon_id": 2 } } } } }),
		);

		assert_eq!(second["aggregations"]["taxa"]["buckets"].as_array().map(Vec::len), Some(2));
		assert!(second["aggregations"]["taxa"].get("after_key").is_none());
	}
}
