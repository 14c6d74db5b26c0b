use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use sos_storage::search::SearchEngine;

use crate::{
	Error, Result,
	response::{self, CompositeAggregation, CompositeBucket},
};

/// Cursor-driven iterator over a composite aggregation. Each page resumes after the key of the
/// previous page's last bucket; iteration ends once a page comes back shorter than the page
/// size or without an after key.
pub(crate) struct CompositePager<'a, K, A> {
	engine: &'a dyn SearchEngine,
	index: &'a str,
	name: &'static str,
	query: Value,
	sources: Value,
	sub_aggregations: Option<Value>,
	page_size: u32,
	after: Option<Value>,
	done: bool,
	round_trips: usize,
	_bucket: PhantomData<fn() -> (K, A)>,
}
impl<'a, K, A> CompositePager<'a, K, A>
where
	K: DeserializeOwned,
	A: DeserializeOwned,
{
	pub(crate) fn new(
		engine: &'a dyn SearchEngine,
		index: &'a str,
		name: &'static str,
		query: Value,
		sources: Value,
		page_size: u32,
	) -> Self {
		Self {
			engine,
			index,
			name,
			query,
			sources,
			sub_aggregations: None,
			page_size: page_size.max(1),
			after: None,
			done: false,
			round_trips: 0,
			_bucket: PhantomData,
		}
	}

	pub(crate) fn with_sub_aggregations(mut self, sub_aggregations: Value) -> Self {
		self.sub_aggregations = Some(sub_aggregations);

		self
	}

	/// Resume after a cursor returned by an earlier iteration. `None` starts from the beginning.
	pub(crate) fn starting_after(mut self, after: Option<Value>) -> Self {
		self.after = after;

		self
	}

	/// Caps the size of the pages still to come.
	pub(crate) fn shrink_page_size(&mut self, page_size: u32) {
		self.page_size = self.page_size.min(page_size.max(1));
	}

	pub(crate) fn is_done(&self) -> bool {
		self.done
	}

	pub(crate) fn after_key(&self) -> Option<&Value> {
		if self.done { None } else { self.after.as_ref() }
	}

	pub(crate) fn round_trips(&self) -> usize {
		self.round_trips
	}

	pub(crate) async fn next_page(
		&mut self,
		cancel: &CancellationToken,
	) -> Result<Option<Vec<CompositeBucket<K, A>>>> {
		if self.done {
			return Ok(None);
		}
		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		let body = self.page_body();
		let raw = self.engine.search(self.index, &body).await?;
		let page: CompositeAggregation<K, A> = response::aggregation(self.name, raw)?;

		self.round_trips += 1;

		if page.buckets.len() < self.page_size as usize || page.after_key.is_none() {
			self.done = true;
		}

		self.after = page.after_key;

		tracing::debug!(
			aggregation = self.name,
			buckets = page.buckets.len(),
			round_trips = self.round_trips,
			done = self.done,
			"Fetched composite aggregation page."
		);

		Ok(Some(page.buckets))
	}

	/// Drains every remaining page. Nothing is returned when cancelled midway.
	pub(crate) async fn collect_all(
		&mut self,
		cancel: &CancellationToken,
	) -> Result<Vec<CompositeBucket<K, A>>> {
		let mut out = Vec::new();

		while let Some(buckets) = self.next_page(cancel).await? {
			out.extend(buckets);
		}

		Ok(out)
	}

	fn page_body(&self) -> Value {
		let mut composite = json!({ "size": self.page_size, "sources": self.sources });

		if let Some(after) = &self.after {
			composite["after"] = after.clone();
		}

		let mut aggregation = json!({ "composite": composite });

		if let Some(sub_aggregations) = &self.sub_aggregations {
			aggregation["aggs"] = sub_aggregations.clone();
		}

		json!({
			"size": 0,
			"track_total_hits": false,
			"query": self.query,
			"aggs": { (self.name): aggregation },
		})
	}
}
