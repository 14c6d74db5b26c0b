use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::Instrument;

use sos_domain::{LimitExceeded, Limited, PagedResult, filter::Filter};

use crate::{
	IndexScope, Result, SosService,
	query::{self, CompiledQuery},
	response::{self, SearchResponse, TotalHits, TotalRelation},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
	#[default]
	Asc,
	Desc,
}

#[derive(Clone, Debug, Default)]
pub struct SearchRequest {
	pub filter: Filter,
	pub skip: u64,
	pub take: u64,
	pub sort_by: Option<String>,
	pub sort_order: SortOrder,
}

/// How the total count of a result page is obtained. Decided once per call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TotalCountStrategy {
	/// The engine's hit-count metadata is exact.
	Trust,
	/// The engine stopped tracking at its ceiling; count again without a limit.
	RecountBeyondTracking,
	/// The caller asked for an exact count.
	AlwaysRecount,
}
impl TotalCountStrategy {
	pub(crate) fn choose(filter: &Filter, total: &TotalHits, tracking_limit: u64) -> Self {
		if filter.requests_real_count() {
			Self::AlwaysRecount
		} else if total.relation == TotalRelation::Gte || total.value >= tracking_limit {
			Self::RecountBeyondTracking
		} else {
			Self::Trust
		}
	}
}

impl SosService {
	/// One page of matching documents decoded as `T`. A page past the result window is rejected
	/// with a typed limit failure.
	pub async fn search<T>(&self, req: &SearchRequest) -> Result<Limited<PagedResult<T>>>
	where
		T: DeserializeOwned,
	{
		if req.skip.saturating_add(req.take) > self.cfg.max_result_window {
			return Ok(Err(LimitExceeded::result_window(
				self.cfg.max_result_window,
				req.skip,
				req.take,
			)));
		}

		let span = tracing::info_span!("search", skip = req.skip, take = req.take);

		self.search_inner(req).instrument(span).await.map(Ok)
	}

	/// Number of matching documents. An inactive filter counts nothing and never reaches the
	/// engine.
	pub async fn count(&self, filter: &Filter) -> Result<u64> {
		if !filter.is_active() {
			return Ok(0);
		}

		let scope = self.resolve_indices(filter).await?;
		let query = query::compile(filter, self.taxa())?;

		self.count_in(&scope, &query).await
	}

	pub(crate) async fn count_in(&self, scope: &IndexScope, query: &CompiledQuery) -> Result<u64> {
		let body = json!({ "query": query.to_query() });

		Ok(self.engine().count(&scope.target(), &body).await?)
	}

	async fn search_inner<T>(&self, req: &SearchRequest) -> Result<PagedResult<T>>
	where
		T: DeserializeOwned,
	{
		let scope = self.resolve_indices(&req.filter).await?;
		let query = query::compile(&req.filter, self.taxa())?;
		let body = self.search_body(req, &query);
		let raw = self.engine().search(&scope.target(), &body).await?;
		let decoded: SearchResponse<T> = response::decode("search hits", raw)?;
		let total = decoded.hits.total;
		let records =
			decoded.hits.hits.into_iter().map(|hit| hit.source).collect::<Vec<_>>();
		let total_count = match TotalCountStrategy::choose(
			&req.filter,
			&total,
			self.cfg.track_total_hits_limit,
		) {
			TotalCountStrategy::Trust => total.value,
			strategy => {
				let count = self.count_in(&scope, &query).await?;

				tracing::debug!(?strategy, estimate = total.value, count, "Recounted search total.");

				count
			},
		};

		Ok(PagedResult { records, skip: req.skip, take: req.take, total_count })
	}

	fn search_body(&self, req: &SearchRequest, query: &CompiledQuery) -> Value {
		let mut body = json!({
			"from": req.skip,
			"size": req.take,
			"query": query.to_query(),
			"track_total_hits": self.cfg.track_total_hits_limit,
		});
		let output_fields = &req.filter.base().output_fields;

		if !output_fields.is_empty() {
			body["_source"] = json!({ "includes": output_fields });
		}
		if let Some(sort_by) = req.sort_by.as_deref().filter(|sort_by| !sort_by.trim().is_empty()) {
			let order = match req.sort_order {
				SortOrder::Asc => "asc",
				SortOrder::Desc => "desc",
			};

			body["sort"] = json!([{ (sort_by): { "order": order } }]);
		}

		body
	}
}
