pub mod aggregation;
pub mod geo;
pub mod query;
pub mod search;
pub mod taxon;

mod composite;
mod error;
mod indices;
mod response;

pub use aggregation::AggregationRequest;
pub use error::{Error, Result};
pub use geo::GeoTileTaxaRequest;
pub use indices::IndexScope;
pub use search::{SearchRequest, SortOrder};
pub use sos_storage::BoxFuture;
pub use taxon::{TaxonAggregationRequest, TaxonExistsIndication};

use std::{collections::BTreeSet, sync::Arc};

use sos_config::Search;
use sos_domain::taxon_tree::{TaxonRelation, TaxonTree};
use sos_storage::{db::Db, queries, search::SearchEngine};

/// Source of the active index generation. Implementations re-read the indicator on every call.
pub trait InstanceProvider
where
	Self: Send + Sync,
{
	fn active_instance(&self) -> BoxFuture<'_, Result<i16>>;
}

pub trait TaxonTreeProvider
where
	Self: Send + Sync,
{
	fn tree(&self) -> Arc<TaxonTree>;

	fn underlying_taxon_ids(&self, taxon_ids: &[i32], include_self: bool) -> BTreeSet<i32> {
		self.tree().underlying_taxon_ids(taxon_ids, include_self)
	}
}

/// Reads the active instance from the processed-configuration table.
pub struct StoredInstance {
	db: Arc<Db>,
}
impl StoredInstance {
	pub fn new(db: Arc<Db>) -> Self {
		Self { db }
	}

	async fn active_instance_inner(&self) -> Result<i16> {
		match queries::active_instance(&self.db).await? {
			Some(instance) => Ok(instance),
			None => {
				tracing::warn!("No processed configuration found; using instance 0.");

				Ok(0)
			},
		}
	}
}
impl InstanceProvider for StoredInstance {
	fn active_instance(&self) -> BoxFuture<'_, Result<i16>> {
		Box::pin(self.active_instance_inner())
	}
}

pub struct FixedInstance(pub i16);
impl InstanceProvider for FixedInstance {
	fn active_instance(&self) -> BoxFuture<'_, Result<i16>> {
		let instance = self.0;

		Box::pin(async move { Ok(instance) })
	}
}

/// A taxon tree loaded once and shared read-only by every request.
pub struct StaticTaxonTree {
	tree: Arc<TaxonTree>,
}
impl StaticTaxonTree {
	pub fn new(tree: TaxonTree) -> Self {
		Self { tree: Arc::new(tree) }
	}

	pub async fn load(db: &Db) -> Result<Self> {
		let rows = queries::list_taxon_relations(db).await?;
		let tree = TaxonTree::build(rows.into_iter().map(|row| TaxonRelation {
			taxon_id: row.taxon_id,
			parent_id: row.parent_id,
			secondary_parent_ids: row.secondary_parent_ids,
		}))?;

		tracing::info!(taxa = tree.len(), "Loaded taxon tree.");

		Ok(Self::new(tree))
	}
}
impl TaxonTreeProvider for StaticTaxonTree {
	fn tree(&self) -> Arc<TaxonTree> {
		self.tree.clone()
	}
}

#[derive(Clone)]
pub struct Collaborators {
	pub engine: Arc<dyn SearchEngine>,
	pub instances: Arc<dyn InstanceProvider>,
	pub taxa: Arc<dyn TaxonTreeProvider>,
}
impl Collaborators {
	pub fn new(
		engine: Arc<dyn SearchEngine>,
		instances: Arc<dyn InstanceProvider>,
		taxa: Arc<dyn TaxonTreeProvider>,
	) -> Self {
		Self { engine, instances, taxa }
	}
}

pub struct SosService {
	pub cfg: Search,
	pub index_prefix: String,
	pub collaborators: Collaborators,
}
impl SosService {
	pub fn new(cfg: Search, index_prefix: impl Into<String>, collaborators: Collaborators) -> Self {
		Self { cfg, index_prefix: index_prefix.into(), collaborators }
	}

	pub(crate) fn engine(&self) -> &dyn SearchEngine {
		self.collaborators.engine.as_ref()
	}

	pub(crate) fn taxa(&self) -> &dyn TaxonTreeProvider {
		self.collaborators.taxa.as_ref()
	}
}
