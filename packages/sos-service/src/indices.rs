use sos_domain::filter::Filter;
use sos_storage::search;

use crate::{Result, SosService};

/// Physical indices a single request reads from. Resolved once and reused by every count,
/// search and aggregation of that request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexScope {
	pub public: String,
	pub protected: Option<String>,
}
impl IndexScope {
	pub fn new(prefix: &str, instance: i16, include_protected: bool) -> Self {
		Self {
			public: search::index_name(prefix, instance, false),
			protected: include_protected.then(|| search::index_name(prefix, instance, true)),
		}
	}

	/// Comma separated target understood by the engine's multi-index syntax.
	pub fn target(&self) -> String {
		match &self.protected {
			Some(protected) => format!("{},{protected}", self.public),
			None => self.public.clone(),
		}
	}
}

impl SosService {
	pub async fn resolve_indices(&self, filter: &Filter) -> Result<IndexScope> {
		let instance = self.collaborators.instances.active_instance().await?;

		Ok(IndexScope::new(&self.index_prefix, instance, filter.include_protected()))
	}
}

#[cfg(test)]
mod tests {
	use crate::indices::IndexScope;

	#[test]
	fn protected_scope_targets_both_indices() {
		assert_eq!(IndexScope::new("sos", 1, false).target(), "sos-observation-1");
		assert_eq!(
			IndexScope::new("sos", 0, true).target(),
			"sos-observation-0,sos-observation-protected-0"
		);
	}
}
