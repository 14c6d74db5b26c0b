use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{Error, Result, taxon_tree::TaxonTree};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentHit {
	pub occurrence_id: String,
	#[serde(with = "time::serde::rfc3339")]
	pub event_start_date: OffsetDateTime,
}

/// Raw per-taxon numbers as returned by the engine, before any rollup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaxonObservations {
	pub observation_count: u64,
	pub first_sighting: Option<OffsetDateTime>,
	pub last_sighting: Option<OffsetDateTime>,
	pub recent_hits: Vec<RecentHit>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonAggregationItem {
	pub taxon_id: i32,
	pub observation_count: u64,
	pub sum_observation_count: u64,
	#[serde(with = "time::serde::rfc3339::option")]
	pub first_sighting: Option<OffsetDateTime>,
	#[serde(with = "time::serde::rfc3339::option")]
	pub last_sighting: Option<OffsetDateTime>,
	pub recent_hits: Vec<RecentHit>,
}
impl TaxonAggregationItem {
	/// An item without any rollup: the summed count equals the taxon's own count.
	pub fn from_raw(taxon_id: i32, raw: &TaxonObservations) -> Self {
		Self {
			taxon_id,
			observation_count: raw.observation_count,
			sum_observation_count: raw.observation_count,
			first_sighting: raw.first_sighting,
			last_sighting: raw.last_sighting,
			recent_hits: raw.recent_hits.clone(),
		}
	}
}

/// Raw numbers of one taxon for the province variant. `observation_count` includes observations
/// without a province; `by_province_id` only holds located ones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvinceObservations {
	pub observation_count: u64,
	pub by_province_id: HashMap<String, u64>,
}
impl ProvinceObservations {
	pub fn add(&mut self, province_id: Option<String>, count: u64) {
		self.observation_count += count;

		if let Some(province_id) = province_id {
			*self.by_province_id.entry(province_id).or_default() += count;
		}
	}

	fn province_count(&self) -> usize {
		self.by_province_id.values().filter(|count| **count > 0).count()
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonSumAggregationItem {
	pub taxon_id: i32,
	pub observation_count: u64,
	pub sum_observation_count: u64,
	pub province_count: usize,
	pub sum_province_count: usize,
	pub sum_observation_count_by_province_id: BTreeMap<String, u64>,
}

/// Per-node carrier used while propagating. `dependent_taxon_ids` holds every taxon whose own
/// numbers are already inside `rollup`.
struct NodeSum<R> {
	dependent_taxon_ids: HashSet<i32>,
	rollup: R,
}

#[derive(Default)]
struct ObservationRollup {
	sum_observation_count: u64,
	first_sighting: Option<OffsetDateTime>,
	last_sighting: Option<OffsetDateTime>,
	recent_hits: Vec<RecentHit>,
}
impl ObservationRollup {
	fn absorb(&mut self, raw: &TaxonObservations, max_recent_hits: usize) {
		self.sum_observation_count += raw.observation_count;
		self.first_sighting = min_date(self.first_sighting, raw.first_sighting);
		self.last_sighting = max_date(self.last_sighting, raw.last_sighting);

		if max_recent_hits == 0 || raw.recent_hits.is_empty() {
			return;
		}

		self.recent_hits.extend(raw.recent_hits.iter().cloned());
		self.recent_hits.sort_by(|a, b| {
			b.event_start_date
				.cmp(&a.event_start_date)
				.then_with(|| a.occurrence_id.cmp(&b.occurrence_id))
		});
		self.recent_hits.truncate(max_recent_hits);
	}
}

#[derive(Default)]
struct ProvinceRollup {
	sum_observation_count: u64,
	by_province_id: BTreeMap<String, u64>,
}
impl ProvinceRollup {
	fn absorb(&mut self, raw: &ProvinceObservations) {
		self.sum_observation_count += raw.observation_count;

		for (province_id, count) in &raw.by_province_id {
			if *count > 0 {
				*self.by_province_id.entry(province_id.clone()).or_default() += count;
			}
		}
	}
}

/// Rolls raw per-taxon observation numbers up the taxon tree, children first. The result only
/// contains taxa with a non-zero summed count.
pub fn sum_by_taxon(
	raw: &HashMap<i32, TaxonObservations>,
	tree: &TaxonTree,
	max_recent_hits: usize,
) -> HashMap<i32, TaxonAggregationItem> {
	sum_observations(raw, tree, tree.reverse_topological_order(), max_recent_hits)
}

/// Same as [`sum_by_taxon`] with a caller-chosen children-first order.
pub fn sum_by_taxon_in_order(
	raw: &HashMap<i32, TaxonObservations>,
	tree: &TaxonTree,
	order: &[usize],
	max_recent_hits: usize,
) -> Result<HashMap<i32, TaxonAggregationItem>> {
	if !tree.is_children_first(order) {
		return Err(Error::InvalidOrder);
	}

	Ok(sum_observations(raw, tree, order, max_recent_hits))
}

/// Province coverage variant. Observation sums count every observation; province maps and
/// province counts only see the located ones.
pub fn sum_by_taxon_and_province(
	raw: &HashMap<i32, ProvinceObservations>,
	tree: &TaxonTree,
) -> HashMap<i32, TaxonSumAggregationItem> {
	let sums = propagate(tree, tree.reverse_topological_order(), |rollup: &mut ProvinceRollup, id| {
		if let Some(observations) = raw.get(&id) {
			rollup.absorb(observations);
		}
	});
	let own = |taxon_id: i32| {
		raw.get(&taxon_id)
			.map(|observations| (observations.observation_count, observations.province_count()))
			.unwrap_or((0, 0))
	};
	let mut out = raw
		.keys()
		.filter(|taxon_id| tree.position(**taxon_id).is_none())
		.map(|taxon_id| {
			let (observation_count, province_count) = own(*taxon_id);
			let mut rollup = ProvinceRollup::default();

			rollup.absorb(&raw[taxon_id]);

			(*taxon_id, TaxonSumAggregationItem {
				taxon_id: *taxon_id,
				observation_count,
				sum_observation_count: rollup.sum_observation_count,
				province_count,
				sum_province_count: rollup.by_province_id.len(),
				sum_observation_count_by_province_id: rollup.by_province_id,
			})
		})
		.collect::<HashMap<_, _>>();

	for (position, sum) in sums.into_iter().enumerate() {
		let taxon_id = tree.node_at(position).taxon_id;
		let (observation_count, province_count) = own(taxon_id);

		out.insert(taxon_id, TaxonSumAggregationItem {
			taxon_id,
			observation_count,
			sum_observation_count: sum.rollup.sum_observation_count,
			province_count,
			sum_province_count: sum.rollup.by_province_id.len(),
			sum_observation_count_by_province_id: sum.rollup.by_province_id,
		});
	}

	out.retain(|_, item| item.sum_observation_count > 0);

	out
}

fn sum_observations(
	raw: &HashMap<i32, TaxonObservations>,
	tree: &TaxonTree,
	order: &[usize],
	max_recent_hits: usize,
) -> HashMap<i32, TaxonAggregationItem> {
	let sums = propagate(tree, order, |rollup: &mut ObservationRollup, id| {
		if let Some(observations) = raw.get(&id) {
			rollup.absorb(observations, max_recent_hits);
		}
	});
	let mut out = raw
		.iter()
		.map(|(taxon_id, observations)| {
			(*taxon_id, TaxonAggregationItem::from_raw(*taxon_id, observations))
		})
		.collect::<HashMap<_, _>>();

	for (position, sum) in sums.into_iter().enumerate() {
		let taxon_id = tree.node_at(position).taxon_id;
		let observation_count = raw.get(&taxon_id).map(|raw| raw.observation_count).unwrap_or(0);

		out.insert(taxon_id, TaxonAggregationItem {
			taxon_id,
			observation_count,
			sum_observation_count: sum.rollup.sum_observation_count,
			first_sighting: sum.rollup.first_sighting,
			last_sighting: sum.rollup.last_sighting,
			recent_hits: sum.rollup.recent_hits,
		});
	}

	out.retain(|_, item| item.sum_observation_count > 0);

	out
}

/// Core propagation shared by both variants. Returns one carrier per arena position.
///
/// For every node (children first) and each of its parents, only the dependent ids the parent
/// has not seen yet are merged, and for each such id its own raw numbers are absorbed. A taxon
/// reachable through converging paths is therefore counted once per ancestor.
fn propagate<R, F>(tree: &TaxonTree, order: &[usize], mut absorb_own: F) -> Vec<NodeSum<R>>
where
	R: Default,
	F: FnMut(&mut R, i32),
{
	let mut sums = tree
		.nodes()
		.iter()
		.map(|node| {
			let mut rollup = R::default();

			absorb_own(&mut rollup, node.taxon_id);

			NodeSum { dependent_taxon_ids: HashSet::from([node.taxon_id]), rollup }
		})
		.collect::<Vec<_>>();

	for position in order {
		let node = tree.node_at(*position);

		for parent in node.parents() {
			let new_ids = sums[*position]
				.dependent_taxon_ids
				.difference(&sums[parent].dependent_taxon_ids)
				.copied()
				.collect::<Vec<_>>();
			let target = &mut sums[parent];

			for id in new_ids {
				target.dependent_taxon_ids.insert(id);

				absorb_own(&mut target.rollup, id);
			}
		}
	}

	sums
}

fn min_date(left: Option<OffsetDateTime>, right: Option<OffsetDateTime>) -> Option<OffsetDateTime> {
	match (left, right) {
		(Some(left), Some(right)) => Some(left.min(right)),
		(left, right) => left.or(right),
	}
}

fn max_date(left: Option<OffsetDateTime>, right: Option<OffsetDateTime>) -> Option<OffsetDateTime> {
	match (left, right) {
		(Some(left), Some(right)) => Some(left.max(right)),
		(left, right) => left.or(right),
	}
}
