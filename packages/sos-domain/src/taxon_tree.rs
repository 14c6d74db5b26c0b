use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const BIOTA_TAXON_ID: i32 = 0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonRelation {
	pub taxon_id: i32,
	pub parent_id: Option<i32>,
	#[serde(default)]
	pub secondary_parent_ids: Vec<i32>,
}

#[derive(Clone, Debug)]
pub struct TaxonNode {
	pub taxon_id: i32,
	pub parent: Option<usize>,
	pub secondary_parents: Vec<usize>,
	pub children: Vec<usize>,
	pub secondary_children: Vec<usize>,
	/// Position in the children-first order; always lower than every parent's position.
	pub reverse_topological_index: usize,
}
impl TaxonNode {
	pub fn parents(&self) -> impl Iterator<Item = usize> + '_ {
		self.parent.into_iter().chain(self.secondary_parents.iter().copied())
	}
}

/// Read-only taxon DAG stored as an arena. Every node has at most one main parent and any
/// number of secondary parents.
#[derive(Clone, Debug, Default)]
pub struct TaxonTree {
	nodes: Vec<TaxonNode>,
	index: HashMap<i32, usize>,
	reverse_topological_order: Vec<usize>,
}
impl TaxonTree {
	pub fn build(relations: impl IntoIterator<Item = TaxonRelation>) -> Result<Self> {
		let relations = relations.into_iter().collect::<Vec<_>>();
		let mut index = HashMap::with_capacity(relations.len());

		for (position, relation) in relations.iter().enumerate() {
			if index.insert(relation.taxon_id, position).is_some() {
				return Err(Error::DuplicateTaxon { taxon_id: relation.taxon_id });
			}
		}

		let resolve = |taxon_id: i32, parent_id: i32| {
			index.get(&parent_id).copied().ok_or(Error::UnknownParent { taxon_id, parent_id })
		};
		let mut nodes = Vec::with_capacity(relations.len());

		for relation in &relations {
			let parent = relation.parent_id.map(|id| resolve(relation.taxon_id, id)).transpose()?;
			let mut secondary_parents = Vec::with_capacity(relation.secondary_parent_ids.len());

			for parent_id in &relation.secondary_parent_ids {
				let position = resolve(relation.taxon_id, *parent_id)?;

				if Some(position) != parent && !secondary_parents.contains(&position) {
					secondary_parents.push(position);
				}
			}

			nodes.push(TaxonNode {
				taxon_id: relation.taxon_id,
				parent,
				secondary_parents,
				children: Vec::new(),
				secondary_children: Vec::new(),
				reverse_topological_index: 0,
			});
		}

		for position in 0..nodes.len() {
			if let Some(parent) = nodes[position].parent {
				nodes[parent].children.push(position);
			}

			for parent in nodes[position].secondary_parents.clone() {
				nodes[parent].secondary_children.push(position);
			}
		}

		let reverse_topological_order = children_first_order(&nodes)?;

		for (order, position) in reverse_topological_order.iter().enumerate() {
			nodes[*position].reverse_topological_index = order;
		}

		Ok(Self { nodes, index, reverse_topological_order })
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn position(&self, taxon_id: i32) -> Option<usize> {
		self.index.get(&taxon_id).copied()
	}

	pub fn node(&self, taxon_id: i32) -> Option<&TaxonNode> {
		self.position(taxon_id).map(|position| &self.nodes[position])
	}

	pub fn node_at(&self, position: usize) -> &TaxonNode {
		&self.nodes[position]
	}

	pub fn nodes(&self) -> &[TaxonNode] {
		&self.nodes
	}

	/// Arena positions, children before parents.
	pub fn reverse_topological_order(&self) -> &[usize] {
		&self.reverse_topological_order
	}

	/// Whether `order` is a permutation of the arena in which every node precedes all of its
	/// parents.
	pub fn is_children_first(&self, order: &[usize]) -> bool {
		if order.len() != self.nodes.len() {
			return false;
		}

		let mut rank = vec![usize::MAX; self.nodes.len()];

		for (at, position) in order.iter().enumerate() {
			if *position >= self.nodes.len() || rank[*position] != usize::MAX {
				return false;
			}

			rank[*position] = at;
		}

		self.nodes
			.iter()
			.enumerate()
			.all(|(position, node)| node.parents().all(|parent| rank[position] < rank[parent]))
	}

	/// All taxa below the given ids, following both main and secondary edges. Unknown ids are
	/// kept as-is when `include_self` is set so callers still filter on them.
	pub fn underlying_taxon_ids(&self, taxon_ids: &[i32], include_self: bool) -> BTreeSet<i32> {
		let mut out = BTreeSet::new();
		let mut queue = VecDeque::new();
		let mut seen = vec![false; self.nodes.len()];

		for taxon_id in taxon_ids {
			if include_self {
				out.insert(*taxon_id);
			}
			if let Some(position) = self.position(*taxon_id)
				&& !seen[position]
			{
				seen[position] = true;

				queue.push_back(position);
			}
		}

		while let Some(position) = queue.pop_front() {
			let node = &self.nodes[position];

			for child in node.children.iter().chain(node.secondary_children.iter()) {
				if seen[*child] {
					continue;
				}

				seen[*child] = true;

				out.insert(self.nodes[*child].taxon_id);
				queue.push_back(*child);
			}
		}

		out
	}
}

fn children_first_order(nodes: &[TaxonNode]) -> Result<Vec<usize>> {
	let mut pending_children = nodes
		.iter()
		.map(|node| node.children.len() + node.secondary_children.len())
		.collect::<Vec<_>>();
	let mut ready = pending_children
		.iter()
		.enumerate()
		.filter(|(_, pending)| **pending == 0)
		.map(|(position, _)| position)
		.collect::<VecDeque<_>>();
	let mut order = Vec::with_capacity(nodes.len());

	while let Some(position) = ready.pop_front() {
		order.push(position);

		for parent in nodes[position].parents() {
			pending_children[parent] -= 1;

			if pending_children[parent] == 0 {
				ready.push_back(parent);
			}
		}
	}

	if order.len() != nodes.len() {
		let stuck = pending_children
			.iter()
			.position(|pending| *pending > 0)
			.map(|position| nodes[position].taxon_id)
			.unwrap_or_default();

		return Err(Error::Cycle { taxon_id: stuck });
	}

	Ok(order)
}

#[cfg(test)]
mod tests {
	use crate::{
		Error,
		taxon_tree::{TaxonRelation, TaxonTree},
	};

	fn relation(taxon_id: i32, parent_id: Option<i32>, secondary: &[i32]) -> TaxonRelation {
		TaxonRelation { taxon_id, parent_id, secondary_parent_ids: secondary.to_vec() }
	}

	#[test]
	fn order_places_children_before_all_parents() {
		let tree = TaxonTree::build([
			relation(0, None, &[]),
			relation(1, Some(0), &[]),
			relation(2, Some(0), &[]),
			relation(3, Some(1), &[2]),
		])
		.expect("Tree should build.");
		let order = tree.reverse_topological_order();

		assert!(tree.is_children_first(order));

		for node in tree.nodes() {
			for parent in node.parents() {
				assert!(node.reverse_topological_index < tree.node_at(parent).reverse_topological_index);
			}
		}
	}

	#[test]
	fn rejects_unknown_parent_duplicates_and_cycles() {
		let unknown = TaxonTree::build([relation(1, Some(9), &[])]);

		assert!(matches!(unknown, Err(Error::UnknownParent { taxon_id: 1, parent_id: 9 })));

		let duplicate = TaxonTree::build([relation(1, None, &[]), relation(1, None, &[])]);

		assert!(matches!(duplicate, Err(Error::DuplicateTaxon { taxon_id: 1 })));

		let cycle = TaxonTree::build([
			relation(0, None, &[]),
			relation(1, Some(2), &[]),
			relation(2, Some(1), &[]),
		]);

		assert!(matches!(cycle, Err(Error::Cycle { .. })));
	}

	#[test]
	fn secondary_parent_equal_to_main_parent_is_dropped() {
		let tree = TaxonTree::build([relation(0, None, &[]), relation(1, Some(0), &[0, 0])])
			.expect("Tree should build.");

		assert!(tree.node(1).expect("Node should exist.").secondary_parents.is_empty());
		assert_eq!(tree.node(0).expect("Node should exist.").children, vec![1]);
	}

	#[test]
	fn underlying_ids_follow_secondary_edges() {
		let tree = TaxonTree::build([
			relation(0, None, &[]),
			relation(1, Some(0), &[]),
			relation(2, Some(0), &[]),
			relation(3, Some(2), &[1]),
			relation(4, Some(3), &[]),
		])
		.expect("Tree should build.");

		assert_eq!(tree.underlying_taxon_ids(&[1], true).into_iter().collect::<Vec<_>>(), vec![
			1, 3, 4
		]);
		assert_eq!(tree.underlying_taxon_ids(&[2], false).into_iter().collect::<Vec<_>>(), vec![
			3, 4
		]);
		assert_eq!(tree.underlying_taxon_ids(&[99], true).into_iter().collect::<Vec<_>>(), vec![
			99
		]);
	}

	#[test]
	fn rejects_order_with_parent_first() {
		let tree = TaxonTree::build([relation(0, None, &[]), relation(1, Some(0), &[])])
			.expect("Tree should build.");
		let root = tree.position(0).expect("Root should exist.");
		let leaf = tree.position(1).expect("Leaf should exist.");

		assert!(tree.is_children_first(&[leaf, root]));
		assert!(!tree.is_children_first(&[root, leaf]));
		assert!(!tree.is_children_first(&[leaf]));
		assert!(!tree.is_children_first(&[leaf, leaf]));
	}
}
