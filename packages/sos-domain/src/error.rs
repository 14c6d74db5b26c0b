pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Taxon {taxon_id} is listed more than once.")]
	DuplicateTaxon { taxon_id: i32 },
	#[error("Taxon {taxon_id} references unknown parent {parent_id}.")]
	UnknownParent { taxon_id: i32, parent_id: i32 },
	#[error("Taxon hierarchy contains a cycle through taxon {taxon_id}.")]
	Cycle { taxon_id: i32 },
	#[error("Summation order is not a valid children-first linearization of the taxon tree.")]
	InvalidOrder,
}
