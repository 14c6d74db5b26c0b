pub mod aggregation;
pub mod filter;
pub mod geo;
pub mod paged;
pub mod taxon_sum;
pub mod taxon_tree;

mod error;

pub use error::{Error, Result};
pub use paged::{LimitExceeded, Limited, PagedResult, ResourceLimit};
