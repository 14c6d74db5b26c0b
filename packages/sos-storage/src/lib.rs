pub mod db;
pub mod models;
pub mod queries;
pub mod schema;
pub mod search;

mod error;

use std::{future::Future, pin::Pin};

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
