mod engine;
mod error;

pub use engine::{EngineCall, FakeEngine, composite_response, search_response, serve_composite};
pub use error::{Error, Result};

use std::{env, str::FromStr, thread};

use sqlx::{
	ConnectOptions, Connection,
	postgres::{PgConnectOptions, PgConnection},
};
use tokio::runtime::Builder;
use uuid::Uuid;

use sos_config::Postgres;
use sos_storage::db::Db;

const DSN_VAR: &str = "SOS_PG_DSN";
const MAINTENANCE_DATABASE: &str = "postgres";

/// Base DSN of the Postgres server used by database tests, if configured.
pub fn env_dsn() -> Option<String> {
	env::var(DSN_VAR).ok().filter(|dsn| !dsn.trim().is_empty())
}

/// A database created for one test on the server behind `SOS_PG_DSN`. Dropping it without
/// [`TestDatabase::cleanup`] still removes the database, from a helper thread.
pub struct TestDatabase {
	name: String,
	server: PgConnectOptions,
	target: PgConnectOptions,
	removed: bool,
}
impl TestDatabase {
	pub async fn new(base_dsn: &str) -> Result<Self> {
		let base = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Message(format!("Failed to parse {DSN_VAR}: {err}.")))?;
		let server = base.clone().database(MAINTENANCE_DATABASE);
		let name = format!("sos_test_{}", Uuid::new_v4().simple());

		run_on_server(&server, &format!(r#"CREATE DATABASE "{name}""#)).await?;

		Ok(Self { target: base.database(&name), name, server, removed: false })
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn dsn(&self) -> String {
		self.target.to_url_lossy().to_string()
	}

	pub fn postgres_config(&self) -> Postgres {
		Postgres { dsn: self.dsn(), pool_max_conns: 2 }
	}

	/// Connects to the database and applies the schema.
	pub async fn bootstrap(&self) -> Result<Db> {
		let db = Db::connect(&self.postgres_config()).await?;

		db.ensure_schema().await?;

		Ok(db)
	}

	pub async fn cleanup(mut self) -> Result<()> {
		remove_database(&self.server, &self.name).await?;

		self.removed = true;

		Ok(())
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		if self.removed {
			return;
		}

		let name = self.name.clone();
		let server = self.server.clone();
		let remover = thread::spawn(move || {
			let outcome = Builder::new_current_thread()
				.enable_all()
				.build()
				.map_err(|err| Error::Message(err.to_string()))
				.and_then(|runtime| runtime.block_on(remove_database(&server, &name)));

			if let Err(err) = outcome {
				eprintln!("Failed to remove test database {name}: {err}.");
			}
		});
		let _ = remover.join();
	}
}

async fn run_on_server(server: &PgConnectOptions, sql: &str) -> Result<()> {
	let mut conn = PgConnection::connect_with(server).await?;

	sqlx::query(sql).execute(&mut conn).await?;
	conn.close().await?;

	Ok(())
}

async fn remove_database(server: &PgConnectOptions, name: &str) -> Result<()> {
	run_on_server(server, &format!(r#"DROP DATABASE IF EXISTS "{name}" WITH (FORCE)"#)).await
}
