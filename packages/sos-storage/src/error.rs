#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	/// Non-success status or an unexpected body; `debug` carries the engine's own text.
	#[error("Search engine responded with status {status}.")]
	Engine { status: u16, debug: String },
}
