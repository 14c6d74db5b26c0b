pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Search engine error: {message}")]
	Engine { message: String, debug: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Taxonomy error: {message}")]
	Taxonomy { message: String },
	#[error("Operation was cancelled.")]
	Cancelled,
}
impl Error {
	pub(crate) fn decode(what: &str, err: serde_json::Error) -> Self {
		Self::Engine {
			message: format!("Failed to decode {what} from the engine response."),
			debug: err.to_string(),
		}
	}
}

impl From<sos_storage::Error> for Error {
	fn from(err: sos_storage::Error) -> Self {
		match err {
			sos_storage::Error::Engine { status, debug } => {
				Self::Engine { message: format!("Engine responded with status {status}."), debug }
			},
			sos_storage::Error::Reqwest(inner) =>
				Self::Engine { message: "Engine request failed.".to_string(), debug: inner.to_string() },
			sos_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
		}
	}
}

impl From<sos_domain::Error> for Error {
	fn from(err: sos_domain::Error) -> Self {
		Self::Taxonomy { message: err.to_string() }
	}
}
