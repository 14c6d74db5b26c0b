use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Cannot read config file {}.", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("Config file {} is not valid TOML for this service.", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
	#[error("{field} {rule}.")]
	Invalid { field: &'static str, rule: &'static str },
}
