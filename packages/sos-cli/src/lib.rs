use clap::builder::{
	Styles,
	styling::{AnsiColor, Effects},
};

/// `<crate version>-<git sha>-<target triple>` of the running binary.
pub const VERSION: &str = concat!(
	env!("CARGO_PKG_VERSION"),
	"-",
	env!("VERGEN_GIT_SHA"),
	"-",
	env!("VERGEN_CARGO_TARGET_TRIPLE"),
);

/// Help styling shared by every `sos-*` binary.
pub fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default() | Effects::BOLD)
		.usage(AnsiColor::Green.on_default() | Effects::BOLD)
		.literal(AnsiColor::Cyan.on_default() | Effects::BOLD)
		.placeholder(AnsiColor::Yellow.on_default())
		.error(AnsiColor::Red.on_default() | Effects::BOLD)
}

#[cfg(test)]
mod tests {
	#[test]
	fn version_starts_with_the_package_version() {
		assert!(super::VERSION.starts_with(env!("CARGO_PKG_VERSION")));
		assert!(super::VERSION.matches('-').count() >= 2);
	}
}
