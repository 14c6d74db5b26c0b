use clap::Parser;

use sos_summation::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	sos_summation::run(Args::parse()).await
}
