use std::path::PathBuf;

use clap::Parser;
use courier::{
    Controller, Courier,
    config::{self, DEFAULT_PATHS},
};

#[cfg(not(unix))]
compile_error!("Only unix platforms are currently supported");

#[derive(Debug, Parser)]
#[command(version, about = "A DKIM-signing mail relay")]
struct Args {
    /// Configuration file, otherwise ./courier.config.ron then
    /// /etc/courier/courier.config.ron.
    #[arg(short, long, env = config::CONFIG_ENV)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let candidates: Vec<PathBuf> = DEFAULT_PATHS.iter().map(PathBuf::from).collect();
    let path = config::locate(args.config, &candidates)?;

    Controller::new(Courier::load(&path)?)?.run().await
}
