use anyhow::Result;
use clap::Parser;
use pixel_ingest::cli::{self, RunStatus};
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    match cli::dispatch(args).await {
        Ok(RunStatus::Ok) => Ok(()),
        Ok(RunStatus::ItemFailures) => std::process::exit(2),
        Err(err) => {
            error!("{:#}", err);
            std::process::exit(1);
        }
    }
}
