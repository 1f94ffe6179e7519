use anyhow::Result;
use wittly::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
