//! Batch background removal CLI

use rmbg_batch::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
