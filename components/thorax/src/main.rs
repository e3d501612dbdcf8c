use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Main entrypoint simply delegates control to CLI layer.
    // Configuration and tracing are set up there, once flags are parsed.
    thorax::cli::cli::run().await
}
