use calsync::startup;
use tracing::info;

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize logging
    startup::init_logging()?;

    info!("Starting calsync");

    // Load configuration
    let config = startup::load_config().await?;

    // Start the server
    startup::start_server(config).await
}
