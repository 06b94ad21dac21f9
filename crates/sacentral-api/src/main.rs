use sacentral_api::setup;
use sacentral_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    // Database, blob store, broker, services, consumer and routes
    let (_state, router, consumer) = setup::initialize_app(config.clone()).await?;

    setup::server::start_server(&config, router).await?;

    consumer.shutdown().await;
    Ok(())
}
