use enrollment_service::{config::Config, Application};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    service_core::observability::init_tracing("enrollment-service", "info");

    let config = Config::from_env()?;
    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
