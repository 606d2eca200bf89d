/// DID Registrar service binary
use did_registrar::{config::RegistrarConfig, jobs, server, AppContext, RegistrarResult};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> RegistrarResult<()> {
    // Load configuration first so RUST_LOG from .env applies
    let config = RegistrarConfig::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("did_registrar={},tower_http=info", config.logging.level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(version = %config.service.version, "starting DID registrar");

    let ctx = AppContext::new(config).await?;
    let ctx = Arc::new(ctx);

    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    server::serve((*ctx).clone()).await?;

    Ok(())
}
