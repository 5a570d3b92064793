use anyhow::Context;
use ledgerhook_api::{create_router, AppState, Config};
use ledgerhook_billing::{BillingService, StripeConfig};
use ledgerhook_shared::db;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("loading configuration")?;
    init_tracing(config.log_json);

    let pool = db::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("connecting to database")?;
    db::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let stripe = StripeConfig::from_env().context("loading Stripe configuration")?;
    let billing = BillingService::new(stripe, pool.clone(), config.default_currency.clone());

    let bind_address = config.bind_address.clone();
    let app = create_router(AppState::new(config, pool, billing));

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {}", bind_address))?;
    tracing::info!(address = %bind_address, "ledgerhook-api listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
