//! FoodHub settlement service

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foodhub_settlement::api::{self, AppState};
use foodhub_settlement::ledger::WalletLedger;
use foodhub_settlement::payment::{Gateways, RazorpayClient, RazorpayGateway, StripeClient, StripeGateway, WalletGateway};
use foodhub_settlement::publisher::{EventPublisher, LogPublisher, NatsPublisher};
use foodhub_settlement::store::{MemoryStore, PgStore, Store};
use foodhub_settlement::{SettlementEngine, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let settings = Settings::from_env()?;

    let store: Arc<dyn Store> = match &settings.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let nats = match &settings.nats_url {
        Some(url) => async_nats::connect(url.as_str()).await.map_err(|e| tracing::warn!(error = %e, "NATS unavailable, events will only be logged")).ok(),
        None => None,
    };
    let publisher: Arc<dyn EventPublisher> = match nats {
        Some(client) => Arc::new(NatsPublisher::new(client)),
        None => Arc::new(LogPublisher),
    };

    let mut gateways = Gateways::new().register(Arc::new(WalletGateway::new(WalletLedger::new(store.clone()))));
    if !settings.razorpay.key_id.is_empty() && !settings.razorpay.key_secret.is_empty() {
        let client = Arc::new(RazorpayClient::new(settings.razorpay.clone()));
        gateways = gateways.register(Arc::new(RazorpayGateway::new(client, &settings.razorpay, settings.currency.clone(), settings.razorpay_callback_url())));
    }
    if !settings.stripe.secret_key.is_empty() {
        let client = Arc::new(StripeClient::new(settings.stripe.clone()));
        gateways = gateways.register(Arc::new(StripeGateway::new(client, settings.currency.clone(), settings.stripe_callback_url())));
    }

    let engine = SettlementEngine::new(store, gateways, publisher, settings.checkout.clone());

    let sweeper = engine.clone();
    let every = Duration::from_secs(settings.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.expire_stale_orders(Utc::now()).await {
                tracing::error!(error = %e, "Expiry sweep failed");
            }
        }
    });

    let app = api::router(AppState { engine }).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("🚀 FoodHub settlement listening on 0.0.0.0:{}", settings.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?, app).await?;
    Ok(())
}
