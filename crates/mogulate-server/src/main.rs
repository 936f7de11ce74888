use chrono::Utc;
use color_eyre::eyre;
use mogulate_ai::{ChatClient, Generator, Provider};
use mogulate_billing::{PriceCatalog, Reconciler, StripeClient, WebhookVerifier};
use mogulate_server::config::GeneratorConfig;
use mogulate_server::{
    create_app, AppState, IdentityProvider, InMemoryProjects, PostgrestProjects, ProjectStore,
    ServerConfig, StaticTokens, SupabaseAuth,
};
use mogulate_usage::{InMemoryStorage, PostgrestStorage, Tier, UsageStorage, UsageTracker};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEV_USER_ID: &str = "dev-user";
const DEV_USER_EMAIL: &str = "dev@localhost";

fn generator(
    provider: Provider,
    config: &GeneratorConfig,
    timeout: Duration,
) -> eyre::Result<Arc<dyn Generator>> {
    if config.api_key.is_empty() {
        warn!(?provider, "No API key configured, generation calls will fail");
    }
    let mut client = ChatClient::new(provider, &config.api_key, timeout)?;
    if let Some(base_url) = &config.base_url {
        client = client.with_base_url(base_url);
    }
    if let Some(model) = &config.model {
        client = client.with_model(model);
    }
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mogulate_server=debug")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!(policy = ?config.cycle_policy, "Starting Mogulate server");

    let (storage, identity, projects): (
        Arc<dyn UsageStorage>,
        Arc<dyn IdentityProvider>,
        Arc<dyn ProjectStore>,
    ) = match &config.supabase {
        Some(db) => {
            info!(url = %db.url, "Using hosted database");
            (
                Arc::new(PostgrestStorage::new(
                    &db.url,
                    &db.service_role_key,
                    config.upstream_timeout,
                )?),
                Arc::new(SupabaseAuth::new(&db.url, &db.anon_key, config.upstream_timeout)?),
                Arc::new(PostgrestProjects::new(
                    &db.url,
                    &db.service_role_key,
                    config.upstream_timeout,
                )?),
            )
        }
        None => {
            let storage = InMemoryStorage::new();
            storage
                .create_actor(DEV_USER_ID, DEV_USER_EMAIL, Tier::Free, Utc::now())
                .await;
            warn!(
                token = %config.dev_token,
                "SUPABASE_URL not set, running on in-memory storage with a development user"
            );
            (
                Arc::new(storage),
                Arc::new(StaticTokens::new().with_token(
                    &config.dev_token,
                    DEV_USER_ID,
                    DEV_USER_EMAIL,
                )),
                Arc::new(InMemoryProjects::new()),
            )
        }
    };

    let mut prices = PriceCatalog::new(config.stripe.pro_min_cents);
    if let Some(price) = &config.stripe.starter_price {
        prices = prices.with_price(price.as_str(), Tier::Starter);
    }
    if let Some(price) = &config.stripe.pro_price {
        prices = prices.with_price(price.as_str(), Tier::Pro);
    }
    let payments = StripeClient::new(&config.stripe.secret_key, config.payments_timeout)?;

    let webhook_verifier = match &config.stripe.webhook_secret {
        Some(secret) => Some(Arc::new(WebhookVerifier::new(secret))),
        None => {
            warn!("STRIPE_WEBHOOK_SECRET not set, webhook deliveries will be rejected");
            None
        }
    };

    let state = AppState {
        tracker: Arc::new(UsageTracker::with_policy(storage.clone(), config.cycle_policy)),
        reconciler: Arc::new(Reconciler::new(Arc::new(payments), storage, prices)),
        webhook_verifier,
        identity,
        search: generator(Provider::Perplexity, &config.perplexity, config.upstream_timeout)?,
        chat: generator(Provider::OpenAi, &config.openai, config.upstream_timeout)?,
        projects,
    };

    let app = create_app(state);
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Mogulate server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
