use rust_decimal::Decimal;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use cod_fulfillment::actors::{BackgroundActors, Schedule};
use cod_fulfillment::clock::SystemClock;
use cod_fulfillment::collaborators::{InMemoryInventory, Notifier, RecordingNotifier, RedpandaNotifier};
use cod_fulfillment::config::{AppConfig, StoreBackend};
use cod_fulfillment::domain::order::{CartLine, Requester};
use cod_fulfillment::event_sourcing::{InMemoryStore, ScyllaStore};
use cod_fulfillment::fulfillment::{Collaborators, FulfillmentService, PlaceOrderRequest, StatusChange};
use cod_fulfillment::messaging::RedpandaClient;
use cod_fulfillment::metrics::{self, Metrics};
use cod_fulfillment::verification_codes::{RedisCodeStore, RegistrationCodeStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cod_fulfillment=debug"))
        )
        .init();

    tracing::info!("🚀 Starting COD order fulfillment");

    let config = AppConfig::from_env()?;
    tracing::info!(store = ?config.store, metrics_port = config.metrics_port, "Configuration loaded");

    // === 1. Initialize Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // Start metrics HTTP server in background thread
    let server_metrics = metrics.clone();
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Metrics runtime error: {}", e);
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(server_metrics, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 2. Storage backend and collaborators ===
    let inventory = Arc::new(InMemoryInventory::new());
    let clock = Arc::new(SystemClock);
    let retry = config.relay_retry();

    let (service, redpanda) = match config.store {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory event store");
            let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::new());
            let collaborators = Collaborators { inventory: inventory.clone(), notifier };
            let store = Arc::new(InMemoryStore::new().with_claim_lease(config.claim_lease()));
            (FulfillmentService::new(store, collaborators, clock, metrics.clone(), retry), None)
        }
        StoreBackend::Scylla => {
            tracing::info!(nodes = ?config.scylla_nodes, "Connecting to ScyllaDB...");
            let session: Session = SessionBuilder::new()
                .known_nodes(&config.scylla_nodes)
                .build()
                .await?;
            ScyllaStore::ensure_schema(&session, &config.scylla_keyspace).await?;
            let store = Arc::new(ScyllaStore::new(Arc::new(session)).with_claim_lease(config.claim_lease()));

            // Redpanda client carries its own circuit breaker
            let redpanda = Arc::new(RedpandaClient::new(&config.redpanda_brokers)?);
            let notifier: Arc<dyn Notifier> =
                Arc::new(RedpandaNotifier::new(redpanda.clone(), config.notification_topic.clone()));
            let collaborators = Collaborators { inventory: inventory.clone(), notifier };
            (
                FulfillmentService::new(store, collaborators, clock, metrics.clone(), retry),
                Some(redpanda),
            )
        }
    };

    // === 3. Background actors ===
    let actors = BackgroundActors::start(
        &service,
        redpanda,
        metrics.clone(),
        Schedule {
            outbox_poll_interval: config.outbox_poll_interval,
            points_expiry_interval: config.points_expiry_interval,
        },
    )
    .await;

    // === 4. Demonstrate the order lifecycle ===
    if let Err(e) = demo_lifecycle(&service, &inventory).await {
        tracing::error!(code = e.code(), error = %e, "Lifecycle demo failed");
    }

    if let Some(redis_url) = &config.redis_url {
        if let Err(e) = demo_registration_code(redis_url).await {
            tracing::error!(error = %e, "Registration code demo failed");
        }
    }

    tracing::info!("🎉 Service running, press Ctrl+C to stop");
    tracing::info!("📊 Metrics available at http://localhost:{}/metrics", config.metrics_port);

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down gracefully...");
    actors.shutdown().await;

    Ok(())
}

async fn demo_lifecycle(
    service: &FulfillmentService,
    inventory: &InMemoryInventory,
) -> Result<(), cod_fulfillment::FulfillmentError> {
    let customer_id = Uuid::new_v4();
    let driver_id = Uuid::new_v4();
    let rice = Uuid::new_v4();
    let oil = Uuid::new_v4();
    inventory.set_level(rice, 50).await;
    inventory.set_level(oil, 20).await;

    let cart = vec![
        CartLine::new(rice, "Rice 2kg", 2, Decimal::new(7500, 2)),
        CartLine::new(oil, "Cooking oil 1L", 1, Decimal::new(10000, 2)),
    ];

    let order = service
        .place_order(
            Requester::Customer(customer_id),
            PlaceOrderRequest {
                customer_id,
                cart: cart.clone(),
                shipping_cost: Decimal::ZERO,
                discount: Decimal::ZERO,
                redeem_points: 0,
            },
        )
        .await?;
    tracing::info!(order_id = %order.id, invoice = order.invoice, total = %order.totals.total, "✅ Order placed");

    service.update_status(Requester::Admin, order.id, StatusChange::Pending).await?;
    service
        .update_status(Requester::Admin, order.id, StatusChange::Processing { driver_id })
        .await?;

    for line in &cart {
        service
            .set_item_collected(Requester::Driver(driver_id), order.id, line.product_id, true, None)
            .await?;
    }

    service
        .update_status(
            Requester::Driver(driver_id),
            order.id,
            StatusChange::OutForDelivery { notes: Some("Left the depot".to_string()) },
        )
        .await?;

    // Customer reads the code to the driver at the door
    let delivered = service
        .confirm_delivery(Requester::Driver(driver_id), order.id, order.verification_code.as_str())
        .await?;
    tracing::info!(order_id = %delivered.id, status = %delivered.status, "📦 Order delivered");

    let balance = service.loyalty_balance(Requester::Customer(customer_id), customer_id).await?;
    tracing::info!(
        customer_id = %customer_id,
        points = balance.points.current,
        rice_left = inventory.level(rice).await,
        "🎁 Loyalty points awarded"
    );

    // A second order the customer changes their mind about
    let second = service
        .place_order(
            Requester::Customer(customer_id),
            PlaceOrderRequest {
                customer_id,
                cart,
                shipping_cost: Decimal::new(500, 2),
                discount: Decimal::ZERO,
                redeem_points: 0,
            },
        )
        .await?;
    let cancelled = service
        .cancel(Requester::Customer(customer_id), second.id, Some("Ordered twice".to_string()))
        .await?;
    tracing::info!(order_id = %cancelled.id, status = %cancelled.status, "❌ Order cancelled");

    Ok(())
}

async fn demo_registration_code(redis_url: &str) -> anyhow::Result<()> {
    let codes = RedisCodeStore::connect(redis_url).await?;
    let key = "demo@example.com";

    let code = codes.issue(key, chrono::Duration::minutes(10)).await?;
    let accepted = codes.consume(key, code.as_str()).await?;
    let replayed = codes.consume(key, code.as_str()).await?;

    tracing::info!(accepted, replayed, "🔑 Registration code round trip");
    Ok(())
}
