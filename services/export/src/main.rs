use sea_orm::Database;
use tracing::info;

use questline_relay::{ConsumerLoop, RedisTransport, RetryPolicy};

use questline_export::config::ExportConfig;
use questline_export::domain::types::{EXPORT_CONSUMER_GROUP, EXPORT_PARTS_TOPIC, SERVICE_NAME};
use questline_export::infra::blob::HttpBlobStore;
use questline_export::router::build_router;
use questline_export::state::AppState;
use questline_export::usecase::receive_part::ReceivePartUseCase;
use questline_export::worker::dispatcher::OutboxDispatcher;
use questline_export::worker::parts::PartReadyHandler;
use questline_export::worker::sweeper::ExpirySweeper;

#[tokio::main]
async fn main() {
    questline_core::tracing::init_tracing();

    let config = ExportConfig::from_env();

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let redis_cfg = deadpool_redis::Config::from_url(&config.redis_url);
    let redis = redis_cfg
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("failed to create Redis pool");

    let blob = HttpBlobStore::new(&config.blob_base_url, &config.blob_token)
        .expect("failed to build blob client");

    let job_ttl = chrono::Duration::from_std(config.job_ttl).expect("job TTL out of range");
    let state = AppState {
        db,
        blob,
        part_services: config.part_services.clone(),
        job_ttl,
        presign_ttl: config.presign_ttl,
        internal_token: config.internal_token.clone(),
    };

    let transport = RedisTransport::new(redis, SERVICE_NAME);

    // Outbox dispatcher: single instance per deployment.
    let dispatcher = OutboxDispatcher::new(
        state.outbox_repo(),
        transport.clone(),
        config.outbox.clone(),
    );
    tokio::spawn(dispatcher.run());

    // Expiry sweep.
    let sweeper = ExpirySweeper::new(state.job_repo(), state.blob.clone(), config.sweep_interval);
    tokio::spawn(sweeper.run());

    // Parts consumer.
    let subscription = transport
        .subscribe(EXPORT_PARTS_TOPIC, EXPORT_CONSUMER_GROUP)
        .await
        .expect("failed to subscribe to parts topic");
    let handler = PartReadyHandler {
        receive: ReceivePartUseCase {
            jobs: state.job_repo(),
            blob: state.blob.clone(),
        },
    };
    let consumer = ConsumerLoop::new(
        EXPORT_PARTS_TOPIC,
        subscription,
        transport,
        handler,
        RetryPolicy::default(),
    );
    tokio::spawn(consumer.run());

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.export_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    info!("export service listening on {addr}");
    axum::serve(listener, router).await.expect("server error");
}
