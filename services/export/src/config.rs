use std::time::Duration;

/// Export service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis connection URL (event transport).
    pub redis_url: String,
    /// TCP port to listen on (default 3114). Env var: `EXPORT_PORT`.
    pub export_port: u16,
    /// Blob store base URL (e.g. "http://blobs:9000"). Env var: `BLOB_BASE_URL`.
    pub blob_base_url: String,
    /// Shared secret for the blob store. Env var: `BLOB_TOKEN`.
    pub blob_token: String,
    /// Shared secret required on `/internal/*` routes. Env var: `INTERNAL_TOKEN`.
    pub internal_token: String,
    /// Services expected to deliver one part per export job, comma-separated.
    /// The first entry owning this service's data is produced locally.
    /// Env var: `EXPORT_PART_SERVICES`.
    pub part_services: Vec<String>,
    pub outbox: OutboxConfig,
    /// Export job time-to-live (default 24h). Env var: `EXPORT_JOB_TTL_HOURS`.
    pub job_ttl: Duration,
    /// Expiry sweep interval (default 300s). Env var: `EXPORT_SWEEP_INTERVAL_SECS`.
    pub sweep_interval: Duration,
    /// Presigned download URL lifetime (default 600s). Env var: `PRESIGN_TTL_SECS`.
    pub presign_ttl: Duration,
}

/// Outbox dispatcher tuning.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Records claimed per tick (default 50). Env var: `OUTBOX_BATCH_SIZE`.
    pub batch_size: u64,
    /// Attempts before a record goes terminal (default 10). Env var: `OUTBOX_MAX_ATTEMPTS`.
    pub max_attempts: i32,
    /// Linear backoff unit (default 30s). Env var: `OUTBOX_BASE_RETRY_SECS`.
    pub base_retry_secs: i64,
    /// Bound on one publish call (default 5s). Env var: `OUTBOX_SEND_TIMEOUT_SECS`.
    pub send_timeout: Duration,
    /// Dispatch tick interval (default 5s). Env var: `OUTBOX_DISPATCH_INTERVAL_SECS`.
    pub dispatch_interval: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_attempts: 10,
            base_retry_secs: 30,
            send_timeout: Duration::from_secs(5),
            dispatch_interval: Duration::from_secs(5),
        }
    }
}

impl ExportConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL"),
            redis_url: std::env::var("REDIS_URL").expect("REDIS_URL"),
            export_port: env_parsed("EXPORT_PORT", 3114),
            blob_base_url: std::env::var("BLOB_BASE_URL").expect("BLOB_BASE_URL"),
            blob_token: std::env::var("BLOB_TOKEN").expect("BLOB_TOKEN"),
            internal_token: std::env::var("INTERNAL_TOKEN").expect("INTERNAL_TOKEN"),
            part_services: std::env::var("EXPORT_PART_SERVICES")
                .map(|raw| parse_services(&raw))
                .unwrap_or_else(|_| default_services()),
            outbox: OutboxConfig {
                batch_size: env_parsed("OUTBOX_BATCH_SIZE", 50),
                max_attempts: env_parsed("OUTBOX_MAX_ATTEMPTS", 10),
                base_retry_secs: env_parsed("OUTBOX_BASE_RETRY_SECS", 30),
                send_timeout: Duration::from_secs(env_parsed("OUTBOX_SEND_TIMEOUT_SECS", 5)),
                dispatch_interval: Duration::from_secs(env_parsed(
                    "OUTBOX_DISPATCH_INTERVAL_SECS",
                    5,
                )),
            },
            job_ttl: Duration::from_secs(env_parsed("EXPORT_JOB_TTL_HOURS", 24u64) * 3600),
            sweep_interval: Duration::from_secs(env_parsed("EXPORT_SWEEP_INTERVAL_SECS", 300)),
            presign_ttl: Duration::from_secs(env_parsed("PRESIGN_TTL_SECS", 600)),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_services(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn default_services() -> Vec<String> {
    ["profile", "quests", "submissions", "achievements"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}
