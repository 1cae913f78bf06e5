#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    /// Events older than this are deleted by the daily cleanup.
    pub event_retention_days: u32,
    /// Resolved diagnostics older than this are deleted by the daily cleanup.
    pub diagnostic_retention_days: u32,
    /// Active pixels silent for this long are parked as inactive.
    pub idle_pixel_days: u32,
    /// Width of the worker pool used inside batch jobs.
    pub worker_concurrency: usize,
    /// Failed events re-attempted per retry tick.
    pub retry_batch_limit: usize,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: "./data".to_string(),
            duckdb_memory_limit: "1GB".to_string(),
            event_retention_days: 90,
            diagnostic_retention_days: 30,
            idle_pixel_days: 7,
            worker_concurrency: 8,
            retry_batch_limit: 100,
            cors_origins: vec![],
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        Ok(Self {
            port: std::env::var("PIXELOPS_PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("PIXELOPS_DATA_DIR").unwrap_or(defaults.data_dir),
            duckdb_memory_limit: std::env::var("PIXELOPS_DUCKDB_MEMORY")
                .unwrap_or(defaults.duckdb_memory_limit),
            event_retention_days: env_or(
                "PIXELOPS_EVENT_RETENTION_DAYS",
                defaults.event_retention_days,
            )
            .max(1),
            diagnostic_retention_days: env_or(
                "PIXELOPS_DIAGNOSTIC_RETENTION_DAYS",
                defaults.diagnostic_retention_days,
            )
            .max(1),
            idle_pixel_days: env_or("PIXELOPS_IDLE_PIXEL_DAYS", defaults.idle_pixel_days).max(1),
            worker_concurrency: env_or("PIXELOPS_WORKER_CONCURRENCY", defaults.worker_concurrency)
                .clamp(1, 64),
            retry_batch_limit: env_or("PIXELOPS_RETRY_BATCH_LIMIT", defaults.retry_batch_limit)
                .clamp(1, 10_000),
            cors_origins: std::env::var("PIXELOPS_CORS_ORIGINS")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }
}
