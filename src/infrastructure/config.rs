use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: u64 = 100;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub profile: String,
    /// Directory receiving export artifacts
    pub export_dir: PathBuf,
    /// Rows handled per committed chunk
    pub chunk_size: u64,
    /// Idle sleep of the bulk worker between polls
    pub worker_poll_interval: Duration,
    pub seed_demo: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let profile = env::var("PROFILE").unwrap_or_else(|_| "default".to_string());

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            if profile == "default" {
                "sqlite://klinik.db?mode=rwc".to_string()
            } else {
                format!("sqlite://klinik_{}.db?mode=rwc", profile)
            }
        });

        let export_dir = env::var("EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("storage").join("exports"));

        Self {
            database_url,
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(Vec::new),
            profile,
            export_dir,
            chunk_size: env::var("BULK_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &u64| n > 0)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            worker_poll_interval: Duration::from_millis(
                env::var("WORKER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2000),
            ),
            seed_demo: env::var("SEED_DEMO").is_ok(),
        }
    }
}
