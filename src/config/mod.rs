use std::env;

/// Fallback secret used when CHAT_SESSION_SECRET is unset. Fine for local
/// development; `Config::from_env` logs a warning whenever it is in effect.
pub const DEV_SESSION_SECRET: &str = "dev_secret_change_in_production";

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub session_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub is_dev: bool,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let session_secret = env::var("CHAT_SESSION_SECRET").unwrap_or_else(|_| {
            tracing::warn!("CHAT_SESSION_SECRET not set; using the development fallback secret");
            DEV_SESSION_SECRET.to_string()
        });

        let is_dev = env::var("APP_ENV").as_deref() != Ok("production");

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:companion.db?mode=rwc".to_string()),
            session_secret,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            is_dev,
            allowed_origins,
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
