use std::env;

use crate::services::catalog::DAILY_QUEST_COUNT;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub node_env: String,
    pub cors_origins: Vec<String>,
    pub store_backend: StoreBackend,
    pub db: DbConfig,
    pub jwt: JwtConfig,
    pub quests: QuestConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_min: u32,
    pub pool_max: u32,
}

#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuestConfig {
    /// Size of each user's daily set.
    pub daily_count: usize,
    pub window_hours: i64,
    /// Coins seeded into a wallet on first access.
    pub starting_bonus: i64,
    /// Optimistic-concurrency retries before giving up with a conflict.
    pub max_write_retries: u32,
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self {
            daily_count: DAILY_QUEST_COUNT,
            window_hours: 24,
            starting_bonus: 100,
            max_write_retries: 5,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_backend(s: &str) -> StoreBackend {
    match s.trim().to_ascii_lowercase().as_str() {
        "memory" | "mem" => StoreBackend::Memory,
        _ => StoreBackend::Postgres,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = QuestConfig::default();
        Self {
            port: env_or_parse("PORT", 3000),
            node_env: env_or("NODE_ENV", "development"),
            cors_origins: env_or("CORS_ORIGINS", "http://localhost:3000,http://localhost:8080")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            store_backend: parse_backend(&env_or("STORE_BACKEND", "postgres")),
            db: DbConfig {
                host: env_or("DB_HOST", "localhost"),
                port: env_or_parse("DB_PORT", 5432),
                database: env_or("DB_NAME", "pet_quests"),
                user: env_or("DB_USER", "pet_quests"),
                password: env_or("DB_PASSWORD", ""),
                pool_min: env_or_parse("DB_POOL_MIN", 2),
                pool_max: env_or_parse("DB_POOL_MAX", 20),
            },
            jwt: JwtConfig {
                secret: env_or("JWT_SECRET", "change-me-to-a-secure-random-string"),
            },
            quests: QuestConfig {
                daily_count: env_or_parse("DAILY_QUEST_COUNT", defaults.daily_count),
                window_hours: env_or_parse("QUEST_WINDOW_HOURS", defaults.window_hours).max(1),
                starting_bonus: env_or_parse("STARTING_BONUS", defaults.starting_bonus).max(0),
                max_write_retries: env_or_parse("MAX_WRITE_RETRIES", defaults.max_write_retries),
            },
        }
    }

    pub fn database_url(&self) -> String {
        if let Ok(url) = env::var("DATABASE_URL") {
            return url;
        }
        if let Ok(url) = env::var("POSTGRES_URL") {
            return url;
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db.user, self.db.password, self.db.host, self.db.port, self.db.database
        )
    }
}
