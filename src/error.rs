/// Errors that can occur while scraping, parsing or persisting
#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Failed to create connection pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("No database URL configured (set database.url, POSTGRES_URI or DATABASE_URL)")]
    MissingDatabaseUrl,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Blocked by bot protection at {url}")]
    Blocked { url: String },

    #[error("Retries exhausted for {url} (last status: {status:?})")]
    RetriesExhausted { url: String, status: Option<u16> },

    #[error("Unexpected status {status} for {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, ScraperError>;
