// Library interface for fanmtl_scraper
// The binary and the integration tests both build on these modules

pub mod cli;
pub mod cloudflare;
pub mod config;
pub mod crawler;
pub mod error;
pub mod http_client;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pg_db;
pub mod pipeline;
pub mod proxy_check;
pub mod proxy_manager;
pub mod proxy_report;
pub mod robots;
pub mod sources;
pub mod user_agents;

pub use error::{Result, ScraperError};
