use crate::config::DEFAULT_CONFIG_FILE;
use crate::proxy_check::DEFAULT_TEST_URL;
use crate::proxy_report::{DEFAULT_LOG_FILE, DEFAULT_OUTPUT_FILE};
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Scrapes novels, chapter lists and chapter text into PostgreSQL")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl novel lists, chapter lists and chapters
    Crawl(CrawlArgs),
    /// Create the database tables
    InitDb,
    /// Test every proxy against an IP echo endpoint
    CheckProxies(CheckProxiesArgs),
    /// Summarise proxy performance from a crawl log
    ProxyReport(ProxyReportArgs),
    /// Print row counts
    Stats,
}

#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// Stop after this many novels (0 for no limit)
    #[arg(long)]
    pub max_novels: Option<usize>,

    /// Stop after this many chapters per novel (0 for no limit)
    #[arg(long)]
    pub max_chapters_per_novel: Option<usize>,

    /// Override the first novel list page
    #[arg(long)]
    pub start_url: Option<String>,

    /// Ignore the proxy list and connect directly
    #[arg(long)]
    pub no_proxy: bool,
}

#[derive(Debug, Args)]
pub struct CheckProxiesArgs {
    #[arg(long, default_value = DEFAULT_TEST_URL)]
    pub url: String,

    /// Write working proxies here
    #[arg(long)]
    pub output: Option<String>,

    /// Per-proxy timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct ProxyReportArgs {
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    pub log: String,

    #[arg(long, default_value = DEFAULT_OUTPUT_FILE)]
    pub output: String,

    #[arg(long, default_value_t = 5)]
    pub min_requests: u64,

    #[arg(long, default_value_t = 70.0)]
    pub min_success_rate: f64,

    /// Rows in the best/worst tables
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}
