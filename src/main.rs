use clap::Parser;
use fanmtl_scraper::cli::{CheckProxiesArgs, Cli, Command, CrawlArgs, ProxyReportArgs};
use fanmtl_scraper::config::Config;
use fanmtl_scraper::crawler::Crawler;
use fanmtl_scraper::http_client::EnhancedHttpClient;
use fanmtl_scraper::metrics::MetricsTracker;
use fanmtl_scraper::pipeline::PostgresPipeline;
use fanmtl_scraper::proxy_manager::ProxyManager;
use fanmtl_scraper::proxy_report::ProxyReport;
use fanmtl_scraper::user_agents::UserAgentPool;
use fanmtl_scraper::{logging, pg_db, proxy_check, Result};
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load {}: {}", cli.config, e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&cfg.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command, cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, cfg: Config) -> Result<()> {
    match command {
        Command::Crawl(args) => crawl(cfg, args).await,
        Command::InitDb => {
            let pool = pg_db::create_pool(cfg.database_url()?, cfg.database.pool_size)?;
            pg_db::create_tables(&pool).await
        }
        Command::CheckProxies(args) => check_proxies(cfg, args).await,
        Command::ProxyReport(args) => proxy_report(args),
        Command::Stats => {
            let pool = pg_db::create_pool(cfg.database_url()?, cfg.database.pool_size)?;
            let counts = pg_db::counts(&pool).await?;
            info!(
                "Novels: {}, chapters: {}, chapter contents: {}",
                counts.novels, counts.chapters, counts.chapter_contents
            );
            Ok(())
        }
    }
}

async fn crawl(mut cfg: Config, args: CrawlArgs) -> Result<()> {
    if args.max_novels.is_some() {
        cfg.crawl.max_novels = args.max_novels;
    }
    if args.max_chapters_per_novel.is_some() {
        cfg.crawl.max_chapters_per_novel = args.max_chapters_per_novel;
    }
    if let Some(url) = args.start_url {
        cfg.site.start_url = url;
    }

    let metrics = Arc::new(MetricsTracker::new());
    let user_agents = UserAgentPool::new(cfg.http.user_agents.clone());
    let user_agent_count = user_agents.len();
    let mut client = EnhancedHttpClient::with_config(cfg.http.client_config())?
        .with_user_agents(user_agents)
        .with_metrics(Arc::clone(&metrics));

    if cfg.proxy.enabled && !args.no_proxy {
        let proxies = ProxyManager::from_file(&cfg.proxy.file, cfg.proxy.min_proxy_life());
        client = client.with_proxy_manager(Arc::new(proxies));
    } else {
        info!("Proxies disabled, connecting directly");
    }

    info!("HTTP client initialized:");
    info!("  Max retries: {}", cfg.http.max_retries);
    info!("  Timeout: {}s", cfg.http.timeout_secs);
    info!("  User agents: {}", user_agent_count);

    let store = Arc::new(PostgresPipeline::from_url(
        cfg.database_url()?,
        cfg.database.pool_size,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing in-flight requests");
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = Crawler::new(cfg.site, cfg.crawl, Arc::new(client), store)?
        .with_shutdown(shutdown_rx)
        .run()
        .await?;

    info!("Crawl summary: {}", serde_json::to_string(&summary)?);
    log::debug!("Proxy metrics: {}", metrics.export_json());
    Ok(())
}

async fn check_proxies(cfg: Config, args: CheckProxiesArgs) -> Result<()> {
    let manager = ProxyManager::from_file(&cfg.proxy.file, cfg.proxy.min_proxy_life());
    let user_agents = UserAgentPool::new(cfg.http.user_agents.clone());
    let tracker = MetricsTracker::new();

    let results = proxy_check::check_all(
        &manager,
        &user_agents,
        &args.url,
        Duration::from_secs(args.timeout_secs),
        (Duration::from_secs(1), Duration::from_secs(3)),
        &tracker,
    )
    .await;

    for result in results.iter().filter(|r| r.ok) {
        info!("- {}", result.proxy);
    }
    if let Some(output) = args.output {
        proxy_check::write_working(&results, output)?;
    }
    tracker.log_summary();
    Ok(())
}

fn proxy_report(args: ProxyReportArgs) -> Result<()> {
    let report = ProxyReport::from_file(&args.log)?;
    report.log_summary(args.min_requests, args.top);
    report.write_best(&args.output, args.min_requests, args.min_success_rate)?;
    Ok(())
}
