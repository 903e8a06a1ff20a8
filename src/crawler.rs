use crate::config::{CrawlConfig, SiteConfig};
use crate::error::{Result, ScraperError};
use crate::http_client::{EnhancedHttpClient, FetchedPage};
use crate::metrics::{CrawlCounters, CrawlSnapshot, DIRECT};
use crate::models::{utc_now, ChapterContentItem, ChapterKey, Item, UpsertOutcome};
use crate::pipeline::ItemStore;
use crate::robots::RobotsRules;
use crate::sources::fanmtl;
use log::{debug, error, info, warn};
use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use url::Url;

const PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    NovelList,
    ChapterList {
        novel_id: String,
        novel_title: String,
        page: u32,
    },
    ChapterContent {
        key: ChapterKey,
    },
}

#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub url: String,
    pub kind: RequestKind,
    /// Bypass the seen-URL filter (re-queued requests)
    pub dont_filter: bool,
    pub challenge_attempts: u32,
}

impl CrawlRequest {
    pub fn new(url: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            url: url.into(),
            kind,
            dont_filter: false,
            challenge_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub counts: CrawlSnapshot,
    pub elapsed_secs: f64,
    /// Stopped by a shutdown signal before the frontier drained
    pub interrupted: bool,
}

/// Everything the orchestrator mutates while the crawl runs
#[derive(Default)]
struct Frontier {
    queue: VecDeque<CrawlRequest>,
    seen: HashSet<String>,
    novels: HashSet<String>,
    chapters_per_novel: HashMap<String, usize>,
}

/// Drives list pages, chapter lists and chapter pages through the fetcher
/// and hands parsed items to the store.
///
/// Fetching happens on spawned tasks; parsing and persisting happen on the
/// orchestrating task, so a parent item is always stored before any request
/// for its children is queued.
pub struct Crawler {
    site: SiteConfig,
    crawl: CrawlConfig,
    base: Url,
    client: Arc<EnhancedHttpClient>,
    store: Arc<dyn ItemStore>,
    counters: Arc<CrawlCounters>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Crawler {
    pub fn new(
        site: SiteConfig,
        crawl: CrawlConfig,
        client: Arc<EnhancedHttpClient>,
        store: Arc<dyn ItemStore>,
    ) -> Result<Self> {
        let base = fanmtl::base_url(&site.base_url)?;
        Ok(Self {
            site,
            crawl,
            base,
            client,
            store,
            counters: Arc::new(CrawlCounters::new()),
            shutdown: None,
        })
    }

    /// Stop dispatching once the receiver sees `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn is_allowed_domain(&self, url: &Url) -> bool {
        if self.site.allowed_domains.is_empty() {
            return true;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        self.site.allowed_domains.iter().any(|domain| {
            let domain = domain.trim_start_matches('.');
            host == domain || host.ends_with(&format!(".{}", domain))
        })
    }

    fn schedule(&self, frontier: &mut Frontier, robots: &RobotsRules, request: CrawlRequest) {
        let url = match Url::parse(&request.url) {
            Ok(u) => u,
            Err(e) => {
                warn!("Dropping request with invalid URL {}: {}", request.url, e);
                return;
            }
        };
        if !self.is_allowed_domain(&url) {
            debug!("Filtered offsite request to {}", url);
            return;
        }
        if !robots.is_url_allowed(&url) {
            info!("Forbidden by robots.txt: {}", url);
            return;
        }
        if !request.dont_filter && !frontier.seen.insert(request.url.clone()) {
            debug!("Filtered duplicate request: {}", request.url);
            return;
        }
        frontier.queue.push_back(request);
    }

    fn next_delay(&self) -> Duration {
        let delay = self.crawl.download_delay();
        if delay.is_zero() || !self.crawl.randomize_delay {
            return delay;
        }
        delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Sleep for `delay`, returning early with `true` if shutdown arrives
    async fn pause(&mut self, delay: Duration) -> bool {
        if self.shutdown_requested() {
            return true;
        }
        if delay.is_zero() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = Self::wait_for_shutdown(&mut self.shutdown) => true,
        }
    }

    async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
        match shutdown.as_mut() {
            Some(rx) => {
                while rx.changed().await.is_ok() {
                    if *rx.borrow() {
                        return;
                    }
                }
                // Sender gone, no shutdown can arrive
                std::future::pending::<()>().await
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Run until the frontier is empty or shutdown is requested
    pub async fn run(mut self) -> Result<CrawlSummary> {
        let started = Instant::now();
        self.store.open().await?;

        let robots = if self.crawl.obey_robots {
            RobotsRules::fetch(&self.client, &self.base, env!("CARGO_PKG_NAME")).await
        } else {
            RobotsRules::allow_all()
        };

        let concurrency = self.crawl.effective_concurrency();
        info!(
            "Starting crawl at {} (concurrency {}, delay {:?})",
            self.site.start_url,
            concurrency,
            self.crawl.download_delay()
        );

        let mut frontier = Frontier::default();
        let start = CrawlRequest::new(self.site.start_url.clone(), RequestKind::NovelList);
        self.schedule(&mut frontier, &robots, start);

        let mut tasks: JoinSet<(CrawlRequest, Result<FetchedPage>)> = JoinSet::new();
        let mut interrupted = false;

        loop {
            while tasks.len() < concurrency && !interrupted {
                let Some(request) = frontier.queue.pop_front() else {
                    break;
                };
                let delay = self.next_delay();
                if self.pause(delay).await {
                    frontier.queue.push_front(request);
                    interrupted = true;
                    break;
                }
                debug!("Dispatching {}", request.url);
                let client = Arc::clone(&self.client);
                // Only list pages can be the 200 interstitial
                let check_soft_block = request.kind == RequestKind::NovelList;
                tasks.spawn(async move {
                    let result = client.fetch_with(&request.url, check_soft_block).await;
                    (request, result)
                });
            }

            if interrupted || tasks.is_empty() {
                break;
            }

            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = Self::wait_for_shutdown(&mut self.shutdown) => {
                    interrupted = true;
                    None
                }
            };

            match joined {
                Some(Ok((request, result))) => {
                    self.handle_response(&mut frontier, &robots, request, result).await;
                }
                Some(Err(e)) => {
                    error!("Fetch task failed: {}", e);
                    self.counters.add_failure();
                }
                None => {}
            }
        }

        if interrupted {
            warn!(
                "Shutdown requested, draining {} in-flight requests, {} queued requests dropped",
                tasks.len(),
                frontier.queue.len()
            );
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((request, result)) => {
                        self.handle_response(&mut frontier, &robots, request, result).await
                    }
                    Err(e) => error!("Fetch task failed: {}", e),
                }
            }
        }

        if let Err(e) = self.store.close().await {
            error!("Failed to close item store: {}", e);
        }

        let summary = CrawlSummary {
            counts: self.counters.snapshot(),
            elapsed_secs: started.elapsed().as_secs_f64(),
            interrupted,
        };
        info!(
            "Crawl finished in {:.1}s: {} novels, {} chapters, {} chapter contents, {} pages, {} failures, {} dropped",
            summary.elapsed_secs,
            summary.counts.novels,
            summary.counts.chapters,
            summary.counts.contents,
            summary.counts.pages_fetched,
            summary.counts.failures,
            summary.counts.dropped_items
        );
        self.client.metrics().log_summary();
        Ok(summary)
    }

    async fn handle_response(
        &self,
        frontier: &mut Frontier,
        robots: &RobotsRules,
        request: CrawlRequest,
        result: Result<FetchedPage>,
    ) {
        let page = match result {
            Ok(page) => page,
            Err(ScraperError::Blocked { url }) => {
                if request.challenge_attempts < self.crawl.max_challenge_retries {
                    warn!(
                        "Challenge persisted at {}, re-queueing (attempt {}/{})",
                        url,
                        request.challenge_attempts + 1,
                        self.crawl.max_challenge_retries
                    );
                    let retry = CrawlRequest {
                        dont_filter: true,
                        challenge_attempts: request.challenge_attempts + 1,
                        ..request
                    };
                    self.schedule(frontier, robots, retry);
                } else {
                    error!("Giving up on {} after repeated challenges", url);
                    self.counters.add_failure();
                }
                return;
            }
            Err(e) => {
                error!("Request failed for {}: {}", request.url, e);
                self.counters.add_failure();
                return;
            }
        };

        debug!(
            "Fetched {} status={} proxy={} ua={} bytes={} in {}ms",
            page.url,
            page.status,
            page.proxy.as_deref().unwrap_or(DIRECT),
            page.user_agent,
            page.body.len(),
            page.elapsed.as_millis()
        );

        if !page.is_success() {
            warn!("Skipping {} (status {})", page.url, page.status);
            self.counters.add_failure();
            return;
        }
        self.counters.add_page();

        let base = Url::parse(&page.final_url).unwrap_or_else(|_| self.base.clone());
        match request.kind {
            RequestKind::NovelList => self.on_novel_list(frontier, robots, &page, &base).await,
            RequestKind::ChapterList {
                novel_id,
                novel_title,
                page: page_number,
            } => {
                self.on_chapter_list(frontier, robots, &page, &base, &novel_id, &novel_title, page_number)
                    .await
            }
            RequestKind::ChapterContent { key } => self.on_chapter_content(&page, key).await,
        }
    }

    fn novel_limit_reached(&self, frontier: &Frontier) -> bool {
        self.crawl
            .novel_limit()
            .map(|max| frontier.novels.len() >= max)
            .unwrap_or(false)
    }

    async fn on_novel_list(
        &self,
        frontier: &mut Frontier,
        robots: &RobotsRules,
        page: &FetchedPage,
        base: &Url,
    ) {
        let list = fanmtl::parse_novel_list(&page.body, base);
        info!("Found {} novels on {}", list.novels.len(), page.url);

        for novel in list.novels {
            if self.novel_limit_reached(frontier) {
                info!("Reached max_novels, not scheduling more novels");
                return;
            }
            if !frontier.novels.insert(novel.novel_id.clone()) {
                debug!("Novel {} already scheduled", novel.novel_id);
                continue;
            }

            let novel_id = novel.novel_id.clone();
            let novel_title = novel.title.clone();
            if !self.store_item(Item::Novel(novel)).await {
                continue;
            }

            match fanmtl::chapter_list_url(&self.base, &novel_id, 1) {
                Ok(url) => {
                    let kind = RequestKind::ChapterList {
                        novel_id,
                        novel_title,
                        page: 1,
                    };
                    self.schedule(frontier, robots, CrawlRequest::new(url, kind));
                }
                Err(e) => error!("Cannot build chapter list URL for {}: {}", novel_id, e),
            }
        }

        if let Some(next) = list.next_page {
            if !self.novel_limit_reached(frontier) {
                debug!("Following next list page {}", next);
                self.schedule(frontier, robots, CrawlRequest::new(next, RequestKind::NovelList));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_chapter_list(
        &self,
        frontier: &mut Frontier,
        robots: &RobotsRules,
        page: &FetchedPage,
        base: &Url,
        novel_id: &str,
        novel_title: &str,
        page_number: u32,
    ) {
        let list = match fanmtl::parse_chapter_list(
            &page.body,
            base,
            novel_id,
            page_number,
            self.site.chapters_per_page,
        ) {
            Ok(list) => list,
            Err(e) => {
                error!("Failed to parse chapter list {}: {}", page.url, e);
                self.counters.add_failure();
                return;
            }
        };
        info!(
            "Found {} chapters for {} ({}) on page {}",
            list.chapters.len(),
            novel_title,
            novel_id,
            page_number
        );

        let max = self.crawl.chapter_limit();
        for chapter in list.chapters {
            let taken = frontier.chapters_per_novel.entry(novel_id.to_string()).or_insert(0);
            if max.map(|m| *taken >= m).unwrap_or(false) {
                info!("Reached max_chapters_per_novel for {}", novel_id);
                return;
            }
            *taken += 1;

            let key = chapter.key();
            let url = chapter.chapter_url.clone();
            if !self.store_item(Item::Chapter(chapter)).await {
                continue;
            }
            let kind = RequestKind::ChapterContent { key };
            self.schedule(frontier, robots, CrawlRequest::new(url, kind));
        }

        if let Some(next) = list.next_page {
            let kind = RequestKind::ChapterList {
                novel_id: novel_id.to_string(),
                novel_title: novel_title.to_string(),
                page: next.page,
            };
            self.schedule(frontier, robots, CrawlRequest::new(next.url, kind));
        }
    }

    async fn on_chapter_content(&self, page: &FetchedPage, key: ChapterKey) {
        let Some(chapter_text) = fanmtl::parse_chapter_content(&page.body) else {
            warn!("No chapter content found at {}", page.url);
            self.counters.add_failure();
            return;
        };

        let item = ChapterContentItem {
            key,
            chapter_text,
            scraped_at: utc_now(),
        };
        self.store_item(Item::ChapterContent(item)).await;
    }

    /// Hand an item to the store. Returns false when nothing was written.
    async fn store_item(&self, item: Item) -> bool {
        match self.store.process_item(&item).await {
            Ok(UpsertOutcome::Skipped(reason)) => {
                warn!("Dropped {}: {}", item.kind(), reason);
                self.counters.add_dropped();
                false
            }
            Ok(_) => {
                let total = match &item {
                    Item::Novel(_) => self.counters.add_novel(),
                    Item::Chapter(_) => self.counters.add_chapter(),
                    Item::ChapterContent(_) => self.counters.add_content(),
                };
                if total % PROGRESS_EVERY == 0 {
                    let s = self.counters.snapshot();
                    info!(
                        "Progress: {} novels, {} chapters, {} chapter contents",
                        s.novels, s.chapters, s.contents
                    );
                }
                true
            }
            Err(e) => {
                error!("Failed to store {}: {}", item.kind(), e);
                self.counters.add_dropped();
                false
            }
        }
    }
}
