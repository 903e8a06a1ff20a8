mod common;

use async_trait::async_trait;
use common::{ok, TestServer};
use fanmtl_scraper::config::{CrawlConfig, SiteConfig};
use fanmtl_scraper::crawler::Crawler;
use fanmtl_scraper::error::{Result, ScraperError};
use fanmtl_scraper::http_client::{EnhancedHttpClient, HttpClientConfig};
use fanmtl_scraper::models::{ChapterKey, Item, UpsertOutcome};
use fanmtl_scraper::pipeline::ItemStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// In-memory store that refuses children whose parent it has not seen
#[derive(Default)]
struct MemoryStore {
    items: Mutex<Vec<Item>>,
    opened: AtomicBool,
    closed: AtomicBool,
}

impl MemoryStore {
    fn items(&self) -> Vec<Item> {
        self.items.lock().unwrap().clone()
    }

    fn novel_ids(&self) -> Vec<String> {
        self.items()
            .into_iter()
            .filter_map(|i| match i {
                Item::Novel(n) => Some(n.novel_id),
                _ => None,
            })
            .collect()
    }

    fn chapter_keys(&self) -> Vec<ChapterKey> {
        self.items()
            .into_iter()
            .filter_map(|i| match i {
                Item::Chapter(c) => Some(c.key()),
                _ => None,
            })
            .collect()
    }

    fn contents(&self) -> Vec<(ChapterKey, String)> {
        self.items()
            .into_iter()
            .filter_map(|i| match i {
                Item::ChapterContent(c) => Some((c.key, c.chapter_text)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn open(&self) -> Result<()> {
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn process_item(&self, item: &Item) -> Result<UpsertOutcome> {
        let mut items = self.items.lock().unwrap();
        let parent_known = match item {
            Item::Novel(_) => true,
            Item::Chapter(c) => items
                .iter()
                .any(|i| matches!(i, Item::Novel(n) if n.novel_id == c.novel_id)),
            Item::ChapterContent(cc) => items
                .iter()
                .any(|i| matches!(i, Item::Chapter(c) if c.key() == cc.key)),
        };
        if !parent_known {
            return Ok(UpsertOutcome::Skipped("parent missing".to_string()));
        }
        items.push(item.clone());
        Ok(UpsertOutcome::Inserted)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingStore;

#[async_trait]
impl ItemStore for FailingStore {
    async fn process_item(&self, _item: &Item) -> Result<UpsertOutcome> {
        Err(ScraperError::Parse("database unavailable".to_string()))
    }
}

const LIST_1: &str = r#"
<ul class="novel-list">
  <li class="novel-item">
    <h4 class="novel-title"><a href="/novel/alpha.html">Alpha Novel</a></h4>
    <span class="chapter">3 Chapters</span><span class="status">Ongoing</span>
  </li>
  <li class="novel-item">
    <h4 class="novel-title"><a href="/novel/beta.html">Beta Novel</a></h4>
    <span class="chapter">1 Chapters</span><span class="status">Completed</span>
  </li>
</ul>
<a class="next" href="/list/all/all-onclick-2.html">Next</a>
"#;

const LIST_2: &str = r#"
<ul class="novel-list">
  <li class="novel-item">
    <h4 class="novel-title"><a href="/novel/alpha.html">Alpha Novel</a></h4>
  </li>
  <li class="novel-item">
    <h4 class="novel-title"><a href="/novel/gamma.html">Gamma Novel</a></h4>
  </li>
</ul>
<a class="next" href="/private/list-3.html">Next</a>
"#;

const ALPHA_1: &str = r#"{"total": 3, "data": [
  {"id": 1, "title": "Chapter 1 Start", "url": "/novel/alpha/1.html", "date": "2024-01-01"},
  {"id": 2, "title": "Chapter 2 Middle", "url": "/novel/alpha/2.html", "date": "2024-01-02"}
]}"#;

const ALPHA_2: &str = r#"{"total": "3", "data": [
  {"id": 3, "title": "Chapter 3 End", "url": "/novel/alpha/3.html", "date": "2024-01-03"}
]}"#;

const BETA_HTML: &str = r#"
<ul class="chapter-list">
  <li><a href="/novel/beta/1.html">Chapter 1 Only</a><span class="time">2024-02-01</span></li>
</ul>
"#;

fn chapter_page(text: &str) -> Vec<(u16, String)> {
    ok(&format!(
        r#"<div class="chapter-content"><p>{}</p><p>Second paragraph.</p></div>"#,
        text
    ))
}

fn site_server() -> TestServer {
    TestServer::start(vec![
        ("/robots.txt", ok("User-agent: *\nDisallow: /private/\n")),
        ("/list/all/all-onclick-1.html", ok(LIST_1)),
        ("/list/all/all-onclick-2.html", ok(LIST_2)),
        ("/e/extend/fy.php?page=1&wjm=alpha", ok(ALPHA_1)),
        ("/e/extend/fy.php?page=2&wjm=alpha", ok(ALPHA_2)),
        ("/e/extend/fy.php?page=1&wjm=beta", ok(BETA_HTML)),
        ("/novel/alpha/1.html", chapter_page("Alpha one.")),
        ("/novel/alpha/2.html", chapter_page("Alpha two.")),
        ("/novel/alpha/3.html", chapter_page("Alpha three.")),
        ("/novel/beta/1.html", ok("<html><body>No content here</body></html>")),
    ])
}

fn site_config(server: &TestServer) -> SiteConfig {
    SiteConfig {
        base_url: server.base_url.clone(),
        start_url: server.url("/list/all/all-onclick-1.html"),
        allowed_domains: vec!["127.0.0.1".to_string()],
        chapters_per_page: 2,
    }
}

fn crawl_config() -> CrawlConfig {
    CrawlConfig {
        concurrent_requests: 4,
        concurrent_requests_per_domain: 2,
        download_delay_ms: 0,
        randomize_delay: false,
        obey_robots: true,
        max_novels: None,
        max_chapters_per_novel: None,
        max_challenge_retries: 2,
    }
}

fn http_client() -> Arc<EnhancedHttpClient> {
    let config = HttpClientConfig {
        timeout: Duration::from_secs(5),
        max_retries: 0,
        initial_retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        challenge_backoff: (Duration::ZERO, Duration::ZERO),
        ..HttpClientConfig::default()
    };
    Arc::new(EnhancedHttpClient::with_config(config).unwrap())
}

fn position(items: &[Item], pred: impl Fn(&Item) -> bool) -> usize {
    items.iter().position(pred).expect("item present")
}

#[tokio::test]
async fn test_full_crawl() {
    let server = site_server();
    let store = Arc::new(MemoryStore::default());

    let summary = Crawler::new(site_config(&server), crawl_config(), http_client(), store.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(store.opened.load(Ordering::SeqCst));
    assert!(store.closed.load(Ordering::SeqCst));
    assert!(!summary.interrupted);

    // Duplicate "alpha" on page 2 is only stored once
    let novels: HashSet<String> = store.novel_ids().into_iter().collect();
    assert_eq!(store.novel_ids().len(), 3);
    assert_eq!(
        novels,
        ["alpha", "beta", "gamma"].iter().map(|s| s.to_string()).collect()
    );

    // JSON pages 1 and 2 for alpha, HTML fallback for beta, gamma 404s
    let chapters = store.chapter_keys();
    assert_eq!(chapters.len(), 4);
    assert!(chapters.contains(&ChapterKey { novel_id: "alpha".into(), chapter_number: 3 }));
    assert!(chapters.contains(&ChapterKey { novel_id: "beta".into(), chapter_number: 1 }));

    let contents = store.contents();
    assert_eq!(contents.len(), 3);
    let (_, text) = contents
        .iter()
        .find(|(k, _)| k.novel_id == "alpha" && k.chapter_number == 2)
        .unwrap();
    assert_eq!(text, "Alpha two.\n\nSecond paragraph.");

    // Parents are stored before their children
    let items = store.items();
    for (idx, item) in items.iter().enumerate() {
        match item {
            Item::Chapter(c) => {
                let parent = position(&items, |i| matches!(i, Item::Novel(n) if n.novel_id == c.novel_id));
                assert!(parent < idx);
            }
            Item::ChapterContent(cc) => {
                let parent = position(&items, |i| matches!(i, Item::Chapter(c) if c.key() == cc.key));
                assert!(parent < idx);
            }
            Item::Novel(_) => {}
        }
    }

    // robots.txt keeps the crawler out of /private/
    assert_eq!(server.hit_count("/private/list-3.html"), 0);
    assert_eq!(server.hit_count("/e/extend/fy.php?page=1&wjm=alpha"), 1);

    assert_eq!(summary.counts.novels, 3);
    assert_eq!(summary.counts.chapters, 4);
    assert_eq!(summary.counts.contents, 3);
    // gamma's chapter list 404 and beta's empty chapter page
    assert_eq!(summary.counts.failures, 2);
    assert_eq!(summary.counts.dropped_items, 0);
}

#[tokio::test]
async fn test_limits_stop_pagination() {
    let server = site_server();
    let store = Arc::new(MemoryStore::default());
    let crawl = CrawlConfig {
        max_novels: Some(1),
        max_chapters_per_novel: Some(1),
        ..crawl_config()
    };

    let summary = Crawler::new(site_config(&server), crawl, http_client(), store.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(store.novel_ids(), vec!["alpha".to_string()]);
    assert_eq!(
        store.chapter_keys(),
        vec![ChapterKey { novel_id: "alpha".into(), chapter_number: 1 }]
    );
    assert_eq!(summary.counts.contents, 1);

    assert_eq!(server.hit_count("/list/all/all-onclick-2.html"), 0);
    assert_eq!(server.hit_count("/e/extend/fy.php?page=1&wjm=beta"), 0);
    assert_eq!(server.hit_count("/e/extend/fy.php?page=2&wjm=alpha"), 0);
    assert_eq!(server.hit_count("/novel/alpha/2.html"), 0);
}

#[tokio::test]
async fn test_robots_ignored_when_disabled() {
    let server = site_server();
    let store = Arc::new(MemoryStore::default());
    let crawl = CrawlConfig {
        obey_robots: false,
        ..crawl_config()
    };

    Crawler::new(site_config(&server), crawl, http_client(), store)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(server.hit_count("/robots.txt"), 0);
    assert_eq!(server.hit_count("/private/list-3.html"), 1);
}

#[tokio::test]
async fn test_challenged_list_page_is_requeued_then_dropped() {
    let server = TestServer::start(vec![(
        "/list/all/all-onclick-1.html",
        ok("<div>Cloudflare is checking your browser security</div>"),
    )]);
    let store = Arc::new(MemoryStore::default());
    let crawl = CrawlConfig {
        obey_robots: false,
        ..crawl_config()
    };

    let summary = Crawler::new(site_config(&server), crawl, http_client(), store.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    // First attempt plus max_challenge_retries re-queues
    assert_eq!(server.hit_count("/list/all/all-onclick-1.html"), 3);
    assert_eq!(summary.counts.failures, 1);
    assert!(store.items().is_empty());
}

#[tokio::test]
async fn test_store_errors_are_counted_and_crawl_continues() {
    let server = site_server();

    let summary = Crawler::new(site_config(&server), crawl_config(), http_client(), Arc::new(FailingStore))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.counts.novels, 0);
    assert_eq!(summary.counts.dropped_items, 3);
    // Nothing stored, so no chapter lists were requested
    assert_eq!(server.hit_count("/e/extend/fy.php?page=1&wjm=alpha"), 0);
    assert_eq!(server.hit_count("/list/all/all-onclick-2.html"), 1);
}

#[tokio::test]
async fn test_shutdown_before_start() {
    let server = site_server();
    let store = Arc::new(MemoryStore::default());
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let summary = Crawler::new(site_config(&server), crawl_config(), http_client(), store.clone())
        .unwrap()
        .with_shutdown(rx)
        .run()
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(server.hit_count("/list/all/all-onclick-1.html"), 0);
    assert!(store.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_requests() {
    let alpha_page_1 = "/e/extend/fy.php?page=1&wjm=alpha";
    let server = TestServer::start_with_delays(
        vec![
            ("/list/all/all-onclick-1.html", ok(LIST_1)),
            (alpha_page_1, ok(ALPHA_1)),
            ("/e/extend/fy.php?page=1&wjm=beta", ok(BETA_HTML)),
        ],
        vec![(alpha_page_1, Duration::from_millis(800))],
    );
    let store = Arc::new(MemoryStore::default());
    let crawl = CrawlConfig {
        concurrent_requests: 1,
        concurrent_requests_per_domain: 1,
        obey_robots: false,
        ..crawl_config()
    };
    let (tx, rx) = watch::channel(false);

    let run = Crawler::new(site_config(&server), crawl, http_client(), store.clone())
        .unwrap()
        .with_shutdown(rx)
        .run();
    let signal = async {
        for _ in 0..300 {
            if server.hit_count(alpha_page_1) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // The slow chapter list is now in flight
        tx.send(true).unwrap();
    };
    let (summary, ()) = tokio::join!(run, signal);
    let summary = summary.unwrap();

    assert!(summary.interrupted);
    assert!(store.closed.load(Ordering::SeqCst));

    // The in-flight response is still parsed and stored
    assert_eq!(
        store.chapter_keys(),
        vec![
            ChapterKey { novel_id: "alpha".into(), chapter_number: 1 },
            ChapterKey { novel_id: "alpha".into(), chapter_number: 2 },
        ]
    );

    // Queued requests never go out
    assert_eq!(server.hit_count("/e/extend/fy.php?page=1&wjm=beta"), 0);
    assert_eq!(server.hit_count("/list/all/all-onclick-2.html"), 0);
    assert_eq!(server.hit_count("/e/extend/fy.php?page=2&wjm=alpha"), 0);
    assert_eq!(server.hit_count("/novel/alpha/1.html"), 0);
}

#[tokio::test]
async fn test_chapter_text_mentioning_cloudflare_is_stored() {
    let server = TestServer::start(vec![
        ("/list/all/all-onclick-1.html", ok(LIST_2)),
        (
            "/e/extend/fy.php?page=1&wjm=alpha",
            ok(r#"{"total": 1, "data": [{"id": 1, "title": "Chapter 1 Breach", "url": "/novel/alpha/1.html", "date": "2024-01-01"}]}"#),
        ),
        (
            "/novel/alpha/1.html",
            chapter_page("She slipped past the Cloudflare firewall and the security team."),
        ),
    ]);
    let store = Arc::new(MemoryStore::default());
    let crawl = CrawlConfig {
        obey_robots: false,
        ..crawl_config()
    };

    let summary = Crawler::new(site_config(&server), crawl, http_client(), store.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(server.hit_count("/novel/alpha/1.html"), 1);
    let contents = store.contents();
    assert_eq!(contents.len(), 1);
    assert!(contents[0].1.starts_with("She slipped past the Cloudflare firewall"));
    assert_eq!(summary.counts.contents, 1);
}

#[tokio::test]
async fn test_zero_limits_mean_no_limit() {
    let server = site_server();
    let store = Arc::new(MemoryStore::default());
    let crawl = CrawlConfig {
        max_novels: Some(0),
        max_chapters_per_novel: Some(0),
        ..crawl_config()
    };

    let summary = Crawler::new(site_config(&server), crawl, http_client(), store.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.counts.novels, 3);
    assert_eq!(summary.counts.chapters, 4);
    assert_eq!(summary.counts.contents, 3);
}
