mod common;

use common::{ok, TestServer};
use fanmtl_scraper::metrics::MetricsTracker;
use fanmtl_scraper::proxy_check::{check_all, check_proxy};
use fanmtl_scraper::proxy_manager::ProxyManager;
use fanmtl_scraper::proxy_report::ProxyReport;
use fanmtl_scraper::user_agents::UserAgentPool;
use std::fs;
use std::time::Duration;

#[tokio::test]
async fn test_check_proxy_reads_origin() {
    let server = TestServer::start(vec![("/ip", ok(r#"{"origin": "203.0.113.9"}"#))]);
    let tracker = MetricsTracker::new();

    let result = check_proxy(
        &server.addr,
        "TestAgent/1.0",
        "http://echo.invalid/ip",
        Duration::from_secs(5),
        &tracker,
    )
    .await;

    assert!(result.ok);
    assert_eq!(result.status, Some(200));
    assert_eq!(result.origin.as_deref(), Some("203.0.113.9"));
    assert_eq!(tracker.get_metrics(&server.addr).unwrap().successful_requests, 1);
    assert_eq!(server.hits()[0].user_agent.as_deref(), Some("TestAgent/1.0"));
}

#[tokio::test]
async fn test_check_proxy_with_credentials() {
    let server = TestServer::start(vec![("/ip", ok(r#"{"origin": "203.0.113.10"}"#))]);
    let tracker = MetricsTracker::new();
    let entry = format!("bob:hunter2@{}", server.addr);

    let result = check_proxy(&entry, "TestAgent/1.0", "http://echo.invalid/ip", Duration::from_secs(5), &tracker).await;

    assert!(result.ok);
    // The working list keeps the usable entry, metrics only see the label
    assert_eq!(result.proxy, entry);
    let label = format!("bob:***@{}", server.addr);
    assert_eq!(tracker.get_metrics(&label).unwrap().successful_requests, 1);
    assert!(!tracker.export_json().contains("hunter2"));
}

#[tokio::test]
async fn test_check_all_mixes_working_and_dead() {
    let server = TestServer::start(vec![("/ip", vec![(503, "busy".to_string())])]);
    let manager = ProxyManager::new(
        vec![server.addr.clone(), "127.0.0.1:1".to_string()],
        Duration::from_secs(300),
    );
    let tracker = MetricsTracker::new();

    let results = check_all(
        &manager,
        &UserAgentPool::default(),
        "http://echo.invalid/ip",
        Duration::from_secs(5),
        (Duration::ZERO, Duration::ZERO),
        &tracker,
    )
    .await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| !r.ok));
    assert_eq!(results[0].status, Some(503));
    assert!(results[1].status.is_none());
    assert_eq!(tracker.get_all_metrics().len(), 2);
}

#[test]
fn test_report_from_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("fanmtl.log");
    let out_path = dir.path().join("best_proxies.txt");

    let mut log = String::new();
    for i in 0..6 {
        let url = format!("https://www.fanmtl.com/novel/x_{}.html", i);
        log.push_str(&format!("2024-05-01 10:00:0{i} [fanmtl_scraper::http_client] INFO: Using proxy 10.0.0.1:80 for {url}\n"));
        log.push_str(&format!("2024-05-01 10:00:0{i} [fanmtl_scraper::http_client] INFO: Proxy 10.0.0.1:80 works for {url}\n"));
        log.push_str(&format!("2024-05-01 10:00:0{i} [fanmtl_scraper::http_client] INFO: Using proxy 10.0.0.2:80 for {url}\n"));
        log.push_str(&format!("2024-05-01 10:00:0{i} [fanmtl_scraper::http_client] WARN: Proxy 10.0.0.2:80 failed with status 503\n"));
    }
    fs::write(&log_path, log).unwrap();

    let report = ProxyReport::from_file(&log_path).unwrap();
    assert_eq!(report.stats("10.0.0.1:80").unwrap().success_rate(), 100.0);
    assert_eq!(report.stats("10.0.0.2:80").unwrap().success_rate(), 0.0);

    let best: Vec<&str> = report.best(5, 10).into_iter().map(|(p, _)| p).collect();
    assert_eq!(best, vec!["10.0.0.1:80", "10.0.0.2:80"]);

    assert_eq!(report.write_best(&out_path, 5, 70.0).unwrap(), 1);
    assert_eq!(fs::read_to_string(&out_path).unwrap(), "10.0.0.1:80\n");
}
