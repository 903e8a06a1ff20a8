#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Hit {
    /// Path and query as routed
    pub url: String,
    pub user_agent: Option<String>,
    /// Request arrived in absolute form, i.e. through the server acting as a proxy
    pub proxied: bool,
}

/// Canned responses per path+query. Each route serves its responses in
/// order and keeps repeating the last one; unknown routes get a 404.
pub struct TestServer {
    pub base_url: String,
    pub addr: String,
    hits: Arc<Mutex<Vec<Hit>>>,
    shutdown: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

fn strip_origin(url: &str) -> (String, bool) {
    match url.strip_prefix("http://") {
        Some(rest) => match rest.find('/') {
            Some(idx) => (rest[idx..].to_string(), true),
            None => ("/".to_string(), true),
        },
        None => (url.to_string(), false),
    }
}

impl TestServer {
    pub fn start(routes: Vec<(&str, Vec<(u16, String)>)>) -> Self {
        Self::start_with_delays(routes, Vec::new())
    }

    /// Like `start`, but the listed routes answer only after their delay.
    /// The hit is recorded as soon as the request arrives.
    pub fn start_with_delays(
        routes: Vec<(&str, Vec<(u16, String)>)>,
        delays: Vec<(&str, Duration)>,
    ) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let addr = server.server_addr().to_string();
        let base_url = format!("http://{addr}");

        let mut routes: HashMap<String, (Vec<(u16, String)>, usize)> = routes
            .into_iter()
            .map(|(path, responses)| (path.to_string(), (responses, 0)))
            .collect();
        let delays: HashMap<String, Duration> = delays
            .into_iter()
            .map(|(path, delay)| (path.to_string(), delay))
            .collect();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let thread_hits = Arc::clone(&hits);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(20)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let (url, proxied) = strip_origin(request.url());
            let user_agent = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("User-Agent"))
                .map(|h| h.value.as_str().to_string());
            thread_hits.lock().unwrap().push(Hit {
                url: url.clone(),
                user_agent,
                proxied,
            });

            if let Some(delay) = delays.get(&url) {
                thread::sleep(*delay);
            }

            let (status, body) = match routes.get_mut(&url) {
                Some((responses, served)) if !responses.is_empty() => {
                    let idx = (*served).min(responses.len() - 1);
                    *served += 1;
                    responses[idx].clone()
                }
                _ => (404, "not found".to_string()),
            };

            let content_type = if body.trim_start().starts_with('{') {
                "application/json"
            } else {
                "text/html; charset=utf-8"
            };
            let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                .expect("build header");
            let response = tiny_http::Response::from_string(body)
                .with_status_code(status)
                .with_header(header);
            let _ = request.respond(response);
        });

        Self {
            base_url,
            addr,
            hits,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }

    pub fn hit_count(&self, url: &str) -> usize {
        self.hits().iter().filter(|h| h.url == url).count()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn ok(body: &str) -> Vec<(u16, String)> {
    vec![(200, body.to_string())]
}
