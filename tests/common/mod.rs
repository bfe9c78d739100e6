//! Shared fixtures: fake upstream servers and a pipeline wired to them.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use postshot::config::ServiceConfig;
use postshot::pipeline::Pipeline;
use postshot::scripted::ScriptedFactory;
use tiny_http::Server;
use tower::ServiceExt;
use url::Url;

pub const WARMER_UA: &str = "postshot-warmer";

/// What a fake upstream answers for one request
#[derive(Clone)]
pub enum Reply {
    Status(u16, Vec<u8>),
    /// Hold the connection open this long before answering 200
    Stall(Duration),
}

/// A tiny_http server on an ephemeral port that records request URLs
pub struct FakeUpstream {
    pub base: String,
    requests: Arc<Mutex<Vec<String>>>,
    hits: Arc<AtomicUsize>,
}

impl FakeUpstream {
    pub fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let seen = requests.clone();
        let count = hits.clone();
        std::thread::spawn(move || {
            for request in server.incoming_requests() {
                let url = request.url().to_string();
                seen.lock().unwrap().push(url.clone());
                count.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                // One thread per request so a stalled reply blocks nobody else
                std::thread::spawn(move || {
                    let (status, body) = match handler(&url) {
                        Reply::Status(status, body) => (status, body),
                        Reply::Stall(delay) => {
                            std::thread::sleep(delay);
                            (200, b"late".to_vec())
                        }
                    };
                    let resp = tiny_http::Response::from_data(body).with_status_code(status);
                    let _ = request.respond(resp);
                });
            }
        });

        Self {
            base: format!("http://{}", addr),
            requests,
            hits,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("{}{}", self.base, path)).unwrap()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Metadata endpoint that knows post 20 by `jack` and nothing else
pub fn metadata_upstream() -> FakeUpstream {
    FakeUpstream::spawn(|url| {
        if url.contains("id=20&") {
            Reply::Status(
                200,
                br#"{"id_str":"20","user":{"screen_name":"jack"}}"#.to_vec(),
            )
        } else {
            Reply::Status(404, b"{}".to_vec())
        }
    })
}

pub fn config(metadata: &FakeUpstream, cache: Option<&FakeUpstream>) -> ServiceConfig {
    ServiceConfig {
        metadata_endpoint: metadata.url("/tweet-result"),
        cache_endpoint: cache.map(|c| c.url("/images/")),
        cache_bypass_token: cache.map(|_| WARMER_UA.to_string()),
        ..ServiceConfig::default()
    }
}

pub fn app(config: ServiceConfig, engines: &ScriptedFactory) -> Router {
    let pipeline = Pipeline::new(config, Arc::new(engines.clone())).unwrap();
    postshot::server::router(Arc::new(pipeline))
}

pub async fn send(app: Router, method: &str, uri: &str, user_agent: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(ua) = user_agent {
        builder = builder.header("user-agent", ua);
    }
    app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}
