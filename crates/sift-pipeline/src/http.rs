//! Blocking HTTP clients for the four external services.
//!
//! Each client owns one endpoint and a per-request timeout. The generation
//! client also shares a [`RateLimiter`]: calls are refused locally while a
//! cooldown is active, and an HTTP 429 arms the cooldown (honouring
//! `Retry-After` seconds when present).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sift_core::config::ServicesConfig;
use sift_core::error::{ServiceError, ServiceKind};
use sift_core::model::RetrievedPassage;
use sift_core::ratelimit::RateLimiter;
use sift_core::service::{
    Embedder, GenerationRequest, Generator, RerankScore, Reranker, Retriever,
};
use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("sift/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in a [`ServiceError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone)]
struct Endpoint {
    service: ServiceKind,
    url: String,
    timeout: Duration,
}

impl Endpoint {
    fn new(service: ServiceKind, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            service,
            url: url.into(),
            timeout,
        }
    }

    fn send(&self, url: &str, body: &impl Serialize) -> Result<ureq::Response, ureq::Error> {
        debug!(service = %self.service, url, "POST");
        ureq::post(url)
            .timeout(self.timeout)
            .set("Accept", "application/json")
            .set("User-Agent", USER_AGENT)
            .send_json(body)
    }

    fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &impl Serialize,
    ) -> Result<T, ServiceError> {
        let response = self.send(url, body).map_err(|err| self.map_error(err))?;
        self.decode(response)
    }

    fn decode<T: DeserializeOwned>(&self, response: ureq::Response) -> Result<T, ServiceError> {
        response
            .into_json::<T>()
            .map_err(|err| ServiceError::Decode {
                service: self.service,
                message: err.to_string(),
            })
    }

    fn map_error(&self, err: ureq::Error) -> ServiceError {
        match err {
            ureq::Error::Status(status, response) => {
                let body: String = response
                    .into_string()
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_ERROR_BODY_CHARS)
                    .collect();
                ServiceError::Status {
                    service: self.service,
                    status,
                    body,
                }
            }
            ureq::Error::Transport(transport) if is_timeout(&transport) => ServiceError::Timeout {
                service: self.service,
                after: self.timeout,
            },
            ureq::Error::Transport(transport) => ServiceError::Transport {
                service: self.service,
                message: transport.to_string(),
            },
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    transport
        .source()
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        })
}

fn retry_after(response: &ureq::Response) -> Option<Duration> {
    response
        .header("Retry-After")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

// ---------------------------------------------------------------------------
// Embedding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    endpoint: Endpoint,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: Endpoint::new(ServiceKind::Embedding, url, timeout),
        }
    }

    #[must_use]
    pub fn from_config(config: &ServicesConfig) -> Self {
        Self::new(config.embed_url.clone(), config.timeouts.embedding())
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, texts: &[&str], model: &str) -> Result<Vec<Vec<f32>>, ServiceError> {
        let body = json!({ "model": model, "input": texts });
        let response: EmbedResponse = self.endpoint.post(&self.endpoint.url, &body)?;
        if response.embeddings.len() != texts.len() {
            return Err(ServiceError::Decode {
                service: ServiceKind::Embedding,
                message: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    response.embeddings.len()
                ),
            });
        }
        Ok(response.embeddings)
    }
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRetriever {
    endpoint: Endpoint,
}

#[derive(Deserialize)]
struct QueryResponse {
    results: Vec<RetrievedPassage>,
}

impl HttpRetriever {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: Endpoint::new(ServiceKind::Retrieval, url, timeout),
        }
    }

    #[must_use]
    pub fn from_config(config: &ServicesConfig) -> Self {
        Self::new(config.retrieval_url.clone(), config.timeouts.retrieval())
    }

    fn query_url(&self, collection: &str) -> String {
        format!(
            "{}/collections/{collection}/query",
            self.endpoint.url.trim_end_matches('/')
        )
    }
}

impl Retriever for HttpRetriever {
    fn retrieve(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedPassage>, ServiceError> {
        let body = json!({ "embedding": embedding, "k": k });
        let response: QueryResponse = self.endpoint.post(&self.query_url(collection), &body)?;
        Ok(response.results)
    }
}

// ---------------------------------------------------------------------------
// Rerank
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpReranker {
    endpoint: Endpoint,
}

/// Rerank services answer either with a bare list or a `results` wrapper.
#[derive(Deserialize)]
#[serde(untagged)]
enum RerankResponse {
    Bare(Vec<RerankScore>),
    Wrapped { results: Vec<RerankScore> },
}

impl HttpReranker {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: Endpoint::new(ServiceKind::Rerank, url, timeout),
        }
    }

    #[must_use]
    pub fn from_config(config: &ServicesConfig) -> Self {
        Self::new(config.rerank_url.clone(), config.timeouts.rerank())
    }
}

impl Reranker for HttpReranker {
    fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<RerankScore>, ServiceError> {
        let body = json!({ "query": query, "documents": documents });
        let response: RerankResponse = self.endpoint.post(&self.endpoint.url, &body)?;
        Ok(match response {
            RerankResponse::Bare(scores) | RerankResponse::Wrapped { results: scores } => scores,
        })
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Ollama-style `generate` client.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    endpoint: Endpoint,
    limiter: Arc<RateLimiter>,
    supports_schema: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl HttpGenerator {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration, limiter: Arc<RateLimiter>) -> Self {
        Self {
            endpoint: Endpoint::new(ServiceKind::Generation, url, timeout),
            limiter,
            supports_schema: true,
        }
    }

    #[must_use]
    pub fn from_config(config: &ServicesConfig, limiter: Arc<RateLimiter>) -> Self {
        Self::new(
            config.generate_url.clone(),
            config.timeouts.generation(),
            limiter,
        )
    }

    /// Declare whether the server accepts a JSON Schema in `format`.
    #[must_use]
    pub const fn with_schema_support(mut self, supported: bool) -> Self {
        self.supports_schema = supported;
        self
    }

    fn body(&self, request: &GenerationRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });
        if let (true, Some(schema)) = (self.supports_schema, &request.response_schema) {
            body["format"] = schema.clone();
        }
        body
    }
}

impl Generator for HttpGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        self.limiter
            .acquire()
            .map_err(|retry_after| ServiceError::RateLimited { retry_after })?;

        let url = &self.endpoint.url;
        let response = match self.endpoint.send(url, &self.body(request)) {
            Ok(response) => response,
            Err(ureq::Error::Status(429, response)) => {
                let hint = retry_after(&response);
                warn!(retry_after = ?hint, "generation service returned 429");
                self.limiter.trip(hint);
                return Err(ServiceError::RateLimited {
                    retry_after: self.limiter.remaining(),
                });
            }
            Err(err) => return Err(self.endpoint.map_error(err)),
        };

        let text = self.endpoint.decode::<GenerateResponse>(response)?.response;
        if text.trim().is_empty() {
            return Err(ServiceError::EmptyResponse {
                service: ServiceKind::Generation,
            });
        }
        Ok(text)
    }

    fn supports_schema(&self) -> bool {
        self.supports_schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::ratelimit::ManualClock;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    /// Serve one canned HTTP response; hands the request body back.
    fn serve_once(status: &str, headers: &[&str], body: &str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let response = format!(
            "HTTP/1.1 {status}\r\n{}Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            headers.iter().map(|h| format!("{h}\r\n")).collect::<String>(),
            body.len()
        );
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read header");
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().expect("length");
                    }
                }
            }
            let mut request_body = vec![0; content_length];
            reader.read_exact(&mut request_body).expect("read body");
            let _ = tx.send(String::from_utf8(request_body).expect("utf8"));
            let mut stream = stream;
            stream.write_all(response.as_bytes()).expect("write");
        });
        (format!("http://{addr}"), rx)
    }

    fn limiter() -> (Arc<ManualClock>, Arc<RateLimiter>) {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::unlimited(clock.clone(), Duration::from_secs(30)));
        (clock, limiter)
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "p".into(),
            model: "m".into(),
            temperature: 0.1,
            max_tokens: 64,
            response_schema: Some(json!({"type": "object"})),
        }
    }

    #[test]
    fn embed_posts_model_and_input() {
        let (url, rx) = serve_once("200 OK", &[], r#"{"embeddings": [[0.1, 0.2]]}"#);
        let out = HttpEmbedder::new(url, Duration::from_secs(5))
            .embed(&["hello"], "nomic")
            .expect("embed");
        assert_eq!(out, vec![vec![0.1, 0.2]]);
        let sent: Value = serde_json::from_str(&rx.recv().expect("body")).expect("json");
        assert_eq!(sent, json!({"model": "nomic", "input": ["hello"]}));
    }

    #[test]
    fn embed_count_mismatch_is_decode_error() {
        let (url, _rx) = serve_once("200 OK", &[], r#"{"embeddings": []}"#);
        let err = HttpEmbedder::new(url, Duration::from_secs(5))
            .embed(&["hello"], "nomic")
            .expect_err("mismatch");
        assert!(matches!(err, ServiceError::Decode { .. }));
    }

    #[test]
    fn retrieve_uses_collection_path() {
        let retriever = HttpRetriever::new("http://index:8000/", Duration::from_secs(5));
        assert_eq!(
            retriever.query_url("sift_hr_1234abcd"),
            "http://index:8000/collections/sift_hr_1234abcd/query"
        );
    }

    #[test]
    fn retrieve_decodes_results() {
        let (url, _rx) = serve_once(
            "200 OK",
            &[],
            r#"{"results": [{"id": "a", "content": "text", "metadata": {"source": "x.md"}, "distance": 0.25}]}"#,
        );
        let out = HttpRetriever::new(url, Duration::from_secs(5))
            .retrieve("c", &[0.5], 3)
            .expect("retrieve");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "a");
        assert!((out[0].distance - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn rerank_accepts_wrapped_results_with_score_alias() {
        let (url, _rx) = serve_once("200 OK", &[], r#"{"results": [{"index": 1, "score": 7.5}]}"#);
        let out = HttpReranker::new(url, Duration::from_secs(5))
            .rerank("q", &["a", "b"])
            .expect("rerank");
        assert_eq!(
            out,
            vec![RerankScore {
                index: 1,
                relevance_score: 7.5
            }]
        );
    }

    #[test]
    fn status_errors_carry_body() {
        let (url, _rx) = serve_once("503 Service Unavailable", &[], r#"{"error": "loading"}"#);
        let err = HttpReranker::new(url, Duration::from_secs(5))
            .rerank("q", &["a"])
            .expect_err("503");
        assert!(matches!(
            err,
            ServiceError::Status { status: 503, ref body, .. } if body.contains("loading")
        ));
    }

    #[test]
    fn generate_sends_options_and_schema() {
        let (url, rx) = serve_once("200 OK", &[], r#"{"response": "<think>x</think>answer"}"#);
        let (_clock, limiter) = limiter();
        let out = HttpGenerator::new(url, Duration::from_secs(5), limiter)
            .generate(&request())
            .expect("generate");
        assert_eq!(out, "<think>x</think>answer");

        let sent: Value = serde_json::from_str(&rx.recv().expect("body")).expect("json");
        assert_eq!(sent["stream"], json!(false));
        assert_eq!(sent["options"]["num_predict"], json!(64));
        assert_eq!(sent["format"], json!({"type": "object"}));
    }

    #[test]
    fn schema_omitted_when_unsupported() {
        let (_clock, limiter) = limiter();
        let generator = HttpGenerator::new("http://unused", Duration::from_secs(1), limiter)
            .with_schema_support(false);
        assert!(generator.body(&request()).get("format").is_none());
        assert!(!generator.supports_schema());
    }

    #[test]
    fn too_many_requests_arms_cooldown() {
        let (url, _rx) = serve_once("429 Too Many Requests", &["Retry-After: 12"], "{}");
        let (clock, limiter) = limiter();
        let generator = HttpGenerator::new(url, Duration::from_secs(5), limiter.clone());

        let err = generator.generate(&request()).expect_err("429");
        assert_eq!(
            err,
            ServiceError::RateLimited {
                retry_after: Duration::from_secs(12)
            }
        );
        assert!(limiter.is_cooling_down());

        // Refused locally without touching the network.
        clock.advance(Duration::from_secs(2));
        let err = generator.generate(&request()).expect_err("cooling down");
        assert_eq!(
            err,
            ServiceError::RateLimited {
                retry_after: Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn too_many_requests_reports_server_hint_not_spacing() {
        let (url, _rx) = serve_once("429 Too Many Requests", &["Retry-After: 0"], "{}");
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::new(
            clock.clone(),
            Duration::from_millis(500),
            Duration::from_secs(30),
        ));
        let generator = HttpGenerator::new(url, Duration::from_secs(5), limiter.clone());

        let err = generator.generate(&request()).expect_err("429");
        assert_eq!(
            err,
            ServiceError::RateLimited {
                retry_after: Duration::ZERO
            }
        );

        // Only the call that reached the server counts against the spacing.
        clock.advance(Duration::from_millis(500));
        assert!(limiter.acquire().is_ok());
    }

    #[test]
    fn unreachable_service_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let err = HttpEmbedder::new(format!("http://{addr}"), Duration::from_secs(2))
            .embed(&["x"], "m")
            .expect_err("refused");
        assert!(matches!(
            err,
            ServiceError::Transport {
                service: ServiceKind::Embedding,
                ..
            }
        ));
    }
}
