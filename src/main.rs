//! Admission Pipeline
//!
//! Runs producers and consumers through an admission queue against a
//! simulated gateway, serving metrics and health while it runs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Admission Pipeline                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Producers   │───▶│  Admission   │───▶│  Consumers   │       │
//! │  │              │    │    Queue     │    │  (Gateway)   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │                             │                                    │
//! │                 /metrics  /healthz  /readyz                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use admission_window::monitoring::{HealthCheck, PrometheusExporter};
use admission_window::mq::QueueMetricsSnapshot;
use admission_window::window::WindowMetricsSnapshot;
use admission_window::{AdmissionQueue, ExpiringWindow, MessageSender, PipelineConfig};

/// Status returned by the gateway for a delivered message
const SUCCESS: i32 = 200;

/// Status returned by the gateway when it throttles a message
const THROTTLED: i32 = 429;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Admission Pipeline - backpressure demo for the expiring admission window
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML pipeline configuration file
    #[arg(long, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Window name (overrides the file)
    #[arg(long, env = "WINDOW_NAME")]
    window_name: Option<String>,

    /// Window capacity (overrides the file)
    #[arg(long, env = "WINDOW_CAPACITY")]
    capacity: Option<usize>,

    /// Key time-to-live in milliseconds (overrides the file)
    #[arg(long, env = "WINDOW_TTL_MS")]
    ttl_ms: Option<u64>,

    /// Queue capacity (overrides the file)
    #[arg(long, env = "QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,

    /// Number of producer tasks
    #[arg(long, env = "PRODUCERS", default_value = "4")]
    producers: usize,

    /// Number of consumer tasks
    #[arg(long, env = "CONSUMERS", default_value = "2")]
    consumers: usize,

    /// Messages generated by each producer
    #[arg(long, env = "MESSAGES", default_value = "250")]
    messages: usize,

    /// Every Nth send is throttled by the gateway (0 disables failures)
    #[arg(long, env = "FAILURE_EVERY", default_value = "5")]
    failure_every: u64,

    /// Simulated gateway latency in milliseconds
    #[arg(long, env = "SEND_DELAY_MS", default_value = "2")]
    send_delay_ms: u64,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn pipeline_config(&self) -> admission_window::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(name) = &self.window_name {
            config.window.name = name.clone();
        }
        if let Some(capacity) = self.capacity {
            config.window.capacity = capacity;
        }
        if let Some(ttl_ms) = self.ttl_ms {
            config.window.ttl = Duration::from_millis(ttl_ms);
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue.capacity = capacity;
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Messages and Gateway
// =============================================================================

#[derive(Debug, Clone)]
struct Message {
    id: Uuid,
    recipient: String,
    payload: Bytes,
    created_at: DateTime<Utc>,
}

impl Message {
    fn new(producer: usize, seq: usize) -> Self {
        let recipient = format!("1860000{:02}{:02}", producer % 100, seq % 100);
        Self {
            id: Uuid::new_v4(),
            payload: Bytes::from(format!("hello world {}", recipient)),
            recipient,
            created_at: Utc::now(),
        }
    }
}

/// Gateway that throttles a deterministic share of sends
struct SimulatedGateway {
    failure_every: u64,
    delay: Duration,
    sends: AtomicU64,
}

#[async_trait]
impl MessageSender<Message> for SimulatedGateway {
    async fn send(&self, message: &Message) -> anyhow::Result<i32> {
        tokio::time::sleep(self.delay).await;

        let n = self.sends.fetch_add(1, Ordering::Relaxed) + 1;
        let status = if self.failure_every > 0 && n % self.failure_every == 0 {
            THROTTLED
        } else {
            SUCCESS
        };

        debug!(
            id = %message.id,
            recipient = %message.recipient,
            bytes = message.payload.len(),
            age_ms = (Utc::now() - message.created_at).num_milliseconds(),
            status,
            "Gateway response"
        );
        Ok(status)
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    window: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    elapsed_ms: i64,
    produced: u64,
    fallbacks: u64,
    in_flight: usize,
    window_metrics: WindowMetricsSnapshot,
    queue_metrics: QueueMetricsSnapshot,
}

type Queue = AdmissionQueue<Uuid, Message>;

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = args.pipeline_config()?;
    info!("Starting Admission Pipeline");
    info!("  Window: {}", config.window.name);
    info!("  Capacity: {}", config.window.capacity);
    info!("  TTL: {:?}", config.window.ttl);
    info!("  Admission: {:?}", config.window.admission);
    info!("  Queue capacity: {}", config.queue.capacity);
    info!("  Producers: {} x {} messages", args.producers, args.messages);
    info!("  Consumers: {}", args.consumers);

    let fallbacks = Arc::new(AtomicU64::new(0));
    let fallback_count = Arc::clone(&fallbacks);
    let window = ExpiringWindow::<Uuid, Message>::builder(config.window.clone())
        .on_reject(move |id: &Uuid, message: &Message| -> anyhow::Result<()> {
            fallback_count.fetch_add(1, Ordering::Relaxed);
            info!(%id, recipient = %message.recipient, "Window full, using guaranteed-delivery fallback");
            Ok(())
        })
        .on_expire(|id: &Uuid, message: &Message| -> anyhow::Result<()> {
            debug!(%id, recipient = %message.recipient, "In-flight message expired");
            Ok(())
        })
        .build()?;

    let queue: Arc<Queue> = AdmissionQueue::from_config(window, &config.queue, |m: &Message| Some(m.id))?;

    let health = Arc::new(HealthCheck::new());
    health.watch_window(queue.window());
    let exporter = Arc::new(PrometheusExporter::new()?);

    let server = {
        let addr = args.metrics_addr.clone();
        let queue = Arc::clone(&queue);
        let health = Arc::clone(&health);
        let exporter = Arc::clone(&exporter);
        tokio::spawn(async move {
            if let Err(e) = run_http_server(&addr, queue, exporter, health).await {
                error!("HTTP server error: {:#}", e);
            }
        })
    };

    health.set_ready(true);
    let started_at = Utc::now();
    let token = CancellationToken::new();

    let produced = tokio::select! {
        produced = run_pipeline(&args, Arc::clone(&queue), token.clone()) => produced,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            token.cancel();
            0
        }
    };

    health.set_ready(false);
    queue.shutdown().await;
    server.abort();

    let finished_at = Utc::now();
    let summary = Summary {
        window: queue.window().name().to_string(),
        started_at,
        finished_at,
        elapsed_ms: (finished_at - started_at).num_milliseconds(),
        produced,
        fallbacks: fallbacks.load(Ordering::Relaxed),
        in_flight: queue.window_size(),
        window_metrics: queue.window().metrics().snapshot(),
        queue_metrics: queue.metrics().snapshot(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    info!("Admission Pipeline shutdown complete");
    Ok(())
}

/// Run producers to completion, drain the queue, then stop the consumers.
/// Returns the number of messages produced.
async fn run_pipeline(args: &Args, queue: Arc<Queue>, token: CancellationToken) -> u64 {
    let gateway = Arc::new(SimulatedGateway {
        failure_every: args.failure_every,
        delay: Duration::from_millis(args.send_delay_ms),
        sends: AtomicU64::new(0),
    });

    let consumers: Vec<_> = (0..args.consumers)
        .map(|consumer| {
            let queue = Arc::clone(&queue);
            let gateway = Arc::clone(&gateway);
            let token = token.clone();
            tokio::spawn(async move {
                // A message already taken is delivered before the token is honoured
                loop {
                    match queue
                        .dequeue_and_send_until(gateway.as_ref(), SUCCESS, &token)
                        .await
                    {
                        Ok(None) => break,
                        Ok(Some(SUCCESS)) => {}
                        Ok(Some(status)) => debug!(consumer, status, "Message left in flight"),
                        Err(e) => {
                            warn!(consumer, "Consumer error: {}", e);
                            if !matches!(e, admission_window::Error::Send(_)) {
                                break;
                            }
                        }
                    }
                }
            })
        })
        .collect();

    let producers: Vec<_> = (0..args.producers)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            let messages = args.messages;
            tokio::spawn(async move {
                let mut produced = 0u64;
                for seq in 0..messages {
                    match queue.enqueue(Message::new(producer, seq)).await {
                        Ok(_) => produced += 1,
                        Err(e) => {
                            warn!(producer, "Producer stopped: {}", e);
                            break;
                        }
                    }
                    tokio::task::yield_now().await;
                }
                produced
            })
        })
        .collect();

    let mut produced = 0;
    for result in futures::future::join_all(producers).await {
        match result {
            Ok(count) => produced += count,
            Err(e) => error!("Producer task failed: {}", e),
        }
    }

    while queue.queue_size() > 0 && !token.is_cancelled() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    token.cancel();

    for handle in consumers {
        if let Err(e) = handle.await {
            error!("Consumer task failed: {}", e);
        }
    }

    info!(produced, "Pipeline drained");
    produced
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => args.log_level.to_lowercase(),
        _ => "info".to_string(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn", level)));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics & Health Server
// =============================================================================

async fn run_http_server(
    addr: &str,
    queue: Arc<Queue>,
    exporter: Arc<PrometheusExporter>,
    health: Arc<HealthCheck>,
) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        response
    }

    let route = move |path: &str| -> Response<Full<Bytes>> {
        match path {
            "/metrics" => {
                exporter.observe_queue(&queue);
                match exporter.encode() {
                    Ok(text) => respond(StatusCode::OK, prometheus::TEXT_FORMAT, text.into_bytes()),
                    Err(e) => respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        e.to_string().into_bytes(),
                    ),
                }
            }
            "/healthz" => {
                let status = if health.is_live() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                respond(status, "application/json", health_json(&health.liveness_check()))
            }
            "/readyz" => {
                let response = health.check_all();
                let status = if health.is_ready() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                respond(status, "application/json", health_json(&response))
            }
            _ => respond(StatusCode::NOT_FOUND, "text/plain", b"not found".to_vec()),
        }
    };
    let route = Arc::new(route);

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics server address {}: {}", addr, e))?;
    let listener = TcpListener::bind(addr).await?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let route = Arc::clone(&route);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = route(req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

fn health_json<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e).into_bytes())
}
