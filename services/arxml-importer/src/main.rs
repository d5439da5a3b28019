mod document;
mod error;
mod graph_builder;
mod import_batches;
mod neo4j_storage;
mod pipeline;
mod progress;
mod reference_resolver;

use anyhow::{Context, Result};
use document::SourceDocument;
use error::{ImportError, PipelineResult};
use import_batches::DEFAULT_BATCH_SIZE;
use neo4j_storage::Neo4jStore;
use pipeline::{run_import, ImportResult};
use progress::{ImportProgress, ProgressReporter};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ImportJob {
    job_id: String,
    files: Vec<String>,
    created_at: String,
}

#[derive(Debug, Serialize)]
pub struct JobUpdatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobUpdatePayload {
    fn status(status: &str, progress: Option<i32>) -> Self {
        Self {
            status: Some(status.to_string()),
            progress,
            result_summary: None,
            error: None,
        }
    }

    fn progress(progress: u8) -> Self {
        Self {
            status: None,
            progress: Some(i32::from(progress)),
            result_summary: None,
            error: None,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn update_job(&self, job_id: &str, payload: JobUpdatePayload) -> Result<()> {
        let url = format!("{}/api/v1/imports/{}", self.base_url, job_id);

        let response = self.client.patch(&url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send update request")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Failed to update import job status: {}", error_text);
            return Err(anyhow::anyhow!("API Error: {}", error_text));
        }

        info!("📊 Updated import job {} (status={:?}, progress={:?})",
              job_id, payload.status, payload.progress);

        Ok(())
    }
}

#[derive(Debug)]
struct Config {
    redis_url: String,
    neo4j_uri: String,
    neo4j_user: String,
    neo4j_password: String,
    api_gateway_url: String,
    import_queue: String,
    batch_size: usize,
}

impl Config {
    fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            neo4j_uri: env::var("NEO4J_URI").unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            neo4j_user: env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            neo4j_password: env::var("NEO4J_PASSWORD").unwrap_or_else(|_| "password".to_string()),
            api_gateway_url: env::var("API_GATEWAY_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            import_queue: env::var("IMPORT_QUEUE").unwrap_or_else(|_| "arxml_import_queue".to_string()),
            batch_size: parse_batch_size(env::var("IMPORT_BATCH_SIZE").ok().as_deref()),
        })
    }
}

/// Invalid or zero sizes fall back to the default
fn parse_batch_size(raw: Option<&str>) -> usize {
    match raw.map(|s| s.trim().parse::<usize>()) {
        None => DEFAULT_BATCH_SIZE,
        Some(Ok(size)) if size > 0 => size,
        Some(_) => {
            warn!("⚠️  Ignoring invalid IMPORT_BATCH_SIZE {:?}, using {}", raw, DEFAULT_BATCH_SIZE);
            DEFAULT_BATCH_SIZE
        }
    }
}

/// `RUST_LOG` when set and valid, `info` otherwise
fn log_filter(directives: Option<&str>) -> tracing_subscriber::EnvFilter {
    directives
        .and_then(|d| tracing_subscriber::EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"))
}

/// 1s, 2s, 4s, 8s, ...
fn backoff_secs(attempt: u32) -> u64 {
    2u64.saturating_pow(attempt.saturating_sub(1))
}

/// Connect to Redis with exponential backoff retry logic
async fn connect_redis_with_retry(url: &str, max_retries: u32) -> Result<redis::Client> {
    use tokio::time::{sleep, Duration};

    for attempt in 1..=max_retries {
        info!("🔄 Attempting to connect to Redis at {}... (attempt {}/{})", url, attempt, max_retries);

        let outcome = match redis::Client::open(url) {
            Ok(client) => client.get_async_connection().await.map(|_| client),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(client) => {
                info!("✅ Successfully connected to Redis");
                return Ok(client);
            }
            Err(e) if attempt < max_retries => {
                let wait_time = backoff_secs(attempt);
                warn!("⚠️  Failed to connect to Redis: {}. Retrying in {}s (attempt {}/{})...",
                      e, wait_time, attempt, max_retries);
                sleep(Duration::from_secs(wait_time)).await;
            }
            Err(e) => {
                error!("❌ Failed to connect to Redis after {} attempts: {}", max_retries, e);
                return Err(anyhow::anyhow!("Redis connection failed after {} retries: {}", max_retries, e));
            }
        }
    }

    Err(anyhow::anyhow!("Failed to connect to Redis"))
}

/// Connect to Neo4j with exponential backoff retry logic
async fn connect_neo4j_with_retry(
    uri: &str,
    user: &str,
    password: &str,
    max_retries: u32,
) -> Result<neo4rs::Graph> {
    use tokio::time::{sleep, Duration};

    for attempt in 1..=max_retries {
        info!("🔄 Attempting to connect to Neo4j at {}... (attempt {}/{})", uri, attempt, max_retries);

        match neo4rs::Graph::new(uri, user, password).await {
            Ok(graph) => {
                info!("✅ Successfully connected to Neo4j");
                return Ok(graph);
            }
            Err(e) if attempt < max_retries => {
                let wait_time = backoff_secs(attempt);
                warn!("⚠️  Failed to connect to Neo4j: {}. Retrying in {}s (attempt {}/{})...",
                      e, wait_time, attempt, max_retries);
                sleep(Duration::from_secs(wait_time)).await;
            }
            Err(e) => {
                error!("❌ Failed to connect to Neo4j after {} attempts: {}", max_retries, e);
                return Err(anyhow::anyhow!("Neo4j connection failed after {} retries: {}", max_retries, e));
            }
        }
    }

    Err(anyhow::anyhow!("Failed to connect to Neo4j"))
}

async fn read_documents(files: &[String]) -> PipelineResult<Vec<SourceDocument>> {
    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let content = tokio::fs::read_to_string(file)
            .await
            .map_err(|source| ImportError::Io {
                file: file.clone(),
                source,
            })?;
        documents.push(SourceDocument::new(file.clone(), content));
    }
    Ok(documents)
}

async fn import_files(store: &Neo4jStore, files: &[String], batch_size: usize, progress: &ProgressReporter) -> ImportResult {
    match read_documents(files).await {
        Ok(documents) => run_import(store, &documents, batch_size, progress).await,
        Err(e) => {
            error!("❌ {}", e);
            ImportResult::failure(&e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(env::var("RUST_LOG").ok().as_deref()))
        .init();

    info!("🚀 ARXML Importer starting...");

    let config = Config::from_env()?;
    let files: Vec<String> = env::args().skip(1).collect();

    let neo4j_graph = connect_neo4j_with_retry(
        &config.neo4j_uri,
        &config.neo4j_user,
        &config.neo4j_password,
        4,
    )
    .await?;
    let store = Neo4jStore::new(neo4j_graph);

    if !files.is_empty() {
        let result = import_files(&store, &files, config.batch_size, &ProgressReporter::silent()).await;
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize import result")?
        );
        if !result.success {
            std::process::exit(1);
        }
        return Ok(());
    }

    let api_client = ApiClient::new(config.api_gateway_url.clone());

    let redis_client = connect_redis_with_retry(&config.redis_url, 4).await?;
    let mut redis_conn = redis_client
        .get_async_connection()
        .await
        .context("Failed to get Redis async connection")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Shutdown signal received, finishing current import...");
                shutdown_clone.store(true, Ordering::SeqCst);
            }
            Err(err) => {
                error!("Failed to listen for shutdown signal: {}", err);
            }
        }
    });

    info!("👂 Listening for import jobs on {}...", config.import_queue);
    while !shutdown.load(Ordering::SeqCst) {
        match process_job(&mut redis_conn, &store, &api_client, &config).await {
            Ok(processed) => {
                if !processed {
                    tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
                }
            }
            Err(e) => {
                error!("Error processing import job: {:?}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        }
    }

    info!("👋 ARXML Importer shutdown complete");
    Ok(())
}

/// Forward progress events to the API gateway until the reporter is dropped
fn spawn_progress_forwarder(
    api_client: ApiClient,
    job_id: String,
    mut rx: mpsc::UnboundedReceiver<ImportProgress>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_sent = None;
        while let Some(event) = rx.recv().await {
            // 0 and 100 are covered by the PROCESSING and COMPLETED updates
            if event.percent == 0 || event.percent >= 100 || last_sent == Some(event.percent) {
                continue;
            }
            last_sent = Some(event.percent);
            if let Err(e) = api_client.update_job(&job_id, JobUpdatePayload::progress(event.percent)).await {
                warn!("Failed to report progress for {}: {:?}", job_id, e);
            }
        }
    })
}

fn completion_payload(result: &ImportResult) -> Result<JobUpdatePayload> {
    let summary = serde_json::to_value(result).context("Failed to serialize import result")?;
    Ok(if result.success {
        JobUpdatePayload {
            status: Some("COMPLETED".to_string()),
            progress: Some(100),
            result_summary: Some(summary),
            error: None,
        }
    } else {
        JobUpdatePayload {
            status: Some("FAILED".to_string()),
            progress: None,
            result_summary: Some(summary),
            error: result.error.clone(),
        }
    })
}

async fn process_job(
    redis_conn: &mut redis::aio::Connection,
    store: &Neo4jStore,
    api_client: &ApiClient,
    config: &Config,
) -> Result<bool> {
    // RPOP keeps compatibility with Redis servers lacking float BRPOP timeouts
    let popped: Option<String> = redis_conn
        .rpop(&config.import_queue, None)
        .await
        .context("Failed to pop from Redis queue")?;

    let Some(job_json) = popped else {
        return Ok(false);
    };

    let job: ImportJob = serde_json::from_str(&job_json).context("Failed to deserialize import job")?;
    info!("📝 Processing import job {} ({} files)", job.job_id, job.files.len());

    if let Err(e) = api_client.update_job(&job.job_id, JobUpdatePayload::status("PROCESSING", Some(0))).await {
        error!("Failed to update import job status to PROCESSING: {:?}", e);
    }

    let (reporter, rx) = ProgressReporter::channel();
    let forwarder = spawn_progress_forwarder(api_client.clone(), job.job_id.clone(), rx);
    let result = import_files(store, &job.files, config.batch_size, &reporter).await;
    drop(reporter);
    if let Err(e) = forwarder.await {
        warn!("Progress forwarder for {} ended abnormally: {}", job.job_id, e);
    }

    if result.success {
        info!("✅ Successfully processed import job: {}", job.job_id);
    } else {
        error!("❌ Import job {} failed: {:?}", job.job_id, result.error);
    }

    let payload = completion_payload(&result)?;
    if let Err(e) = api_client.update_job(&job.job_id, payload).await {
        error!("Failed to report final status of import job {}: {:?}", job.job_id, e);
    }

    Ok(true)
}

#[cfg(test)]
mod memory_store;

#[cfg(test)]
mod tests;
