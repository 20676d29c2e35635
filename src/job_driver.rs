//! External job-acquisition client and the single-iteration job lifecycle (C11).
//!
//! Grounded on `original_source/app/api/goflow_client.py` for the endpoint shapes, bearer-token
//! auth and status-code error mapping, and `app/services/goflow_workflow.py::run_once` for the
//! acquire -> status -> process -> submit -> report -> status sequencing, including its
//! swallow-and-log behavior around status updates. The HTTP client itself follows the teacher's
//! `clients/alt_backend.rs` `Client::builder().connect_timeout(..).timeout(..)` idiom.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::WorkerError;
use crate::observability::Metrics;
use crate::util::retry::RetryConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub project_id: String,
    pub media_id: String,
    pub analysis_id: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusUpdate {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultPayload {
    pub project_id: String,
    pub media_id: String,
    pub analysis_id: String,
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRequest {
    pub project_id: String,
    pub include_details: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportResponse {
    pub project_id: String,
    pub report_id: String,
    pub status: String,
}

/// What the caller-supplied processing function hands back for one job.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub result: Value,
    pub meta: Option<Value>,
}

/// User-supplied per-job handler. Errors propagate as a `failed` status update; they never
/// abort the lifecycle driver itself.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &Job) -> Result<ProcessOutcome, WorkerError>;
}

#[derive(Debug, Clone)]
pub struct JobDriverConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

/// Bearer-token-authenticated RPC client against the four external job-driver endpoints (§6).
pub struct JobDriverClient {
    client: Client,
    base_url: Url,
    bearer_token: Option<String>,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl JobDriverClient {
    pub fn new(config: JobDriverConfig, metrics: Arc<Metrics>) -> Result<Self, WorkerError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .map_err(|e| WorkerError::ClientError(format!("failed to build job-driver HTTP client: {e}")))?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| WorkerError::ClientError(format!("invalid job-driver base URL: {e}")))?;
        Ok(Self {
            client,
            base_url,
            bearer_token: config.bearer_token,
            retry: RetryConfig::new(config.retry_max_attempts, config.retry_base_delay_ms, config.retry_max_delay_ms),
            metrics,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Issue one request, retrying retryable failures (network faults and 5xx) up to
    /// `self.retry.max_attempts` times with jittered exponential backoff. Non-retryable
    /// failures short-circuit on the first attempt.
    async fn request_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&impl Serialize>,
    ) -> Result<T, WorkerError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| WorkerError::ClientError(format!("failed to build job-driver URL: {e}")))?;

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
            }

            let mut builder = self.authorize(self.client.request(method.clone(), url.clone()));
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let outcome = builder.send().await;
            let error = match outcome {
                Ok(response) => match map_response::<T>(response).await {
                    Ok(value) => return Ok(value),
                    Err(error) => error,
                },
                Err(transport_error) => {
                    if transport_error.is_timeout() || transport_error.is_connect() {
                        WorkerError::ServerError(format!("job-driver request failed: {transport_error}"))
                    } else {
                        WorkerError::ClientError(format!("job-driver request failed: {transport_error}"))
                    }
                }
            };

            let retryable = error.retry_class() == crate::error::RetryClass::Retryable;
            if !retryable || !self.retry.can_retry(attempt) {
                return Err(error);
            }
            self.metrics.jobs_retried.inc();
            attempt += 1;
        }
    }

    pub async fn get_next_job(&self) -> Result<Job, WorkerError> {
        self.request_with_retry(reqwest::Method::GET, "api/v1/agent/next-job", None::<&()>)
            .await
    }

    pub async fn update_project_status(&self, project_id: &str, update: &JobStatusUpdate) -> Result<(), WorkerError> {
        let path = format!("api/v1/agent/projects/{project_id}/status");
        self.request_with_retry::<Value>(reqwest::Method::POST, &path, Some(update)).await?;
        Ok(())
    }

    pub async fn submit_analysis_result(&self, payload: &ResultPayload) -> Result<(), WorkerError> {
        let path = format!(
            "api/v1/agent/projects/{}/media/{}/analysis/{}",
            payload.project_id, payload.media_id, payload.analysis_id
        );
        self.request_with_retry::<Value>(reqwest::Method::POST, &path, Some(payload)).await?;
        Ok(())
    }

    pub async fn generate_project_report(&self, request: &ReportRequest) -> Result<ReportResponse, WorkerError> {
        let path = format!("api/v1/agent/projects/{}/reports", request.project_id);
        self.request_with_retry(reqwest::Method::POST, &path, Some(request)).await
    }
}

async fn map_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, WorkerError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| WorkerError::ClientError(format!("failed to decode job-driver response: {e}")));
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            WorkerError::AuthError(format!("job-driver returned {status}: {body}"))
        }
        StatusCode::NOT_FOUND => WorkerError::NotFound(format!("job-driver returned {status}: {body}")),
        s if s.is_client_error() => WorkerError::ClientError(format!("job-driver returned {status}: {body}")),
        s if s.is_server_error() => WorkerError::ServerError(format!("job-driver returned {status}: {body}")),
        _ => WorkerError::ClientError(format!("job-driver returned {status}: {body}")),
    })
}

/// Drives the acquire -> status -> process -> submit -> report -> status sequence for one job.
pub struct JobLifecycleDriver {
    client: JobDriverClient,
    generate_report: bool,
    metrics: Arc<Metrics>,
}

impl JobLifecycleDriver {
    #[must_use]
    pub fn new(client: JobDriverClient, generate_report: bool, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            generate_report,
            metrics,
        }
    }

    /// Run a single job lifecycle iteration. Returns `Ok(true)` if a job was acquired and
    /// handled (including the failure path), `Ok(false)` if no job was available.
    pub async fn run_once(&self, processor: &dyn JobProcessor) -> Result<bool, WorkerError> {
        let job = match self.client.get_next_job().await {
            Ok(job) => job,
            Err(error) => {
                info!(%error, "no job acquired or fetch failed");
                return Ok(false);
            }
        };

        info!(job_id = %job.job_id, "acquired job");

        self.safe_status_update(
            &job.project_id,
            JobStatusUpdate {
                status: "in_progress",
                detail: None,
                progress: Some(0.0),
            },
        )
        .await;

        match processor.process(&job).await {
            Ok(outcome) => {
                let payload = ResultPayload {
                    project_id: job.project_id.clone(),
                    media_id: job.media_id.clone(),
                    analysis_id: job.analysis_id.clone(),
                    result: outcome.result,
                    meta: outcome.meta,
                };
                self.client.submit_analysis_result(&payload).await?;
                info!(job_id = %job.job_id, "submitted result for job");

                if self.generate_report {
                    match self
                        .client
                        .generate_project_report(&ReportRequest {
                            project_id: job.project_id.clone(),
                            include_details: true,
                        })
                        .await
                    {
                        Ok(report) => info!(report_id = %report.report_id, status = %report.status, "report requested"),
                        Err(error) => warn!(%error, "report generation request failed"),
                    }
                }

                self.safe_status_update(
                    &job.project_id,
                    JobStatusUpdate {
                        status: "completed",
                        detail: None,
                        progress: Some(1.0),
                    },
                )
                .await;
                self.metrics.jobs_completed.inc();
                Ok(true)
            }
            Err(error) => {
                warn!(job_id = %job.job_id, %error, "job processing failed");
                self.safe_status_update(
                    &job.project_id,
                    JobStatusUpdate {
                        status: "failed",
                        detail: Some(error.to_string()),
                        progress: None,
                    },
                )
                .await;
                self.metrics.jobs_failed.inc();
                Ok(true)
            }
        }
    }

    /// A failure during status publishing is logged but must never abort the iteration.
    async fn safe_status_update(&self, project_id: &str, update: JobStatusUpdate) {
        if let Err(error) = self.client.update_project_status(project_id, &update).await {
            warn!(%error, project_id, "status update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> JobDriverClient {
        JobDriverClient::new(
            JobDriverConfig {
                base_url: format!("{}/", server.uri()),
                bearer_token: Some("test-token".to_string()),
                connect_timeout: Duration::from_secs(3),
                total_timeout: Duration::from_secs(5),
                retry_max_attempts: 3,
                retry_base_delay_ms: 5,
                retry_max_delay_ms: 20,
            },
            crate::observability::metrics::test_metrics(),
        )
        .expect("client should build")
    }

    struct EchoProcessor;

    #[async_trait]
    impl JobProcessor for EchoProcessor {
        async fn process(&self, job: &Job) -> Result<ProcessOutcome, WorkerError> {
            Ok(ProcessOutcome {
                result: serde_json::json!({"job_id": job.job_id}),
                meta: None,
            })
        }
    }

    struct FailingProcessor;

    #[async_trait]
    impl JobProcessor for FailingProcessor {
        async fn process(&self, _job: &Job) -> Result<ProcessOutcome, WorkerError> {
            Err(WorkerError::ProviderPermanent("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn run_once_returns_false_when_no_job_available() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/agent/next-job"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let driver = JobLifecycleDriver::new(client_for(&server), false, crate::observability::metrics::test_metrics());
        let processed = driver.run_once(&EchoProcessor).await.unwrap();
        assert!(!processed);
    }

    #[tokio::test]
    async fn run_once_processes_and_reports_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/agent/next-job"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "job_id": "j1",
                "project_id": "p1",
                "media_id": "m1",
                "analysis_id": "a1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/agent/projects/p1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/agent/projects/p1/media/m1/analysis/a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let driver = JobLifecycleDriver::new(client_for(&server), false, crate::observability::metrics::test_metrics());
        let processed = driver.run_once(&EchoProcessor).await.unwrap();
        assert!(processed);
    }

    #[tokio::test]
    async fn processor_failure_still_reports_processed_true() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/agent/next-job"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "job_id": "j2",
                "project_id": "p2",
                "media_id": "m2",
                "analysis_id": "a2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/agent/projects/p2/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let driver = JobLifecycleDriver::new(client_for(&server), false, crate::observability::metrics::test_metrics());
        let processed = driver.run_once(&FailingProcessor).await.unwrap();
        assert!(processed);
    }

    #[tokio::test]
    async fn auth_error_maps_401_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/agent/next-job"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let error = client.get_next_job().await.unwrap_err();
        assert!(matches!(error, WorkerError::AuthError(_)));
    }
}
