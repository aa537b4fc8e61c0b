//! Invocation boundary for many files.
//!
//! Every file gets its own authenticate-then-upload cycle. Cycles may run
//! concurrently because they share no session state; the transport's connection
//! pool is the only shared resource. Retry and continue-on-failure policy live
//! here, never inside the protocol core.

use serde::Serialize;
use std::cmp::min;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};

use crate::client::{CycleState, HttpTransport, MetadataValue, UploadCycle, UploadPayload, UploadResult};
use crate::config::CredentialSource;
use crate::errors::{AppResult, ErrorKind, Step};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(120),
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay.as_millis() as f64
            * self
                .exponential_base
                .powi(attempt.saturating_sub(1) as i32);

        let delay = Duration::from_millis(delay_ms as u64);
        min(delay, self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub continue_on_fail: bool,
    pub retry: RetryConfig,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            continue_on_fail: false,
            retry: RetryConfig::default(),
        }
    }
}

/// A book on disk and the metadata to upload with it
#[derive(Debug, Clone)]
pub struct BookFile {
    pub path: PathBuf,
    pub mime_type: Option<String>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl BookFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mime_type: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn label(&self) -> String {
        self.path.display().to_string()
    }

    pub async fn load(&self) -> AppResult<UploadPayload> {
        let mut payload = UploadPayload::from_file(&self.path).await?;
        if let Some(mime_type) = &self.mime_type {
            payload = payload.with_mime_type(mime_type.clone());
        }
        for (field, value) in &self.metadata {
            payload.set_metadata(field, value.clone());
        }
        Ok(payload)
    }
}

#[derive(Debug)]
pub struct ItemOutcome {
    pub index: usize,
    pub label: String,
    pub attempts: u32,
    pub final_state: CycleState,
    pub result: AppResult<UploadResult>,
}

/// One line of batch output
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub file: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub state: String,
    pub attempts: u32,
}

impl From<&ItemOutcome> for ItemReport {
    fn from(outcome: &ItemOutcome) -> Self {
        match &outcome.result {
            Ok(result) => ItemReport {
                file: outcome.label.clone(),
                success: result.success,
                location: result.location.clone(),
                error: None,
                kind: None,
                step: None,
                status: None,
                state: outcome.final_state.to_string(),
                attempts: outcome.attempts,
            },
            Err(e) => ItemReport {
                file: outcome.label.clone(),
                success: false,
                location: None,
                error: Some(e.to_string()),
                kind: Some(e.kind()),
                step: e.step(),
                status: e.status(),
                state: outcome.final_state.to_string(),
                attempts: outcome.attempts,
            },
        }
    }
}

pub struct BatchUploader<T: HttpTransport + ?Sized, C: CredentialSource + ?Sized> {
    transport: Arc<T>,
    credentials: Arc<C>,
    options: BatchOptions,
}

impl<T, C> BatchUploader<T, C>
where
    T: HttpTransport + ?Sized + 'static,
    C: CredentialSource + ?Sized + 'static,
{
    pub fn new(transport: Arc<T>, credentials: Arc<C>, options: BatchOptions) -> Self {
        Self {
            transport,
            credentials,
            options,
        }
    }

    /// Uploads every file, returning outcomes in input order.
    ///
    /// Without `continue_on_fail`, no new file is started after the first
    /// failure; cycles already in flight still finish and are reported.
    pub async fn run(&self, files: Vec<BookFile>) -> Vec<ItemOutcome> {
        let total = files.len();
        let concurrency = self.options.concurrency.max(1);
        let mut pending = files.into_iter().enumerate();
        let mut in_flight = JoinSet::new();
        let mut outcomes = Vec::with_capacity(total);
        let mut halted = false;

        log::info!(
            "Uploading {} files ({} at a time)",
            total,
            concurrency
        );

        loop {
            while !halted && in_flight.len() < concurrency {
                let Some((index, file)) = pending.next() else {
                    break;
                };
                let transport = Arc::clone(&self.transport);
                let credentials = Arc::clone(&self.credentials);
                let retry = self.options.retry.clone();

                in_flight.spawn(async move {
                    upload_file(index, file, transport, credentials, retry).await
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok(outcome) => {
                    if let Err(e) = &outcome.result {
                        log::error!("Upload of {} failed: {}", outcome.label, e);
                        if !self.options.continue_on_fail && !halted {
                            log::warn!("Stopping batch after first failure");
                            halted = true;
                        }
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    log::error!("Upload task ended abnormally: {}", e);
                    if !self.options.continue_on_fail {
                        halted = true;
                    }
                }
            }
        }

        outcomes.sort_by_key(|outcome| outcome.index);

        let succeeded = outcomes
            .iter()
            .filter(|o| matches!(&o.result, Ok(result) if result.success))
            .count();
        log::info!(
            "Batch finished: {} of {} files uploaded, {} not attempted",
            succeeded,
            total,
            total - outcomes.len()
        );

        outcomes
    }
}

async fn upload_file<T, C>(
    index: usize,
    file: BookFile,
    transport: Arc<T>,
    credentials: Arc<C>,
    retry: RetryConfig,
) -> ItemOutcome
where
    T: HttpTransport + ?Sized,
    C: CredentialSource + ?Sized,
{
    let label = file.label();

    let payload = match file.load().await {
        Ok(payload) => payload,
        Err(e) => {
            let mut final_state = CycleState::Unauthenticated;
            final_state.fail(&e);
            return ItemOutcome {
                index,
                label,
                attempts: 0,
                final_state,
                result: Err(e),
            };
        }
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        let (final_state, result) = upload_once(transport.as_ref(), credentials.as_ref(), &payload).await;

        match result {
            Err(e) if e.is_retryable() && attempt <= retry.max_retries => {
                let delay = retry.backoff_delay(attempt);
                log::warn!(
                    "Upload attempt {} for {} failed, retrying in {:?}: {}",
                    attempt,
                    label,
                    delay,
                    e
                );
                sleep(delay).await;
            }
            result => {
                return ItemOutcome {
                    index,
                    label,
                    attempts: attempt,
                    final_state,
                    result,
                }
            }
        }
    }
}

async fn upload_once<T, C>(
    transport: &T,
    credentials: &C,
    payload: &UploadPayload,
) -> (CycleState, AppResult<UploadResult>)
where
    T: HttpTransport + ?Sized,
    C: CredentialSource + ?Sized,
{
    let mut cycle = UploadCycle::new(transport);

    let credentials = match credentials.credentials() {
        Ok(credentials) => credentials,
        Err(e) => {
            let mut state = cycle.state();
            state.fail(&e);
            return (state, Err(e));
        }
    };

    let result = cycle.run(&credentials, payload).await;
    (cycle.state(), result)
}
