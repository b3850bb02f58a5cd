use crate::imagegen::{GeneratedImage, ImageGenerator};
use crate::jobs::{JobRecord, JobState, JobStore};
use crate::poller::{GENERATION_POLL, PollError, PollPolicy, PollStatus, run_poll};
use crate::storage::{StorageClient, persist_or_passthrough};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("prompt must not be blank")]
    EmptyPrompt,
    #[error("job not found: {0}")]
    UnknownJob(String),
    #[error("generation failed: {0}")]
    Failed(String),
    #[error("generation timed out after {0} checks")]
    TimedOut(u32),
}

/// The image the buyer last confirmed, pinned to the request epoch that
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmedImage {
    pub job_id: String,
    pub url: String,
    pub image_id: Option<String>,
}

/// Drives prompt-to-image jobs. Each start (or restart) bumps an epoch
/// counter; results carrying an older epoch are discarded so a newer
/// request can never be overwritten by a slower, earlier one.
pub struct GenerationOrchestrator {
    store: JobStore,
    provider: Arc<dyn ImageGenerator>,
    storage: Option<StorageClient>,
    epoch: AtomicU64,
    visible: Mutex<Option<(u64, ConfirmedImage)>>,
}

impl GenerationOrchestrator {
    pub fn new(store: JobStore, provider: Arc<dyn ImageGenerator>) -> Self {
        Self {
            store,
            provider,
            storage: None,
            epoch: AtomicU64::new(0),
            visible: Mutex::new(None),
        }
    }

    /// Provider image URLs can expire; with storage configured the image is
    /// copied into our bucket before the job completes.
    pub fn with_storage(mut self, storage: Option<StorageClient>) -> Self {
        self.storage = storage;
        self
    }

    /// Kicks off a new generation job. The provider call runs on its own
    /// task so the request returns the job id immediately.
    pub async fn start(self: &Arc<Self>, prompt: &str) -> Result<JobRecord, GenerationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let record = self.store.create(prompt, epoch).await;
        info!(
            target = "printmuse.generation",
            job_id = %record.id,
            epoch,
            "generation job started"
        );

        let orchestrator = Arc::clone(self);
        let job_id = record.id.clone();
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            orchestrator.run_job(job_id, prompt).await;
        });

        Ok(record)
    }

    async fn run_job(&self, job_id: String, prompt: String) {
        if self
            .store
            .transition(&job_id, JobState::Processing)
            .await
            .is_none()
        {
            error!(
                target = "printmuse.generation",
                job_id, "job record vanished before processing"
            );
            return;
        }

        let next = match self.provider.generate(&prompt).await {
            Ok(GeneratedImage { url, image_id }) => {
                let image_url = persist_or_passthrough(self.storage.as_ref(), &url).await;
                JobState::Completed {
                    image_url,
                    image_id,
                }
            }
            Err(err) => {
                error!(
                    target = "printmuse.generation",
                    job_id, error = %err,
                    "image generation failed"
                );
                JobState::Failed {
                    error: err.to_string(),
                }
            }
        };

        if self.store.transition(&job_id, next).await.is_none() {
            error!(
                target = "printmuse.generation",
                job_id, "job record vanished before outcome was recorded"
            );
        }
    }

    pub async fn status(&self, job_id: &str) -> Result<JobRecord, GenerationError> {
        self.store
            .get(job_id)
            .await
            .ok_or_else(|| GenerationError::UnknownJob(job_id.to_string()))
    }

    /// Polls the job to a terminal state, then applies the result only if
    /// no newer epoch has started since. Returns None when the result was
    /// stale and therefore dropped.
    pub async fn await_result(
        &self,
        job_id: &str,
    ) -> Result<Option<ConfirmedImage>, GenerationError> {
        self.await_result_with(GENERATION_POLL, job_id).await
    }

    pub async fn await_result_with(
        &self,
        policy: PollPolicy,
        job_id: &str,
    ) -> Result<Option<ConfirmedImage>, GenerationError> {
        let record = self.status(job_id).await?;
        let store = &self.store;
        let id = job_id.to_string();

        let outcome = run_poll(policy, || {
            let id = id.clone();
            async move {
                let current = store
                    .get(&id)
                    .await
                    .ok_or_else(|| format!("job not found: {id}"))?;
                Ok(match current.state {
                    JobState::Pending => PollStatus::Pending,
                    JobState::Processing => PollStatus::Processing,
                    JobState::Completed {
                        image_url,
                        image_id,
                    } => PollStatus::Completed(ConfirmedImage {
                        job_id: id.clone(),
                        url: image_url,
                        image_id,
                    }),
                    JobState::Failed { error } => PollStatus::Failed(error),
                    JobState::TimedOut => PollStatus::Failed("timed out".into()),
                })
            }
        })
        .await;

        match outcome {
            Ok(image) => Ok(self.apply_result(record.epoch, image).await),
            Err(PollError::TimedOut(attempts)) => {
                crate::metrics::poll_attempts("generation", attempts);
                self.store.transition(job_id, JobState::TimedOut).await;
                Err(GenerationError::TimedOut(attempts))
            }
            Err(PollError::Failed(message)) | Err(PollError::Provider(message)) => {
                Err(GenerationError::Failed(message))
            }
        }
    }

    async fn apply_result(&self, epoch: u64, image: ConfirmedImage) -> Option<ConfirmedImage> {
        let latest = self.epoch.load(Ordering::SeqCst);
        if epoch < latest {
            info!(
                target = "printmuse.generation",
                job_id = %image.job_id,
                epoch,
                latest,
                "discarding stale generation result"
            );
            return None;
        }
        let mut guard = self.visible.lock().await;
        *guard = Some((epoch, image.clone()));
        Some(image)
    }

    /// The image currently confirmed for the wizard, if any.
    pub async fn confirmed(&self) -> Option<ConfirmedImage> {
        self.visible
            .lock()
            .await
            .as_ref()
            .map(|(_, image)| image.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedCache;
    use crate::imagegen::{ImageGenError, fake::FakeImageGenerator};
    use async_trait::async_trait;
    use std::time::Duration;

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 50,
        }
    }

    fn orchestrator(provider: Arc<dyn ImageGenerator>) -> Arc<GenerationOrchestrator> {
        let store = JobStore::new(SharedCache::in_memory());
        Arc::new(GenerationOrchestrator::new(store, provider))
    }

    struct StalledProvider;

    #[async_trait]
    impl ImageGenerator for StalledProvider {
        async fn generate(&self, _prompt: &str) -> Result<GeneratedImage, ImageGenError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("stalled provider never completes")
        }
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected() {
        let orchestrator = orchestrator(Arc::new(FakeImageGenerator::default()));
        let err = orchestrator.start("   ").await.unwrap_err();
        assert!(matches!(err, GenerationError::EmptyPrompt));
    }

    #[tokio::test]
    async fn job_completes_and_becomes_visible() {
        let orchestrator = orchestrator(Arc::new(FakeImageGenerator::default()));
        let record = orchestrator.start("sunset over mountains").await.unwrap();

        let image = orchestrator
            .await_result_with(fast_policy(), &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(image.job_id, record.id);
        assert!(image.url.starts_with("https://"));
        assert_eq!(orchestrator.confirmed().await, Some(image));
    }

    #[tokio::test]
    async fn stale_epoch_result_is_discarded() {
        let orchestrator = orchestrator(Arc::new(StalledProvider));
        let first = orchestrator.start("first prompt").await.unwrap();
        let _second = orchestrator.start("second prompt").await.unwrap();

        // The first job finishes late, after the second request superseded it.
        orchestrator
            .store
            .transition(
                &first.id,
                JobState::Completed {
                    image_url: "https://images.printmuse.dev/late.png".into(),
                    image_id: None,
                },
            )
            .await
            .unwrap();

        let applied = orchestrator
            .await_result_with(fast_policy(), &first.id)
            .await
            .unwrap();
        assert!(applied.is_none());
        assert!(orchestrator.confirmed().await.is_none());
    }

    #[tokio::test]
    async fn unknown_job_reports_not_found() {
        let orchestrator = orchestrator(Arc::new(FakeImageGenerator::default()));
        let err = orchestrator.status("nope").await.unwrap_err();
        assert!(matches!(err, GenerationError::UnknownJob(_)));
    }
}
