use crate::poller::{MOCKUP_POLL, PollError, PollPolicy, PollStatus, run_poll};
use crate::printful::mockups::{
    self, MockupFile, MockupTaskRequest, PrintPosition, PrintfileDescriptor,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Error)]
pub enum MockupError {
    #[error("product and variant must be selected before rendering")]
    MissingSelection,
    #[error("variant {0} has no printable placement")]
    NoPlacement(i64),
    #[error("mockup provider error: {0}")]
    Provider(String),
    #[error("mockup generation failed: {0}")]
    Failed(String),
    #[error("mockup timed out after {0} checks")]
    TimedOut(u32),
}

/// Provider seam for the two-step mockup flow so the orchestrator can be
/// exercised without the network.
#[async_trait]
pub trait MockupSource: Send + Sync {
    async fn printfiles(&self, product_id: i64) -> Result<PrintfileDescriptor, String>;
    async fn create_task(
        &self,
        product_id: i64,
        request: &MockupTaskRequest,
    ) -> Result<mockups::MockupTask, String>;
    async fn task_status(&self, task_key: &str) -> Result<mockups::MockupTaskStatus, String>;
}

pub struct PrintfulMockupSource;

#[async_trait]
impl MockupSource for PrintfulMockupSource {
    async fn printfiles(&self, product_id: i64) -> Result<PrintfileDescriptor, String> {
        mockups::fetch_printfiles(product_id)
            .await
            .map_err(|err| err.to_string())
    }

    async fn create_task(
        &self,
        product_id: i64,
        request: &MockupTaskRequest,
    ) -> Result<mockups::MockupTask, String> {
        mockups::create_mockup_task(product_id, request)
            .await
            .map_err(|err| err.to_string())
    }

    async fn task_status(&self, task_key: &str) -> Result<mockups::MockupTaskStatus, String> {
        mockups::fetch_mockup_task(task_key)
            .await
            .map_err(|err| err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockupJob {
    pub task_key: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMockup {
    pub url: String,
}

/// Resolves the placement the artwork goes on: the first placement listed
/// for the variant, rendered across the full printable area.
pub fn placement_for_variant(
    descriptor: &PrintfileDescriptor,
    variant_id: i64,
) -> Result<(String, PrintPosition), MockupError> {
    let entry = descriptor
        .variant_printfiles
        .iter()
        .find(|candidate| candidate.variant_id == variant_id)
        .ok_or(MockupError::NoPlacement(variant_id))?;
    let (placement, printfile_ref) = entry
        .placements
        .iter()
        .next()
        .ok_or(MockupError::NoPlacement(variant_id))?;
    let printfile_id = printfile_ref
        .as_i64()
        .ok_or(MockupError::NoPlacement(variant_id))?;
    let printfile = descriptor
        .printfiles
        .iter()
        .find(|candidate| candidate.printfile_id == printfile_id)
        .ok_or(MockupError::NoPlacement(variant_id))?;

    let position = PrintPosition {
        area_width: printfile.width,
        area_height: printfile.height,
        width: printfile.width,
        height: printfile.height,
        top: 0,
        left: 0,
    };
    Ok((placement.clone(), position))
}

/// Runs mockup render tasks with the same epoch discipline as image
/// generation: only the newest render request may publish a result.
pub struct MockupOrchestrator {
    source: Arc<dyn MockupSource>,
    epoch: AtomicU64,
    visible: Mutex<Option<(u64, RenderedMockup)>>,
}

impl MockupOrchestrator {
    pub fn new(source: Arc<dyn MockupSource>) -> Self {
        Self {
            source,
            epoch: AtomicU64::new(0),
            visible: Mutex::new(None),
        }
    }

    /// Looks up the printable area for the variant and submits a render
    /// task covering it edge to edge.
    pub async fn begin(
        &self,
        product_id: Option<i64>,
        variant_id: Option<i64>,
        image_url: &str,
    ) -> Result<MockupJob, MockupError> {
        let (Some(product_id), Some(variant_id)) = (product_id, variant_id) else {
            return Err(MockupError::MissingSelection);
        };

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let descriptor = self
            .source
            .printfiles(product_id)
            .await
            .map_err(MockupError::Provider)?;
        let (placement, position) = placement_for_variant(&descriptor, variant_id)?;

        let request = MockupTaskRequest {
            variant_ids: vec![variant_id],
            format: "jpg",
            files: vec![MockupFile {
                placement,
                image_url: image_url.to_string(),
                position,
            }],
        };
        let task = self
            .source
            .create_task(product_id, &request)
            .await
            .map_err(MockupError::Provider)?;
        info!(
            target = "printmuse.mockup",
            task_key = %task.task_key,
            variant_id,
            epoch,
            "mockup task submitted"
        );

        Ok(MockupJob {
            task_key: task.task_key,
            epoch,
        })
    }

    pub async fn await_result(&self, job: &MockupJob) -> Result<Option<RenderedMockup>, MockupError> {
        self.await_result_with(MOCKUP_POLL, job).await
    }

    pub async fn await_result_with(
        &self,
        policy: PollPolicy,
        job: &MockupJob,
    ) -> Result<Option<RenderedMockup>, MockupError> {
        let source = &self.source;
        let task_key = job.task_key.clone();

        let outcome = run_poll(policy, || {
            let task_key = task_key.clone();
            async move {
                let status = source.task_status(&task_key).await?;
                Ok(match status.status.as_str() {
                    "completed" => match status.mockups.first() {
                        Some(result) => PollStatus::Completed(RenderedMockup {
                            url: result.mockup_url.clone(),
                        }),
                        None => PollStatus::Failed("completed task carried no mockups".into()),
                    },
                    "failed" => PollStatus::Failed(
                        status
                            .error
                            .unwrap_or_else(|| "provider reported failure".into()),
                    ),
                    _ => PollStatus::Processing,
                })
            }
        })
        .await;

        match outcome {
            Ok(rendered) => Ok(self.apply_result(job.epoch, rendered).await),
            Err(PollError::TimedOut(attempts)) => {
                crate::metrics::poll_attempts("mockup", attempts);
                Err(MockupError::TimedOut(attempts))
            }
            Err(PollError::Failed(message)) => Err(MockupError::Failed(message)),
            Err(PollError::Provider(message)) => Err(MockupError::Provider(message)),
        }
    }

    async fn apply_result(&self, epoch: u64, rendered: RenderedMockup) -> Option<RenderedMockup> {
        let latest = self.epoch.load(Ordering::SeqCst);
        if epoch < latest {
            info!(
                target = "printmuse.mockup",
                epoch, latest, "discarding stale mockup result"
            );
            return None;
        }
        let mut guard = self.visible.lock().await;
        *guard = Some((epoch, rendered.clone()));
        Some(rendered)
    }

    pub async fn current(&self) -> Option<RenderedMockup> {
        self.visible
            .lock()
            .await
            .as_ref()
            .map(|(_, rendered)| rendered.clone())
    }

    /// Clears the published mockup, used when the buyer changes product,
    /// color, or size and the preview no longer matches.
    pub async fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.visible.lock().await;
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printful::mockups::{MockupResult, MockupTask, MockupTaskStatus};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 20,
        }
    }

    fn descriptor() -> PrintfileDescriptor {
        serde_json::from_str(
            r#"{
                "variant_printfiles": [
                    {"variant_id": 9001, "placements": {"front": 101, "back": 102}}
                ],
                "printfiles": [
                    {"printfile_id": 101, "width": 1800, "height": 2400},
                    {"printfile_id": 102, "width": 1200, "height": 1600}
                ]
            }"#,
        )
        .unwrap()
    }

    struct ScriptedSource {
        statuses: StdMutex<Vec<MockupTaskStatus>>,
    }

    impl ScriptedSource {
        fn new(statuses: Vec<MockupTaskStatus>) -> Self {
            Self {
                statuses: StdMutex::new(statuses),
            }
        }
    }

    #[async_trait]
    impl MockupSource for ScriptedSource {
        async fn printfiles(&self, _product_id: i64) -> Result<PrintfileDescriptor, String> {
            Ok(descriptor())
        }

        async fn create_task(
            &self,
            _product_id: i64,
            request: &MockupTaskRequest,
        ) -> Result<MockupTask, String> {
            assert_eq!(request.format, "jpg");
            Ok(MockupTask {
                task_key: "task-1".into(),
                status: "pending".into(),
            })
        }

        async fn task_status(&self, _task_key: &str) -> Result<MockupTaskStatus, String> {
            Ok(self.statuses.lock().unwrap().remove(0))
        }
    }

    fn status(name: &str, mockups: Vec<&str>) -> MockupTaskStatus {
        MockupTaskStatus {
            status: name.into(),
            mockups: mockups
                .into_iter()
                .map(|url| MockupResult {
                    mockup_url: url.into(),
                })
                .collect(),
            error: None,
        }
    }

    #[test]
    fn first_placement_fills_whole_print_area() {
        let (placement, position) = placement_for_variant(&descriptor(), 9001).unwrap();
        assert_eq!(placement, "front");
        assert_eq!(
            position,
            PrintPosition {
                area_width: 1800,
                area_height: 2400,
                width: 1800,
                height: 2400,
                top: 0,
                left: 0,
            }
        );
    }

    #[test]
    fn unknown_variant_has_no_placement() {
        let err = placement_for_variant(&descriptor(), 1).unwrap_err();
        assert!(matches!(err, MockupError::NoPlacement(1)));
    }

    #[tokio::test]
    async fn render_completes_after_pending_checks() {
        let source = Arc::new(ScriptedSource::new(vec![
            status("pending", vec![]),
            status("pending", vec![]),
            status("completed", vec!["https://cdn.example/mockup.jpg"]),
        ]));
        let orchestrator = MockupOrchestrator::new(source);

        let job = orchestrator
            .begin(Some(71), Some(9001), "https://cdn.example/art.png")
            .await
            .unwrap();
        let rendered = orchestrator
            .await_result_with(fast_policy(), &job)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rendered.url, "https://cdn.example/mockup.jpg");
        assert_eq!(orchestrator.current().await, Some(rendered));
    }

    #[tokio::test]
    async fn missing_selection_is_rejected_before_any_call() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let orchestrator = MockupOrchestrator::new(source);
        let err = orchestrator
            .begin(Some(71), None, "https://cdn.example/art.png")
            .await
            .unwrap_err();
        assert!(matches!(err, MockupError::MissingSelection));
    }

    #[tokio::test]
    async fn stale_render_result_is_discarded() {
        let source = Arc::new(ScriptedSource::new(vec![status(
            "completed",
            vec!["https://cdn.example/stale.jpg"],
        )]));
        let orchestrator = MockupOrchestrator::new(source);

        let first = orchestrator
            .begin(Some(71), Some(9001), "https://cdn.example/a.png")
            .await
            .unwrap();
        let _second = orchestrator
            .begin(Some(71), Some(9001), "https://cdn.example/b.png")
            .await
            .unwrap();

        let applied = orchestrator
            .await_result_with(fast_policy(), &first)
            .await
            .unwrap();
        assert!(applied.is_none());
        assert!(orchestrator.current().await.is_none());
    }

    #[tokio::test]
    async fn failed_task_surfaces_provider_reason() {
        let source = Arc::new(ScriptedSource::new(vec![MockupTaskStatus {
            status: "failed".into(),
            mockups: vec![],
            error: Some("printfile rejected".into()),
        }]));
        let orchestrator = MockupOrchestrator::new(source);

        let job = orchestrator
            .begin(Some(71), Some(9001), "https://cdn.example/art.png")
            .await
            .unwrap();
        let err = orchestrator
            .await_result_with(fast_policy(), &job)
            .await
            .unwrap_err();
        assert!(matches!(err, MockupError::Failed(message) if message == "printfile rejected"));
    }
}
