use crate::cache::SharedCache;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of one image-generation job. Terminal states are never mutated
/// back to an in-flight state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed {
        image_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_id: Option<String>,
    },
    Failed {
        error: String,
    },
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed { .. } | JobState::Failed { .. } | JobState::TimedOut
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub prompt: String,
    pub epoch: u64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: JobState,
}

/// Generation-job status store backed by the shared cache so any server
/// instance can answer status polls. Records expire after `JOB_TTL_SECS`
/// rather than accumulating forever.
#[derive(Clone)]
pub struct JobStore {
    cache: SharedCache,
    ttl_secs: u64,
}

impl JobStore {
    pub fn new(cache: SharedCache) -> Self {
        Self {
            cache,
            ttl_secs: job_ttl_from_env(),
        }
    }

    fn key(id: &str) -> String {
        format!("genjob:{id}")
    }

    pub async fn create(&self, prompt: &str, epoch: u64) -> JobRecord {
        let record = JobRecord {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.to_string(),
            epoch,
            created_at: Utc::now(),
            state: JobState::Pending,
        };
        self.cache
            .set(&Self::key(&record.id), &record, self.ttl_secs)
            .await;
        record
    }

    pub async fn get(&self, id: &str) -> Option<JobRecord> {
        self.cache.get(&Self::key(id)).await
    }

    pub async fn transition(&self, id: &str, state: JobState) -> Option<JobRecord> {
        let mut record: JobRecord = self.cache.get(&Self::key(id)).await?;
        if record.state.is_terminal() {
            return Some(record);
        }
        record.state = state;
        self.cache.set(&Self::key(id), &record, self.ttl_secs).await;
        Some(record)
    }
}

fn job_ttl_from_env() -> u64 {
    std::env::var("JOB_TTL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(3600)
}
