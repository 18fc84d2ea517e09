//! The message handed to the worker.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use applygate_core::types::Priority;

/// Everything the worker needs to process one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    #[serde(rename = "jobId")]
    pub job_id: Uuid,
    #[serde(rename = "resumeUri")]
    pub resume_uri: String,
    #[serde(rename = "jdUrl")]
    pub jd_url: String,
    #[serde(rename = "modelProvider")]
    pub model_provider: String,
    #[serde(rename = "modelName")]
    pub model_name: String,
    #[serde(rename = "subjectId")]
    pub subject_id: Uuid,
    #[serde(rename = "traceId")]
    pub trace_id: String,
    pub priority: Priority,
}

impl JobDescriptor {
    /// Stable shard index for this job. Derived from the job id so every
    /// message of one job lands on the same queue, preserving per-job
    /// ordering through competing consumers.
    pub fn shard(&self, shards: u32) -> u32 {
        shard_for(self.job_id, shards)
    }

    /// Routing key under the `jobs.priority.{family}` scheme, with the
    /// shard as the final segment.
    pub fn routing_key(&self, shards: u32) -> String {
        format!(
            "jobs.priority.{}.{}",
            self.priority.queue_suffix(),
            self.shard(shards)
        )
    }
}

pub fn shard_for(job_id: Uuid, shards: u32) -> u32 {
    let bytes = job_id.as_bytes();
    let mut acc: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        acc ^= *b as u64;
        acc = acc.wrapping_mul(0x1_0000_01b3);
    }
    (acc % shards.max(1) as u64) as u32
}

/// Control message published on job cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelMessage {
    #[serde(rename = "jobId")]
    pub job_id: Uuid,
    #[serde(rename = "requestedBy")]
    pub requested_by: Uuid,
    #[serde(rename = "traceId")]
    pub trace_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(priority: Priority) -> JobDescriptor {
        JobDescriptor {
            job_id: Uuid::new_v4(),
            resume_uri: "uploads/u/r.pdf".into(),
            jd_url: "https://jobs.example.com/1".into(),
            model_provider: "openai".into(),
            model_name: "gpt-4o".into(),
            subject_id: Uuid::new_v4(),
            trace_id: "abc".into(),
            priority,
        }
    }

    #[test]
    fn routing_key_carries_family_and_shard() {
        let d = descriptor(Priority::Express);
        let key = d.routing_key(4);
        assert!(key.starts_with("jobs.priority.express."));
        let shard: u32 = key.rsplit('.').next().unwrap().parse().unwrap();
        assert!(shard < 4);
    }

    #[test]
    fn shard_is_stable_per_job() {
        let d = descriptor(Priority::Normal);
        assert_eq!(d.shard(4), d.shard(4));
        assert_eq!(shard_for(d.job_id, 4), d.shard(4));
    }

    #[test]
    fn single_shard_collapses_to_zero() {
        let d = descriptor(Priority::Low);
        assert_eq!(d.shard(1), 0);
    }

    #[test]
    fn wire_field_names() {
        let d = descriptor(Priority::High);
        let json = serde_json::to_value(&d).unwrap();
        assert!(json.get("jobId").is_some());
        assert!(json.get("resumeUri").is_some());
        assert_eq!(json["priority"], "HIGH");
    }
}
