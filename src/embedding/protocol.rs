//! Messages exchanged between the embedding processor and its workers.
//!
//! Both enums are serde-tagged so the same protocol can be carried as JSON
//! to an out-of-process worker.

use serde::{Deserialize, Serialize};

use crate::analysis::quality::QualityMetrics;
use crate::db::PhotoRecord;

/// Processor to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    /// Load the model; answered by `ModelReady` or `InitFailed`.
    Init,
    SetWorkerId {
        #[serde(rename = "workerId")]
        worker_id: usize,
    },
    /// One unit of work.
    Process { photo: PhotoRecord },
    Shutdown,
}

/// Worker to processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResponse {
    ModelReady,
    InitFailed {
        error: String,
    },
    Complete {
        file_id: String,
        embedding: Vec<f32>,
        #[serde(rename = "qualityMetrics")]
        quality_metrics: Option<QualityMetrics>,
    },
    Error {
        file_id: String,
        error: String,
    },
}

/// A response tagged with the slot it came from and the pool generation that
/// slot belongs to.
#[derive(Debug, Clone)]
pub struct WorkerEnvelope {
    pub worker_id: usize,
    pub generation: u64,
    pub response: WorkerResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let value = serde_json::to_value(WorkerRequest::SetWorkerId { worker_id: 2 }).unwrap();
        assert_eq!(value, json!({"type": "setWorkerId", "workerId": 2}));
        assert_eq!(
            serde_json::to_value(WorkerRequest::Init).unwrap(),
            json!({"type": "init"})
        );
    }

    #[test]
    fn test_response_wire_format() {
        let value = serde_json::to_value(WorkerResponse::ModelReady).unwrap();
        assert_eq!(value, json!({"status": "model_ready"}));

        let parsed: WorkerResponse = serde_json::from_value(json!({
            "status": "complete",
            "file_id": "abc",
            "embedding": [0.5, 0.25],
            "qualityMetrics": null
        }))
        .unwrap();
        assert_eq!(
            parsed,
            WorkerResponse::Complete {
                file_id: "abc".to_string(),
                embedding: vec![0.5, 0.25],
                quality_metrics: None,
            }
        );

        let parsed: WorkerResponse =
            serde_json::from_value(json!({"status": "error", "file_id": "x", "error": "boom"}))
                .unwrap();
        assert!(matches!(parsed, WorkerResponse::Error { .. }));
    }
}
