use crate::{coordinator::BatchResult, status::ReporterStats};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: String,
    pub label: String,
    pub started: String,
    pub finished: String,
    pub max_concurrency: usize,
    pub status: ReporterStats,
    #[serde(flatten)]
    pub result: BatchResult,
}
