use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregation::{AggregatedResult, ConsolidatedSummary};

/// Everything one query produced, ready for persistence or display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryReport {
    pub request_id: Uuid,
    /// `XX.XXX.XXX/XXXX-XX`
    pub taxpayer: String,
    pub result: AggregatedResult,
    pub summary: ConsolidatedSummary,
    pub elapsed_ms: u64,
}

impl QueryReport {
    pub fn new(result: AggregatedResult, summary: ConsolidatedSummary, elapsed_ms: u64) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            taxpayer: result.taxpayer_id.formatted(),
            result,
            summary,
            elapsed_ms,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
