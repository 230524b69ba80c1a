use serde::{Deserialize, Serialize};

use super::request::Tool;

/// Tool-specific numbers reported alongside a successful job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_reduction: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl TransformStats {
    pub fn pages(page_count: usize) -> Self {
        Self {
            page_count: Some(page_count),
            ..Self::default()
        }
    }

    pub fn split(split_count: usize) -> Self {
        Self {
            split_count: Some(split_count),
            ..Self::default()
        }
    }

    pub fn compression(original_size: u64, compressed_size: u64, strategy: &str) -> Self {
        Self {
            original_size: Some(original_size),
            compressed_size: Some(compressed_size),
            compression_ratio: Some(compression_ratio(original_size, compressed_size)),
            size_reduction: Some(original_size as i64 - compressed_size as i64),
            strategy: Some(strategy.to_string()),
            ..Self::default()
        }
    }
}

/// `(original - compressed) / original * 100`; zero or negative is a valid result.
pub fn compression_ratio(original_size: u64, compressed_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    (original_size as f64 - compressed_size as f64) / original_size as f64 * 100.0
}

/// Body returned by every successful processing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub success: bool,
    pub job_id: String,
    pub tool: Tool,
    pub filename: String,
    pub message: String,
    pub download_url: String,
    #[serde(flatten)]
    pub stats: TransformStats,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
    pub compression_strategy: String,
}
