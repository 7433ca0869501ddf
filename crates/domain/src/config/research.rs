use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Research loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Hard cap on candidate pages fetched per turn.
    #[serde(default = "d_max_candidates")]
    pub max_candidates: usize,
    /// Research stops once the accepted-evidence coverage reaches this
    /// overall quality score.
    #[serde(default = "d_quality_target")]
    pub quality_target: f32,
    /// Queries issued per research plan.
    #[serde(default = "d_max_queries")]
    pub max_queries: usize,
    /// Per-page fetch timeout.
    #[serde(default = "d_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
    /// Minimum accepted sources before the coverage check may stop the loop.
    #[serde(default = "d_min_sources")]
    pub min_sources: usize,
    /// SERP endpoint consumed by the default search provider. Absent =
    /// searches fail with a clear error until a provider is wired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_endpoint: Option<String>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_candidates: d_max_candidates(),
            quality_target: d_quality_target(),
            max_queries: d_max_queries(),
            fetch_timeout_seconds: d_fetch_timeout(),
            min_sources: d_min_sources(),
            search_endpoint: None,
        }
    }
}

fn d_max_candidates() -> usize {
    8
}
fn d_quality_target() -> f32 {
    0.7
}
fn d_max_queries() -> usize {
    3
}
fn d_fetch_timeout() -> u64 {
    60
}
fn d_min_sources() -> usize {
    2
}
