use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

/// Which tool produced a set of run metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    DomainScan,
    Footprint,
    Shorten,
    LoadTest,
    Crawl,
}

/// Unified run metrics, saved as scan_metrics.json next to a tool's output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub run_id: String,
    pub tool: ToolKind,
    pub target: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub counters: BTreeMap<String, u64>,
    /// Stage name -> wall time in milliseconds
    pub stage_durations_ms: BTreeMap<String, u64>,

    #[serde(skip)]
    open_stages: BTreeMap<String, Instant>,
}

impl RunMetrics {
    pub fn new(tool: ToolKind, target: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            tool,
            target: target.into(),
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: 0.0,
            counters: BTreeMap::new(),
            stage_durations_ms: BTreeMap::new(),
            open_stages: BTreeMap::new(),
        }
    }

    pub fn begin_stage(&mut self, stage: &str) {
        self.open_stages.insert(stage.to_string(), Instant::now());
    }

    /// Close a stage opened with `begin_stage`; unknown stages are ignored
    pub fn end_stage(&mut self, stage: &str) {
        if let Some(started) = self.open_stages.remove(stage) {
            let elapsed = started.elapsed().as_millis() as u64;
            self.stage_durations_ms.insert(stage.to_string(), elapsed);
        }
    }

    pub fn incr(&mut self, counter: &str, by: u64) {
        *self.counters.entry(counter.to_string()).or_insert(0) += by;
    }

    pub fn set(&mut self, counter: &str, value: u64) {
        self.counters.insert(counter.to_string(), value);
    }

    pub fn counter(&self, counter: &str) -> u64 {
        self.counters.get(counter).copied().unwrap_or(0)
    }

    /// Stamp the end time and compute the duration
    pub fn finalize(&mut self) {
        let end = Utc::now();
        self.end_time = Some(end);
        self.duration_seconds = (end - self.start_time).num_milliseconds() as f64 / 1000.0;
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Run ID: {}\nTool: {:?}\nTarget: {}\nDuration: {:.2}s\n",
            self.run_id, self.tool, self.target, self.duration_seconds
        );

        if !self.counters.is_empty() {
            summary.push_str("Counters:\n");
            for (name, value) in &self.counters {
                summary.push_str(&format!("  - {}: {}\n", name, value));
            }
        }

        if !self.stage_durations_ms.is_empty() {
            summary.push_str("Stages:\n");
            for (name, ms) in &self.stage_durations_ms {
                summary.push_str(&format!("  - {}: {}ms\n", name, ms));
            }
        }

        summary
    }
}
