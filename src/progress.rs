// progress.rs - Run progress events for tools that own an output directory
// Purpose: Append one JSON line per event to progress.jsonl and keep
//          current_status.json pointing at the latest one, so another
//          process can follow a long domain scan or crawl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const PROGRESS_FILE: &str = "progress.jsonl";
pub const STATUS_FILE: &str = "current_status.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    Started,
    StageStarted { stage: String },
    StageDone { stage: String },
    StageFailed { stage: String, error: String },
    Collected { what: String, count: usize },
    Finding { severity: String, title: String },
    Finished,
}

/// One line of progress.jsonl
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub at: DateTime<Utc>,
    pub run_id: String,
    pub target: String,
    pub percent: f32,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Snapshot written to current_status.json after every event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub run_id: String,
    pub target: String,
    pub percent: f32,
    pub last_event: RunEvent,
    pub updated_at: DateTime<Utc>,
    pub event_count: usize,
    pub failed_stages: Vec<String>,
}

#[derive(Default)]
struct Log {
    events: Vec<ProgressEvent>,
    failed_stages: Vec<String>,
}

#[derive(Clone)]
pub struct ProgressTracker {
    run_id: String,
    target: String,
    dir: PathBuf,
    log: Arc<Mutex<Log>>,
}

impl ProgressTracker {
    pub fn new(run_id: String, target: String, dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, dir = %dir.display(), "progress directory unavailable");
        }
        Self {
            run_id,
            target,
            dir,
            log: Arc::new(Mutex::new(Log::default())),
        }
    }

    fn emit(&self, event: RunEvent, percent: f32) {
        let record = ProgressEvent {
            at: Utc::now(),
            run_id: self.run_id.clone(),
            target: self.target.clone(),
            percent,
            event,
        };

        let snapshot = match self.log.lock() {
            Ok(mut log) => {
                if let RunEvent::StageFailed { stage, .. } = &record.event {
                    log.failed_stages.push(stage.clone());
                }
                log.events.push(record.clone());
                StatusSnapshot {
                    run_id: self.run_id.clone(),
                    target: self.target.clone(),
                    percent,
                    last_event: record.event.clone(),
                    updated_at: record.at,
                    event_count: log.events.len(),
                    failed_stages: log.failed_stages.clone(),
                }
            }
            Err(_) => return,
        };

        self.append_line(&record);
        self.write_snapshot(&snapshot);
    }

    fn append_line(&self, record: &ProgressEvent) {
        let path = self.dir.join(PROGRESS_FILE);
        let result = serde_json::to_string(record).map_err(std::io::Error::other).and_then(|line| {
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut f| writeln!(f, "{}", line))
        });
        if let Err(e) = result {
            tracing::debug!(error = %e, file = %path.display(), "progress event not written");
        }
    }

    fn write_snapshot(&self, snapshot: &StatusSnapshot) {
        let path = self.dir.join(STATUS_FILE);
        let result = serde_json::to_string_pretty(snapshot)
            .map_err(std::io::Error::other)
            .and_then(|json| fs::write(&path, json));
        if let Err(e) = result {
            tracing::debug!(error = %e, file = %path.display(), "status snapshot not written");
        }
    }

    pub fn scan_started(&self) {
        self.emit(RunEvent::Started, 0.0);
    }

    pub fn stage_started(&self, stage: &str, percent: f32) {
        self.emit(RunEvent::StageStarted { stage: stage.into() }, percent);
    }

    pub fn stage_completed(&self, stage: &str, percent: f32) {
        self.emit(RunEvent::StageDone { stage: stage.into() }, percent);
    }

    pub fn stage_failed(&self, stage: &str, error: &str, percent: f32) {
        self.emit(
            RunEvent::StageFailed {
                stage: stage.into(),
                error: error.into(),
            },
            percent,
        );
    }

    pub fn data_found(&self, what: &str, count: usize, percent: f32) {
        self.emit(RunEvent::Collected { what: what.into(), count }, percent);
    }

    pub fn finding(&self, severity: &str, title: &str, percent: f32) {
        self.emit(
            RunEvent::Finding {
                severity: severity.into(),
                title: title.into(),
            },
            percent,
        );
    }

    pub fn scan_completed(&self) {
        self.emit(RunEvent::Finished, 100.0);
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.log.lock().map(|log| log.events.clone()).unwrap_or_default()
    }

    /// Events from a progress.jsonl file; unparsable lines are dropped
    pub fn read_events_from_file(path: &Path) -> Vec<ProgressEvent> {
        let Ok(content) = fs::read_to_string(path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_persisted_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProgressTracker::new("run-1".into(), "example.com".into(), dir.path().to_path_buf());

        tracker.scan_started();
        tracker.stage_started("dns", 10.0);
        tracker.data_found("records", 4, 20.0);
        tracker.stage_failed("whois", "timeout", 25.0);
        tracker.scan_completed();

        let events = ProgressTracker::read_events_from_file(&dir.path().join(PROGRESS_FILE));
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].event, RunEvent::Started);
        assert_eq!(
            events[3].event,
            RunEvent::StageFailed { stage: "whois".into(), error: "timeout".into() }
        );
        assert_eq!(tracker.events().len(), 5);

        let status: StatusSnapshot =
            serde_json::from_str(&fs::read_to_string(dir.path().join(STATUS_FILE)).unwrap()).unwrap();
        assert_eq!(status.event_count, 5);
        assert_eq!(status.percent, 100.0);
        assert_eq!(status.failed_stages, vec!["whois"]);
        assert_eq!(status.last_event, RunEvent::Finished);
    }

    #[test]
    fn test_line_format_is_flat() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProgressTracker::new("run-2".into(), "t".into(), dir.path().to_path_buf());
        tracker.data_found("pages", 3, 50.0);
        let line = fs::read_to_string(dir.path().join(PROGRESS_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["kind"], "collected");
        assert_eq!(value["count"], 3);
        assert_eq!(value["run_id"], "run-2");
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(PROGRESS_FILE);
        fs::write(&file, "not json\n{\"also\": \"wrong\"}\n").unwrap();
        assert!(ProgressTracker::read_events_from_file(&file).is_empty());
    }
}
