// src/replay.rs
//
// Recorded-detection replay. Stands in for the video decoder, the cheap
// line-occupancy detector and the expensive detector at once:
//
//   {
//     "source_name": "cam-3",
//     "frames": [
//       { "index": 120, "triggers": [ItemId, ...], "detections": [ItemId, ...] },
//       { "index": 121, "detections": null },      ← detector failure
//       ...
//     ]
//   }
//
// `triggers` become new FramedItems on that frame; `detections` are what the
// scripted analyzer returns if (and only if) the pipeline probes the frame.
// A missing `detections` field means "nothing found".

use crate::analyzer::ScriptedAnalyzer;
use crate::pipeline::confirmation::{ConfirmationPipeline, LineCount, StepState};
use crate::pipeline::metrics::MetricsSummary;
use crate::types::{Config, Frame, FramedItem, FramedItemRecord, ItemId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayLog {
    pub source_name: String,
    pub frames: Vec<ReplayFrame>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayFrame {
    pub index: i64,
    #[serde(default)]
    pub triggers: Vec<ItemId>,
    #[serde(default = "no_detections")]
    pub detections: Option<Vec<ItemId>>,
}

fn no_detections() -> Option<Vec<ItemId>> {
    Some(Vec::new())
}

impl ReplayLog {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading replay log {}", path.display()))?;
        Self::from_json(&contents).with_context(|| format!("parsing replay log {}", path.display()))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Analyzer serving this log's recorded detections
    pub fn analyzer(&self) -> ScriptedAnalyzer {
        let mut analyzer = ScriptedAnalyzer::new();
        for frame in &self.frames {
            match &frame.detections {
                Some(detections) => analyzer.set(frame.index, detections.clone()),
                None => analyzer.set_failure(frame.index),
            }
        }
        analyzer
    }
}

/// Every `*.json` file under `dir`, sorted by path
pub fn find_replay_logs(dir: &str) -> Result<Vec<PathBuf>> {
    let mut logs = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
            logs.push(path.to_path_buf());
        }
    }

    logs.sort();
    info!("Found {} replay log(s) in {}", logs.len(), dir);
    Ok(logs)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaySummary {
    pub source_name: String,
    pub frames: usize,
    pub confirmed_steps: usize,
    pub exhausted_steps: usize,
    pub abandoned_steps: usize,
    pub confirmations: usize,
    pub items: usize,
    pub analyzer_calls: usize,
}

#[derive(Serialize)]
struct ReplayFooter<'a> {
    summary: &'a ReplaySummary,
    metrics: MetricsSummary,
    line_counts: &'a BTreeMap<usize, LineCount>,
}

/// Drive one log through a fresh pipeline, writing JSON lines to `out`:
/// every event as it happens, then the item history, then a footer with the
/// summary, metrics and per-line counts.
pub fn run_replay<W: Write>(log: &ReplayLog, config: &Config, out: &mut W) -> Result<ReplaySummary> {
    let mut pipeline = ConfirmationPipeline::new(config, log.analyzer())?;
    let mut items: Vec<FramedItem> = Vec::new();
    let mut summary = ReplaySummary {
        source_name: log.source_name.clone(),
        ..Default::default()
    };

    for recorded in &log.frames {
        let frame = Arc::new(Frame::new(recorded.index, log.source_name.clone(), Vec::new()));
        for trigger in &recorded.triggers {
            items.push(FramedItem::new(frame.clone(), trigger.clone()));
        }

        let outcome = pipeline
            .process_frame(frame, &mut items)
            .with_context(|| format!("{}: frame {}", log.source_name, recorded.index))?;
        summary.frames += 1;
        summary.confirmations += outcome.confirmations;
        match outcome.state {
            StepState::Confirmed => summary.confirmed_steps += 1,
            StepState::Exhausted => summary.exhausted_steps += 1,
            StepState::Abandoned => summary.abandoned_steps += 1,
            StepState::Idle | StepState::Filling => {}
        }
        if outcome.probes > 0 {
            debug!(
                "frame {}: {:?} after {} probe(s)",
                recorded.index, outcome.state, outcome.probes
            );
        }

        for event in pipeline.drain_events() {
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
        }
    }

    for item in &items {
        let record = FramedItemRecord::from(item);
        writeln!(out, "{}", serde_json::json!({ "item": record }))?;
    }

    summary.items = items.len();
    summary.analyzer_calls = pipeline.analyzer().calls().len();
    let footer = ReplayFooter {
        summary: &summary,
        metrics: pipeline.metrics().summary(),
        line_counts: pipeline.line_counts(),
    };
    writeln!(out, "{}", serde_json::to_string(&footer)?)?;
    out.flush()?;

    Ok(summary)
}

/// Replay `path` and write `<output_dir>/<stem>_crossings.jsonl`
pub fn replay_file(path: &Path, config: &Config) -> Result<ReplaySummary> {
    let log = ReplayLog::load(path)?;

    fs::create_dir_all(&config.replay.output_dir)
        .with_context(|| format!("creating {}", config.replay.output_dir))?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("replay");
    let out_path = Path::new(&config.replay.output_dir).join(format!("{}_crossings.jsonl", stem));
    let file = fs::File::create(&out_path)
        .with_context(|| format!("creating {}", out_path.display()))?;
    info!("💾 Results will be written to: {}", out_path.display());

    let mut writer = std::io::BufWriter::new(file);
    run_replay(&log, config, &mut writer)
}
