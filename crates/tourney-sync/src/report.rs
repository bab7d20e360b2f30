//! Per-run report artifacts: JSON summary, markdown brief, parquet snapshot + manifest.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tourney_core::TournamentRecord;

use crate::ReconcileSummary;

pub const SUMMARY_FILE: &str = "summary.json";
pub const BRIEF_FILE: &str = "reconcile_brief.md";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// One reconciliation run found under the reports root.
#[derive(Debug, Clone, Serialize)]
pub struct RunReportRow {
    pub run_id: String,
    pub matched: usize,
    pub fixed: usize,
    pub duplicates_removed: usize,
    pub failures: usize,
    pub has_parquet_manifest: bool,
}

pub async fn write_reports(
    reports_root: &Path,
    summary: &ReconcileSummary,
    records: &[TournamentRecord],
) -> Result<PathBuf> {
    let run_dir = reports_root.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let summary_json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(run_dir.join(SUMMARY_FILE), summary_json)
        .await
        .with_context(|| format!("writing {SUMMARY_FILE}"))?;

    fs::write(run_dir.join(BRIEF_FILE), render_brief(summary))
        .await
        .with_context(|| format!("writing {BRIEF_FILE}"))?;

    export_parquet_snapshot(&run_dir, records).await?;
    Ok(run_dir)
}

pub fn render_brief(summary: &ReconcileSummary) -> String {
    let mut lines = vec![
        "# Tournament Reconciliation Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Approved applications: {}", summary.source_records),
        format!("- Local records: {}", summary.local_records),
        format!("- Matched: {}", summary.matched),
        format!("- Fixed: {}", summary.fixed),
        format!("- Duplicates removed: {}", summary.duplicates_removed),
        format!("- Promoted: {}", summary.promoted),
        format!("- Ingested: {}", summary.ingested),
        String::new(),
    ];

    lines.push("## Applications without a local record".to_string());
    if summary.unmatched_source_records.is_empty() {
        lines.push("- none".to_string());
    }
    for app in &summary.unmatched_source_records {
        lines.push(format!("- {} ({})", app.title, app.application_id));
    }
    lines.push(String::new());

    lines.push("## Local records without an application".to_string());
    if summary.local_orphans.is_empty() {
        lines.push("- none".to_string());
    }
    for orphan in &summary.local_orphans {
        lines.push(format!(
            "- {} (`{}`, source: {})",
            orphan.name,
            orphan.record_id,
            orphan.source_application_id.as_deref().unwrap_or("none")
        ));
    }
    lines.push(String::new());

    lines.push("## Failed writes".to_string());
    if summary.failures.is_empty() {
        lines.push("- none".to_string());
    }
    for failure in &summary.failures {
        lines.push(format!(
            "- `{}` {:?}: {}",
            failure.record_id, failure.operation, failure.message
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

async fn export_parquet_snapshot(run_dir: &Path, records: &[TournamentRecord]) -> Result<PathBuf> {
    let snapshot_dir = run_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let tournaments_path = snapshot_dir.join("tournaments.parquet");
    write_tournaments_parquet(&tournaments_path, records)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![manifest_entry("tournaments", run_dir, &tournaments_path)?],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_tournaments_parquet(path: &Path, records: &[TournamentRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("id", DataType::Utf8, false),
        ArrowField::new("name", DataType::Utf8, false),
        ArrowField::new("source_application_id", DataType::Utf8, true),
        ArrowField::new("managed_by_source", DataType::Boolean, false),
        ArrowField::new("visibility_state", DataType::Utf8, false),
        ArrowField::new("start_date", DataType::Utf8, true),
        ArrowField::new("promoted_at", DataType::Utf8, true),
    ]));

    let ids = StringArray::from(records.iter().map(|r| Some(r.id.to_string())).collect::<Vec<_>>());
    let names = StringArray::from(records.iter().map(|r| Some(r.name.as_str())).collect::<Vec<_>>());
    let source_ids = StringArray::from(records.iter().map(|r| r.source_id()).collect::<Vec<_>>());
    let managed = BooleanArray::from(records.iter().map(|r| r.managed_by_source).collect::<Vec<_>>());
    let visibility = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.visibility.as_str()))
            .collect::<Vec<_>>(),
    );
    let start_dates = StringArray::from(
        records
            .iter()
            .map(|r| r.start_date.map(|d| d.to_string()))
            .collect::<Vec<_>>(),
    );
    let promoted_at = StringArray::from(
        records
            .iter()
            .map(|r| r.promoted_at.map(|t| t.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids),
            Arc::new(names),
            Arc::new(source_ids),
            Arc::new(managed),
            Arc::new(visibility),
            Arc::new(start_dates),
            Arc::new(promoted_at),
        ],
    )
    .context("building tournaments record batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, run_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(run_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

/// Most recent runs first, by directory mtime.
pub fn list_runs(reports_root: &Path, limit: usize) -> Result<Vec<RunReportRow>> {
    if !reports_root.exists() {
        return Ok(vec![]);
    }
    let mut entries = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter(|e| e.path().join(SUMMARY_FILE).exists())
        .collect::<Vec<_>>();
    entries.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    entries.reverse();

    let mut runs = Vec::new();
    for entry in entries.into_iter().take(limit.max(1)) {
        let summary_path = entry.path().join(SUMMARY_FILE);
        let summary: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&summary_path)
                .with_context(|| format!("reading {}", summary_path.display()))?,
        )
        .with_context(|| format!("parsing {}", summary_path.display()))?;
        let count = |key: &str| summary.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        runs.push(RunReportRow {
            run_id: entry.file_name().to_string_lossy().to_string(),
            matched: count("matched"),
            fixed: count("fixed"),
            duplicates_removed: count("duplicates_removed"),
            failures: summary
                .get("failures")
                .and_then(|v| v.as_array())
                .map(|a| a.len())
                .unwrap_or(0),
            has_parquet_manifest: entry.path().join("snapshots/manifest.json").exists(),
        });
    }
    Ok(runs)
}

pub fn report_recent_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let mut lines = vec!["# Recent Reconciliation Runs".to_string(), String::new()];
    for run in list_runs(reports_root, runs)? {
        let dir = reports_root.join(&run.run_id);
        lines.push(format!("## Run `{}`", run.run_id));
        lines.push(format!("- matched: {}", run.matched));
        lines.push(format!("- fixed: {}", run.fixed));
        lines.push(format!("- duplicates removed: {}", run.duplicates_removed));
        lines.push(format!("- failed writes: {}", run.failures));
        lines.push(format!("- brief: `{}`", dir.join(BRIEF_FILE).display()));
        if run.has_parquet_manifest {
            lines.push(format!(
                "- parquet manifest: `{}`",
                dir.join("snapshots/manifest.json").display()
            ));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}
