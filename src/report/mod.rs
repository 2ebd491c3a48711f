//! Run reports: JSON for machines, static HTML for people, a console summary,
//! and retention of older report files.

pub mod html;
pub mod retention;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::domain::handle::Enforcement;
use crate::domain::outcome::TestVerdict;
use crate::harness::suite::SuiteRun;
use crate::harness::{BucketError, RunSummary};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
  #[error("Failed to write report: {0}")]
  Io(#[from] std::io::Error),
  #[error("Failed to serialize report: {0}")]
  Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteReport {
  pub name: String,
  pub path: String,
  pub summary: RunSummary,
  /// Set when the suite could not be loaded or aborted
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  /// Buckets whose cases never ran
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub bucket_errors: Vec<BucketError>,
  pub results: Vec<TestVerdict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
  pub generated_at: DateTime<Utc>,
  /// `local` or `remoteOnly`
  pub enforcement: String,
  pub summary: RunSummary,
  pub suites: Vec<SuiteReport>,
}

impl Report {
  pub fn from_runs(runs: &[SuiteRun], enforcement: Enforcement) -> Self {
    let mut summary = RunSummary::default();
    let suites = runs
      .iter()
      .map(|run| {
        let (suite_summary, error, bucket_errors, results) = match &run.outcome {
          Ok(context) => (
            context.summary(),
            None,
            context.bucket_errors().to_vec(),
            context.verdicts().to_vec(),
          ),
          Err(e) => (RunSummary::default(), Some(e.to_string()), Vec::new(), Vec::new()),
        };
        summary.merge(&suite_summary);
        SuiteReport {
          name: run.name.clone(),
          path: run.path.display().to_string(),
          summary: suite_summary,
          error,
          bucket_errors,
          results,
        }
      })
      .collect();

    Self {
      generated_at: Utc::now(),
      enforcement: match enforcement {
        Enforcement::Local => "local".to_string(),
        Enforcement::RemoteOnly => "remoteOnly".to_string(),
      },
      summary,
      suites,
    }
  }

  /// No failed verdicts, no aborted suites and no unreachable buckets
  pub fn all_passed(&self) -> bool {
    self.summary.all_passed()
      && self
        .suites
        .iter()
        .all(|s| s.error.is_none() && s.bucket_errors.is_empty())
  }

  fn file_stem(&self) -> String {
    format!("report-{}", self.generated_at.format("%Y%m%dT%H%M%S%.3fZ"))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
  pub json: PathBuf,
  pub html: PathBuf,
}

/// Write `report` as JSON and HTML into `dir`, then prune old reports
/// beyond `keep` of each format.
pub async fn write_reports(
  dir: &Path,
  report: &Report,
  keep: usize,
) -> Result<ReportFiles, ReportError> {
  tokio::fs::create_dir_all(dir).await?;
  let stem = report.file_stem();

  let json = dir.join(format!("{}.json", stem));
  tokio::fs::write(&json, serde_json::to_vec_pretty(report)?).await?;

  let html = dir.join(format!("{}.html", stem));
  tokio::fs::write(&html, html::render(report)).await?;

  let pruned = retention::prune(dir, keep).await?;
  if pruned > 0 {
    tracing::debug!("Pruned {} old report file(s) in {}", pruned, dir.display());
  }

  Ok(ReportFiles { json, html })
}

/// Plain-text summary printed at the end of a run
pub fn console_summary(report: &Report) -> String {
  let mut out = String::new();

  for suite in &report.suites {
    let s = &suite.summary;
    let _ = writeln!(
      out,
      "Suite {} ({}): {}/{} passed, {} failed, {} skipped",
      suite.name, suite.path, s.passed, s.total, s.failed, s.skipped
    );
    if let Some(error) = &suite.error {
      let _ = writeln!(out, "  ERROR {}", error);
    }
    for bucket in &suite.bucket_errors {
      let _ = writeln!(out, "  ERROR bucket '{}': {}", bucket.bucket, bucket.message);
    }
    for verdict in suite.results.iter().filter(|v| v.failure_class().is_some()) {
      if let Some(class) = verdict.failure_class() {
        let _ = writeln!(
          out,
          "  FAIL {} [{}] {}",
          verdict.test_id, class, verdict.description
        );
      }
    }
  }

  let s = &report.summary;
  let _ = writeln!(
    out,
    "Total: {}/{} passed, {} failed, {} skipped ({} enforcement)",
    s.passed, s.total, s.failed, s.skipped, report.enforcement
  );
  let _ = writeln!(
    out,
    "  permission violations: {}, service malfunctions: {}, wrong error kinds: {}, verification mismatches: {}, unverifiable passes: {}",
    s.permission_violations,
    s.service_malfunctions,
    s.wrong_error_kinds,
    s.verification_mismatches,
    s.unverifiable
  );
  out
}
