use std::fmt::Write as _;

use crate::domain::outcome::{TestVerdict, VerdictStatus, Verification};
use crate::report::Report;

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse;width:100%;margin-bottom:2em}\
th,td{border:1px solid #ccc;padding:4px 8px;text-align:left;font-size:0.9em}\
th{background:#f0f0f0}\
.passed{background:#e8f5e9}.failed{background:#ffebee}.skipped{background:#fff8e1}\
.violation{font-weight:bold;color:#b71c1c}";

fn escape(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      c => out.push(c),
    }
  }
  out
}

fn status_cell(verdict: &TestVerdict) -> (&'static str, String) {
  match &verdict.status {
    VerdictStatus::Passed if verdict.verification.is_unverifiable() => {
      ("passed", "passed (unverified)".to_string())
    },
    VerdictStatus::Passed => ("passed", "passed".to_string()),
    VerdictStatus::Failed { class } => ("failed", class.to_string()),
    VerdictStatus::Skipped { .. } => ("skipped", "skipped".to_string()),
  }
}

fn verification_text(verification: &Verification) -> String {
  match verification {
    Verification::NotRequired => String::new(),
    Verification::Verified => "verified".to_string(),
    Verification::Mismatch(why) => format!("mismatch: {}", why),
    Verification::Unverifiable(why) => format!("unverifiable: {}", why),
  }
}

/// Self-contained HTML page, no external assets
pub fn render(report: &Report) -> String {
  let mut out = String::new();
  let s = &report.summary;

  let _ = write!(
    out,
    "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Permission check {}</title><style>{}</style></head><body>",
    report.generated_at.to_rfc3339(),
    STYLE
  );
  let _ = write!(
    out,
    "<h1>Permission check report</h1><p>Generated {} with {} enforcement.</p>",
    escape(&report.generated_at.to_rfc3339()),
    escape(&report.enforcement)
  );
  let _ = write!(
    out,
    "<p>{} of {} passed, {} failed, {} skipped, {} unverifiable passes.</p>\
     <p class=\"violation\">Permission violations: {}</p>\
     <p>Service malfunctions: {}, wrong error kinds: {}, verification mismatches: {}</p>",
    s.passed,
    s.total,
    s.failed,
    s.skipped,
    s.unverifiable,
    s.permission_violations,
    s.service_malfunctions,
    s.wrong_error_kinds,
    s.verification_mismatches
  );

  for suite in &report.suites {
    let _ = write!(
      out,
      "<h2>{}</h2><p><code>{}</code>: {}/{} passed</p>",
      escape(&suite.name),
      escape(&suite.path),
      suite.summary.passed,
      suite.summary.total
    );
    if let Some(error) = &suite.error {
      let _ = write!(out, "<p class=\"violation\">{}</p>", escape(error));
      continue;
    }
    for bucket in &suite.bucket_errors {
      let _ = write!(
        out,
        "<p class=\"violation\">Bucket {}: {}</p>",
        escape(&bucket.bucket),
        escape(&bucket.message)
      );
    }

    out.push_str(
      "<table><tr><th>Test</th><th>Permissions</th><th>Operation</th><th>Expected</th>\
       <th>Actual</th><th>Status</th><th>Verification</th><th>Attempts</th><th>ms</th><th>Details</th></tr>",
    );
    for verdict in &suite.results {
      let (class, status) = status_cell(verdict);
      let _ = write!(
        out,
        "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
        class,
        escape(&verdict.test_id),
        escape(&verdict.permissions),
        escape(&verdict.operation),
        verdict.expected,
        escape(&verdict.actual.to_string()),
        escape(&status),
        escape(&verification_text(&verdict.verification)),
        verdict.attempts,
        verdict.duration_ms,
        escape(&verdict.description)
      );
    }
    out.push_str("</table>");
  }

  out.push_str("</body></html>\n");
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_escape() {
    assert_eq!(escape("<a href=\"x\">&'</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;");
  }

  #[test]
  fn test_render_marks_failures() {
    let html = render(&crate::report::tests::sample_report());
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("<tr class=\"failed\"><td>ro-READ-upload</td>"));
    assert!(html.contains("PERMISSION VIOLATION"));
    assert!(html.contains("Storage client setup failed: no region"));
  }
}
