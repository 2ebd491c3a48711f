use std::path::{Path, PathBuf};

/// Keep the newest `keep` reports of each format in `dir`; delete the rest.
/// Report names embed a sortable timestamp, so name order is age order.
pub async fn prune(dir: &Path, keep: usize) -> std::io::Result<usize> {
  let mut json = Vec::new();
  let mut html = Vec::new();

  let mut entries = tokio::fs::read_dir(dir).await?;
  while let Some(entry) = entries.next_entry().await? {
    let path = entry.path();
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
      continue;
    };
    if !name.starts_with("report-") {
      continue;
    }
    if name.ends_with(".json") {
      json.push(path);
    } else if name.ends_with(".html") {
      html.push(path);
    }
  }

  let mut removed = 0;
  for mut files in [json, html] {
    removed += remove_oldest(&mut files, keep).await?;
  }
  Ok(removed)
}

async fn remove_oldest(files: &mut Vec<PathBuf>, keep: usize) -> std::io::Result<usize> {
  if files.len() <= keep {
    return Ok(0);
  }
  files.sort();
  let excess = files.len() - keep;
  for path in files.drain(..excess) {
    tracing::debug!("Removing old report {}", path.display());
    tokio::fs::remove_file(&path).await?;
  }
  Ok(excess)
}
