//! Directory watching and sweeping.
//!
//! Two producers feed the [`WorkQueue`]: a `notify` watcher reacting to file
//! arrivals, and a sweep listing the directory (at startup for the backlog,
//! then periodically to retry files left in place).

use std::io;
use std::path::{Path, PathBuf};

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::ingest::queue::{Submit, WorkQueue};

/// Whether `path` carries the report extension (case-insensitive).
pub fn is_report_file(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// Paths a notification announces as newly available, if any.
///
/// Creation, rename-into and close-after-write all count; plain modifications
/// do not, since the close event follows them.
fn arrivals(event: &Event) -> &[PathBuf] {
    match event.kind {
        EventKind::Create(_)
        | EventKind::Access(AccessKind::Close(AccessMode::Write))
        | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => &event.paths,
        // [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().map(std::slice::from_ref).unwrap_or(&[])
        }
        _ => &[],
    }
}

/// Start watching `dir` (non-recursively), forwarding report arrivals.
///
/// Watching stops when the returned watcher is dropped.
pub fn watch_dir(
    dir: &Path,
    extension: &str,
    queue: WorkQueue,
) -> Result<RecommendedWatcher, notify::Error> {
    let wanted = extension.to_string();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for path in arrivals(&event) {
                if !is_report_file(path, &wanted) {
                    continue;
                }
                if queue.submit_blocking(path.clone()) == Submit::Closed {
                    tracing::debug!(path = %path.display(), "Queue closed, event dropped");
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "Directory watch error"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    tracing::info!(dir = %dir.display(), extension, "Watching for reports");
    Ok(watcher)
}

/// Report files currently sitting in `dir`, sorted by name.
pub async fn scan_dir(dir: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_report_file(&path, extension) && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
