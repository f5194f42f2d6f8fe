use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;

use crate::export::SourceRecord;
use crate::reconcile::ReconcileReport;
use crate::runtime::ResolvedPaths;
use crate::wallabag::TargetEntry;

#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub matched: PathBuf,
    pub unmatched_pocket: PathBuf,
    pub unmatched_wallabag: PathBuf,
}

impl ReportPaths {
    pub fn from_paths(paths: &ResolvedPaths) -> Self {
        Self {
            matched: paths.matched_path.clone(),
            unmatched_pocket: paths.unmatched_pocket_path.clone(),
            unmatched_wallabag: paths.unmatched_wallabag_path.clone(),
        }
    }
}

/// Write the three plain-text result logs. Records are separated by a blank line.
pub fn write_results(
    paths: &ReportPaths,
    sources: &[SourceRecord],
    targets: &[TargetEntry],
    report: &ReconcileReport,
) -> Result<()> {
    write_text(&paths.matched, &render_matched(sources, targets, report))?;
    write_text(
        &paths.unmatched_pocket,
        &render_unmatched_sources(sources, report),
    )?;
    write_text(
        &paths.unmatched_wallabag,
        &render_unmatched_targets(targets, report),
    )?;
    Ok(())
}

pub fn render_matched(
    sources: &[SourceRecord],
    targets: &[TargetEntry],
    report: &ReconcileReport,
) -> String {
    let mut output = String::new();
    for item in &report.matches {
        output.push_str(&sources[item.source_index].url);
        output.push_str("\nmatched\n");
        output.push_str(&targets[item.target_index].url);
        output.push_str("\n\n");
    }
    output
}

pub fn render_unmatched_sources(sources: &[SourceRecord], report: &ReconcileReport) -> String {
    block_list(
        report
            .unmatched_sources
            .iter()
            .map(|&index| sources[index].url.as_str()),
    )
}

pub fn render_unmatched_targets(targets: &[TargetEntry], report: &ReconcileReport) -> String {
    block_list(
        report
            .unmatched_targets
            .iter()
            .map(|&index| targets[index].url.as_str()),
    )
}

fn block_list<'a>(urls: impl Iterator<Item = &'a str>) -> String {
    let mut output = String::new();
    for url in urls {
        output.push_str(url);
        output.push_str("\n\n");
    }
    output
}

fn write_text(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    debug!("wrote {}", path.display());
    Ok(())
}
