use anyhow::{Context, Result};
use log::{debug, info};

use crate::export::SourceRecord;
use crate::reconcile::ReconcileReport;
use crate::wallabag::{TargetEntry, WallabagWriteApi};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagReport {
    pub tagged: usize,
    pub skipped_without_tags: usize,
}

/// Copy Pocket tags onto every matched Wallabag entry, in Pocket order.
///
/// The first failing call aborts the whole propagation. Tags already applied stay
/// applied and later matches are not attempted.
pub fn propagate_tags<A: WallabagWriteApi>(
    api: &mut A,
    sources: &[SourceRecord],
    targets: &[TargetEntry],
    report: &ReconcileReport,
) -> Result<TagReport> {
    info!("setting Wallabag tags");
    let mut tag_report = TagReport::default();

    for item in report.matches_in_source_order() {
        let record = &sources[item.source_index];
        let target = &targets[item.target_index];
        if record.tags.is_empty() {
            debug!("no tags to apply for {}", record.url);
            tag_report.skipped_without_tags += 1;
            continue;
        }

        api.add_tags(target.id, &record.tags).with_context(|| {
            format!(
                "tagging aborted at Wallabag entry {} ({}) matched from Pocket URL {}",
                target.id, target.url, record.url
            )
        })?;
        tag_report.tagged += 1;
        info!(
            "tagged Wallabag entry ID {} with {} (URL: {})",
            target.id,
            record.tags.join(","),
            target.url
        );
    }

    Ok(tag_report)
}
