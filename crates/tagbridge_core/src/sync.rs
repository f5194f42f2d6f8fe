use anyhow::{Context, Result};
use log::info;

use crate::cache::{CacheOrigin, TargetCache};
use crate::config::load_config;
use crate::export::{SourceRecord, load_pocket_export};
use crate::reconcile::{MatchPass, ReconcileOptions, ReconcileReport, reconcile};
use crate::redirect::{HttpRedirectResolver, RedirectResolver};
use crate::report::{ReportPaths, write_results};
use crate::runtime::{ResolvedPaths, RunOptions};
use crate::tags::{TagReport, propagate_tags};
use crate::wallabag::{TargetEntry, WallabagClient, WallabagClientConfig, WallabagWriteApi};

#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub sources: Vec<SourceRecord>,
    pub targets: Vec<TargetEntry>,
    pub cache_origin: CacheOrigin,
    pub reconcile: ReconcileReport,
    /// `None` when tagging was skipped (dry run).
    pub tags: Option<TagReport>,
    pub request_count: usize,
}

impl MigrationReport {
    pub fn exact_matches(&self) -> usize {
        self.reconcile.count_for(MatchPass::Exact)
    }

    pub fn redirect_matches(&self) -> usize {
        self.reconcile.count_for(MatchPass::Redirect)
    }
}

/// Full run against the configured Wallabag instance.
pub fn run_migration(paths: &ResolvedPaths, options: &RunOptions) -> Result<MigrationReport> {
    info!("reading config {}", paths.config_path.display());
    let credentials = load_config(&paths.config_path)
        .and_then(|config| config.credentials())
        .context("failed to load Wallabag configuration")?;

    let mut client = WallabagClient::new(WallabagClientConfig::from_credentials(&credentials))?;
    let resolver = HttpRedirectResolver::new(&credentials.user_agent)?;
    run_migration_with_api(paths, options, &mut client, &resolver)
}

pub fn run_migration_with_api<A, R>(
    paths: &ResolvedPaths,
    options: &RunOptions,
    api: &mut A,
    resolver: &R,
) -> Result<MigrationReport>
where
    A: WallabagWriteApi,
    R: RedirectResolver + ?Sized,
{
    let mut sources = load_pocket_export(&paths.pocket_file)?;

    let cache = TargetCache::from_paths(paths);
    if options.refresh_cache {
        cache.invalidate()?;
    }
    let load = cache.load_or_fetch(api, options.include_archived)?;
    let targets = load.entries;

    let report = reconcile(
        &mut sources,
        &targets,
        resolver,
        &ReconcileOptions {
            redirect_workers: options.redirect_workers,
        },
    )?;
    write_results(&ReportPaths::from_paths(paths), &sources, &targets, &report)?;

    info!("found {} pocket entries", sources.len());
    info!("found {} wallabag entries", targets.len());
    info!("found {} matches", report.matched_count());
    info!(
        "{} unmatched pocket entries (see {})",
        report.unmatched_sources.len(),
        paths.unmatched_pocket_path.display()
    );
    info!(
        "{} unmatched wallabag entries (see {})",
        report.unmatched_targets.len(),
        paths.unmatched_wallabag_path.display()
    );

    let tags = if options.dry_run {
        info!("dry run: skipping Wallabag tag updates");
        None
    } else {
        Some(propagate_tags(api, &sources, &targets, &report)?)
    };

    Ok(MigrationReport {
        sources,
        targets,
        cache_origin: load.origin,
        reconcile: report,
        tags,
        request_count: api.request_count(),
    })
}
