use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const DEFAULT_POCKET_FILE: &str = "ril_export.html";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const CACHE_SNAPSHOT_FILENAME: &str = ".wallabag_cache.json";
pub const CACHE_LISTING_FILENAME: &str = ".wallabag_items";
pub const MATCHED_FILENAME: &str = ".matchedPocketEntries";
pub const UNMATCHED_POCKET_FILENAME: &str = ".unmatchedPocketEntries";
pub const UNMATCHED_WALLABAG_FILENAME: &str = ".unmatchedWallabagEntries";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub pocket_file: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub cache: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Every file the run reads or writes, resolved against the working directory.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub pocket_file: PathBuf,
    pub config_path: PathBuf,
    pub cache_path: PathBuf,
    pub cache_listing_path: PathBuf,
    pub matched_path: PathBuf,
    pub unmatched_pocket_path: PathBuf,
    pub unmatched_wallabag_path: PathBuf,
    pub config_source: ValueSource,
    pub cache_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "pocket_file={}\nconfig_path={} ({})\ncache_path={} ({})\ncache_listing_path={}\nmatched_path={}\nunmatched_pocket_path={}\nunmatched_wallabag_path={}",
            normalize_for_display(&self.pocket_file),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.cache_path),
            self.cache_source.as_str(),
            normalize_for_display(&self.cache_listing_path),
            normalize_for_display(&self.matched_path),
            normalize_for_display(&self.unmatched_pocket_path),
            normalize_for_display(&self.unmatched_wallabag_path),
        )
    }
}

pub fn resolve_paths(overrides: &PathOverrides) -> Result<ResolvedPaths> {
    let cwd = env::current_dir().context("failed to read current directory")?;
    Ok(resolve_paths_from(&cwd, overrides))
}

pub fn resolve_paths_from(cwd: &Path, overrides: &PathOverrides) -> ResolvedPaths {
    let output_dir = overrides
        .output_dir
        .as_ref()
        .map(|dir| absolutize(cwd, dir))
        .unwrap_or_else(|| cwd.to_path_buf());

    let pocket_file = absolutize(
        cwd,
        overrides
            .pocket_file
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_POCKET_FILE)),
    );
    let (config_path, config_source) = match &overrides.config {
        Some(path) => (absolutize(cwd, path), ValueSource::Flag),
        None => (cwd.join(DEFAULT_CONFIG_FILE), ValueSource::Default),
    };
    let (cache_path, cache_source) = match &overrides.cache {
        Some(path) => (absolutize(cwd, path), ValueSource::Flag),
        None => (output_dir.join(CACHE_SNAPSHOT_FILENAME), ValueSource::Default),
    };

    ResolvedPaths {
        pocket_file,
        config_path,
        cache_path,
        cache_listing_path: output_dir.join(CACHE_LISTING_FILENAME),
        matched_path: output_dir.join(MATCHED_FILENAME),
        unmatched_pocket_path: output_dir.join(UNMATCHED_POCKET_FILENAME),
        unmatched_wallabag_path: output_dir.join(UNMATCHED_WALLABAG_FILENAME),
        config_source,
        cache_source,
    }
}

/// Flags that shape a single run. Passed explicitly to every stage.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub verbose: bool,
    pub debug: bool,
    pub include_archived: bool,
    pub refresh_cache: bool,
    pub dry_run: bool,
    pub redirect_workers: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            debug: false,
            include_archived: false,
            refresh_cache: false,
            dry_run: false,
            redirect_workers: 1,
        }
    }
}

impl RunOptions {
    /// Debug mode implies verbose output.
    pub fn normalized(mut self) -> Self {
        if self.debug {
            self.verbose = true;
        }
        self.redirect_workers = self.redirect_workers.max(1);
        self
    }
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
