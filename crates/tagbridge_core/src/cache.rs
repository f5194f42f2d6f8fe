use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::runtime::ResolvedPaths;
use crate::wallabag::{EntriesQuery, TargetEntry, WallabagReadApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOrigin {
    Snapshot,
    Fetched,
}

impl CacheOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Fetched => "fetched",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheLoad {
    pub entries: Vec<TargetEntry>,
    pub origin: CacheOrigin,
}

/// On-disk snapshot. `include_archived` records which entry set was fetched so a
/// run with a different `--archives` setting does not reuse it.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    include_archived: bool,
    entries: Vec<TargetEntry>,
}

/// Local copy of the Wallabag entry list. The snapshot has no expiry: once
/// written it is reused until deleted or refreshed explicitly.
#[derive(Debug, Clone)]
pub struct TargetCache {
    snapshot_path: PathBuf,
    listing_path: PathBuf,
}

impl TargetCache {
    pub fn new(snapshot_path: impl Into<PathBuf>, listing_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            listing_path: listing_path.into(),
        }
    }

    pub fn from_paths(paths: &ResolvedPaths) -> Self {
        Self::new(&paths.cache_path, &paths.cache_listing_path)
    }

    /// Remove the snapshot so the next load fetches. Returns `true` if a file was removed.
    pub fn invalidate(&self) -> Result<bool> {
        if !self.snapshot_path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.snapshot_path)
            .with_context(|| format!("failed to remove {}", self.snapshot_path.display()))?;
        info!("removed cache snapshot {}", self.snapshot_path.display());
        Ok(true)
    }

    pub fn load_or_fetch<A: WallabagReadApi>(
        &self,
        api: &mut A,
        include_archived: bool,
    ) -> Result<CacheLoad> {
        if self.snapshot_path.exists() {
            let snapshot = self.read_snapshot()?;
            if snapshot.include_archived == include_archived {
                info!(
                    "read {} wallabag items from {}",
                    snapshot.entries.len(),
                    self.snapshot_path.display()
                );
                warn!(
                    "using cached Wallabag entries; entries added since the snapshot was taken will not match (use --refresh)"
                );
                return Ok(CacheLoad {
                    entries: snapshot.entries,
                    origin: CacheOrigin::Snapshot,
                });
            }
            info!(
                "cache snapshot {} was taken {} archived entries; fetching again",
                self.snapshot_path.display(),
                if snapshot.include_archived {
                    "with"
                } else {
                    "without"
                }
            );
        }

        let snapshot = Snapshot {
            include_archived,
            entries: fetch_all_entries(api, include_archived)?,
        };
        self.write_listing(&snapshot.entries)?;
        self.write_snapshot(&snapshot)?;
        info!(
            "wrote {} wallabag items to {}",
            snapshot.entries.len(),
            self.snapshot_path.display()
        );
        Ok(CacheLoad {
            entries: snapshot.entries,
            origin: CacheOrigin::Fetched,
        })
    }

    fn read_snapshot(&self) -> Result<Snapshot> {
        let content = fs::read_to_string(&self.snapshot_path)
            .with_context(|| format!("failed to read {}", self.snapshot_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| {
                format!(
                    "failed to decode {} (delete it or pass --refresh)",
                    self.snapshot_path.display()
                )
            })
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        ensure_parent_dir(&self.snapshot_path)?;
        let encoded =
            serde_json::to_vec(snapshot).context("failed to encode Wallabag entry snapshot")?;
        let temp_path = self.snapshot_path.with_extension("json.partial");
        fs::write(&temp_path, encoded)
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.snapshot_path).with_context(|| {
            format!(
                "failed to move {} to {}",
                temp_path.display(),
                self.snapshot_path.display()
            )
        })
    }

    fn write_listing(&self, entries: &[TargetEntry]) -> Result<()> {
        ensure_parent_dir(&self.listing_path)?;
        let mut listing = String::new();
        for entry in entries {
            listing.push_str(&entry.url);
            listing.push_str("\n\n");
        }
        fs::write(&self.listing_path, listing)
            .with_context(|| format!("failed to write {}", self.listing_path.display()))
    }
}

/// Page through every entry. The first page decides page size and page count;
/// the remaining pages are requested in order. Any failed page aborts the fetch.
pub fn fetch_all_entries<A: WallabagReadApi>(
    api: &mut A,
    include_archived: bool,
) -> Result<Vec<TargetEntry>> {
    info!("getting Wallabag entries");
    let archive = if include_archived { None } else { Some(false) };
    let first = api
        .fetch_entries(&EntriesQuery {
            archive,
            page: None,
            per_page: None,
        })
        .context("failed to fetch first page of Wallabag entries")?;

    let mut entries = first.items;
    if first.total > entries.len() as u64 {
        for page in (first.page + 1)..=first.pages {
            debug!("fetching Wallabag entries page {page}/{}", first.pages);
            let next = api
                .fetch_entries(&EntriesQuery {
                    archive,
                    page: Some(page),
                    per_page: Some(first.limit),
                })
                .with_context(|| format!("failed to fetch Wallabag entries page {page}"))?;
            entries.extend(next.items);
        }
    }

    for entry in &mut entries {
        entry.content.clear();
    }
    Ok(entries)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}
