use std::collections::HashMap;

use anyhow::{Context, Result};
use log::{debug, info};
use rayon::prelude::*;

use crate::canonical::canonicalize;
use crate::export::SourceRecord;
use crate::redirect::RedirectResolver;
use crate::wallabag::TargetEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPass {
    Exact,
    Redirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRecord {
    pub source_index: usize,
    pub target_index: usize,
    pub pass: MatchPass,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Matches in discovery order: all exact matches first, then redirect matches.
    pub matches: Vec<MatchRecord>,
    pub unmatched_sources: Vec<usize>,
    pub unmatched_targets: Vec<usize>,
    /// Records skipped by the redirect pass because the exact pass already matched them.
    pub ignored_in_redirect_pass: usize,
}

impl ReconcileReport {
    pub fn matched_count(&self) -> usize {
        self.matches.len()
    }

    pub fn count_for(&self, pass: MatchPass) -> usize {
        self.matches.iter().filter(|item| item.pass == pass).count()
    }

    /// Matches ordered by their position in the source list.
    pub fn matches_in_source_order(&self) -> Vec<MatchRecord> {
        let mut ordered = self.matches.clone();
        ordered.sort_by_key(|item| item.source_index);
        ordered
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Number of concurrent redirect lookups in the second pass.
    pub redirect_workers: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            redirect_workers: 1,
        }
    }
}

/// Target positions grouped by canonical URL, plus the set of positions already
/// handed out. A position is claimed at most once per run.
struct ClaimIndex {
    by_canonical: HashMap<String, Vec<usize>>,
    claimed: Vec<bool>,
}

impl ClaimIndex {
    fn build(targets: &[TargetEntry]) -> Self {
        let mut by_canonical: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, target) in targets.iter().enumerate() {
            by_canonical
                .entry(canonicalize(&target.url))
                .or_default()
                .push(position);
        }
        Self {
            by_canonical,
            claimed: vec![false; targets.len()],
        }
    }

    /// Claim the first unclaimed target, in target order, whose canonical URL equals `canonical`.
    fn claim(&mut self, canonical: &str) -> Option<usize> {
        if canonical.is_empty() {
            return None;
        }
        let positions = self.by_canonical.get(canonical)?;
        let position = positions
            .iter()
            .copied()
            .find(|&position| !self.claimed[position])?;
        self.claimed[position] = true;
        Some(position)
    }

    fn unclaimed(&self) -> Vec<usize> {
        self.claimed
            .iter()
            .enumerate()
            .filter(|(_, claimed)| !**claimed)
            .map(|(position, _)| position)
            .collect()
    }
}

/// Match every source record against the target entries.
///
/// The exact pass compares canonical URLs directly. Records left over are then
/// resolved through `resolver` and compared again using the final URL. Matching is
/// greedy in source order and each target entry is claimed at most once. The
/// records are updated in place with `resolved_url` and `matched_target_id`.
pub fn reconcile<R: RedirectResolver + ?Sized>(
    sources: &mut [SourceRecord],
    targets: &[TargetEntry],
    resolver: &R,
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    let mut index = ClaimIndex::build(targets);
    let mut report = ReconcileReport::default();

    info!("basic URL matching...");
    for (source_index, record) in sources.iter_mut().enumerate() {
        match index.claim(&canonicalize(&record.url)) {
            Some(target_index) => {
                debug!("✓ {}", record.url);
                record.matched_target_id = Some(targets[target_index].id);
                report.matches.push(MatchRecord {
                    source_index,
                    target_index,
                    pass: MatchPass::Exact,
                });
            }
            None => debug!("x {}", record.url),
        }
    }
    info!(
        "matched {} pocket entries by URL",
        report.count_for(MatchPass::Exact)
    );

    info!("now see if remaining URLs to match can be fixed via redirection");
    let pending: Vec<usize> = sources
        .iter()
        .enumerate()
        .filter(|(_, record)| !record.is_matched())
        .map(|(source_index, _)| source_index)
        .collect();
    report.ignored_in_redirect_pass = sources.len() - pending.len();

    let urls: Vec<&str> = pending
        .iter()
        .map(|&source_index| sources[source_index].url.as_str())
        .collect();
    let resolved = resolve_all(resolver, &urls, options.redirect_workers)?;

    for (source_index, resolved_url) in pending.into_iter().zip(resolved) {
        let record = &mut sources[source_index];
        debug!(
            "checking redirect for unmatched Pocket URL: {} -> {}",
            record.url,
            if resolved_url.is_empty() {
                "<unresolved>"
            } else {
                resolved_url.as_str()
            }
        );
        let claimed = index.claim(&canonicalize(&resolved_url));
        record.resolved_url = resolved_url;
        match claimed {
            Some(target_index) => {
                record.matched_target_id = Some(targets[target_index].id);
                report.matches.push(MatchRecord {
                    source_index,
                    target_index,
                    pass: MatchPass::Redirect,
                });
            }
            None => report.unmatched_sources.push(source_index),
        }
    }
    info!(
        "matched {} pocket entries with URL redirection pass",
        report.count_for(MatchPass::Redirect)
    );
    info!(
        "ignored {} pocket entries in URL redirection pass",
        report.ignored_in_redirect_pass
    );

    report.unmatched_targets = index.unclaimed();
    debug_assert_eq!(
        report.matched_count() + report.unmatched_sources.len(),
        sources.len()
    );
    debug_assert_eq!(
        report.matched_count() + report.unmatched_targets.len(),
        targets.len()
    );
    Ok(report)
}

/// Resolve redirects for `urls`, keeping input order. Empty URLs are not fetched.
fn resolve_all<R: RedirectResolver + ?Sized>(
    resolver: &R,
    urls: &[&str],
    workers: usize,
) -> Result<Vec<String>> {
    let resolve_one = |url: &&str| {
        if url.is_empty() {
            String::new()
        } else {
            resolver.resolve(url)
        }
    };

    if workers <= 1 || urls.len() <= 1 {
        return Ok(urls.iter().map(resolve_one).collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|worker| format!("redirect-{worker}"))
        .build()
        .context("failed to build redirect worker pool")?;
    Ok(pool.install(|| urls.par_iter().map(resolve_one).collect()))
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex;

    use super::{MatchPass, ReconcileOptions, reconcile};
    use crate::export::SourceRecord;
    use crate::redirect::RedirectResolver;
    use crate::wallabag::TargetEntry;

    #[derive(Default)]
    struct MapResolver {
        redirects: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    impl MapResolver {
        fn with(pairs: &[(&str, &str)]) -> Self {
            Self {
                redirects: pairs
                    .iter()
                    .map(|(from, to)| (from.to_string(), to.to_string()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    impl RedirectResolver for MapResolver {
        fn resolve(&self, url: &str) -> String {
            self.calls.lock().expect("calls lock").push(url.to_string());
            self.redirects
                .get(url)
                .cloned()
                .unwrap_or_else(|| url.to_string())
        }
    }

    fn source(url: &str) -> SourceRecord {
        SourceRecord::new(url, vec!["tag".to_string()])
    }

    fn targets(urls: &[&str]) -> Vec<TargetEntry> {
        urls.iter()
            .enumerate()
            .map(|(position, url)| TargetEntry::new(position as i64 + 100, *url))
            .collect()
    }

    #[test]
    fn cosmetic_url_differences_match_in_exact_pass() {
        let mut sources = vec![
            source("http://example.com/a"),
            source("https://www.example.com/b/"),
            source("https://example.com/c?utm_source=feed"),
            source("https://example.com/d#comments"),
        ];
        let targets = targets(&[
            "https://example.com/d",
            "https://www.example.com/c",
            "example.com/b",
            "https://example.com/a/",
        ]);
        let resolver = MapResolver::default();

        let report = reconcile(&mut sources, &targets, &resolver, &ReconcileOptions::default())
            .expect("reconcile");

        assert_eq!(report.matched_count(), 4);
        assert_eq!(report.count_for(MatchPass::Exact), 4);
        assert!(report.unmatched_sources.is_empty());
        assert!(report.unmatched_targets.is_empty());
        assert!(resolver.calls().is_empty());
        assert_eq!(sources[0].matched_target_id, Some(103));
        assert_eq!(sources[3].matched_target_id, Some(100));
        assert!(sources.iter().all(|record| record.resolved_url.is_empty()));
    }

    #[test]
    fn redirect_pass_matches_what_exact_pass_missed() {
        let mut sources = vec![source("https://bit.ly/xyz")];
        let targets = targets(&["https://example.com/long-article"]);
        let resolver = MapResolver::with(&[(
            "https://bit.ly/xyz",
            "https://www.example.com/long-article/?ref=short",
        )]);

        let report = reconcile(&mut sources, &targets, &resolver, &ReconcileOptions::default())
            .expect("reconcile");

        assert_eq!(report.count_for(MatchPass::Exact), 0);
        assert_eq!(report.count_for(MatchPass::Redirect), 1);
        assert_eq!(report.matches[0].pass, MatchPass::Redirect);
        assert_eq!(
            sources[0].resolved_url,
            "https://www.example.com/long-article/?ref=short"
        );
        assert_eq!(sources[0].matched_target_id, Some(100));
        assert_eq!(resolver.calls(), vec!["https://bit.ly/xyz".to_string()]);
    }

    #[test]
    fn exact_redirect_and_unmatched_end_to_end() {
        let mut sources = vec![
            source("https://www.site-a.com/post/"),
            source("https://short.link/b"),
            source("https://nowhere.example/c"),
        ];
        let targets = targets(&["http://site-a.com/post", "https://site-b.com/article"]);
        let resolver = MapResolver::with(&[("https://short.link/b", "https://site-b.com/article")]);

        let report = reconcile(&mut sources, &targets, &resolver, &ReconcileOptions::default())
            .expect("reconcile");

        assert_eq!(report.matched_count(), 2);
        assert_eq!(report.unmatched_sources, vec![2]);
        assert!(report.unmatched_targets.is_empty());
        assert_eq!(report.ignored_in_redirect_pass, 1);
        assert_eq!(
            resolver.calls(),
            vec![
                "https://short.link/b".to_string(),
                "https://nowhere.example/c".to_string()
            ]
        );
        assert_eq!(
            report.matched_count() + report.unmatched_sources.len(),
            sources.len()
        );
    }

    #[test]
    fn each_target_is_claimed_at_most_once() {
        let mut sources = vec![
            source("https://example.com/dup"),
            source("http://www.example.com/dup/"),
            source("https://example.com/dup?again=1"),
        ];
        let targets = targets(&["https://example.com/dup", "https://example.com/dup/"]);
        let resolver = MapResolver::default();

        let report = reconcile(&mut sources, &targets, &resolver, &ReconcileOptions::default())
            .expect("reconcile");

        let claimed: Vec<usize> = report.matches.iter().map(|item| item.target_index).collect();
        let unique: BTreeSet<usize> = claimed.iter().copied().collect();
        assert_eq!(claimed.len(), unique.len());
        assert_eq!(claimed, vec![0, 1]);
        assert_eq!(report.unmatched_sources, vec![2]);
        assert_eq!(sources[2].matched_target_id, None);
    }

    #[test]
    fn redirect_pass_cannot_reclaim_exact_match() {
        let mut sources = vec![
            source("https://example.com/taken"),
            source("https://short.link/taken"),
        ];
        let targets = targets(&["https://example.com/taken", "https://example.com/other"]);
        let resolver =
            MapResolver::with(&[("https://short.link/taken", "https://example.com/taken")]);

        let report = reconcile(&mut sources, &targets, &resolver, &ReconcileOptions::default())
            .expect("reconcile");

        assert_eq!(report.matched_count(), 1);
        assert_eq!(report.unmatched_sources, vec![1]);
        assert_eq!(report.unmatched_targets, vec![1]);
    }

    #[test]
    fn unresolvable_and_empty_urls_never_match() {
        struct FailingResolver;
        impl RedirectResolver for FailingResolver {
            fn resolve(&self, _url: &str) -> String {
                String::new()
            }
        }

        let mut sources = vec![source(""), source("https://down.example/x")];
        let targets = targets(&["", "https://"]);

        let report = reconcile(
            &mut sources,
            &targets,
            &FailingResolver,
            &ReconcileOptions::default(),
        )
        .expect("reconcile");

        assert_eq!(report.matched_count(), 0);
        assert_eq!(report.unmatched_sources, vec![0, 1]);
        assert_eq!(report.unmatched_targets, vec![0, 1]);
        assert!(sources.iter().all(|record| record.resolved_url.is_empty()));
    }

    #[test]
    fn concurrent_resolution_gives_same_result_as_sequential() {
        let urls: Vec<String> = (0..24).map(|n| format!("https://short.link/{n}")).collect();
        let redirects: Vec<(String, String)> = urls
            .iter()
            .enumerate()
            .filter(|(n, _)| n % 3 != 0)
            .map(|(n, url)| (url.clone(), format!("https://example.com/{}", n % 8)))
            .collect();
        let pairs: Vec<(&str, &str)> = redirects
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()))
            .collect();
        let target_urls: Vec<String> = (0..8).map(|n| format!("https://example.com/{n}")).collect();
        let target_refs: Vec<&str> = target_urls.iter().map(String::as_str).collect();
        let targets = targets(&target_refs);

        let run = |workers: usize| {
            let mut sources: Vec<SourceRecord> = urls.iter().map(|url| source(url)).collect();
            let resolver = MapResolver::with(&pairs);
            let report = reconcile(
                &mut sources,
                &targets,
                &resolver,
                &ReconcileOptions {
                    redirect_workers: workers,
                },
            )
            .expect("reconcile");
            (report, sources)
        };

        let (sequential, sequential_sources) = run(1);
        let (parallel, parallel_sources) = run(4);
        assert_eq!(sequential, parallel);
        assert_eq!(sequential_sources, parallel_sources);
        assert_eq!(sequential.matched_count(), 8);
        assert_eq!(sequential.unmatched_sources.len(), 16);
    }

    #[test]
    fn matches_in_source_order_interleaves_passes() {
        let mut sources = vec![
            source("https://short.link/first"),
            source("https://example.com/second"),
        ];
        let targets = targets(&["https://example.com/first", "https://example.com/second"]);
        let resolver =
            MapResolver::with(&[("https://short.link/first", "https://example.com/first")]);

        let report = reconcile(&mut sources, &targets, &resolver, &ReconcileOptions::default())
            .expect("reconcile");

        assert_eq!(report.matches[0].source_index, 1);
        let ordered = report.matches_in_source_order();
        assert_eq!(ordered[0].source_index, 0);
        assert_eq!(ordered[0].pass, MatchPass::Redirect);
        assert_eq!(ordered[1].pass, MatchPass::Exact);
    }
}
