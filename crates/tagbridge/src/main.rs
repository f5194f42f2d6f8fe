use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{debug, info};
use tagbridge_core::cache::CacheOrigin;
use tagbridge_core::runtime::{
    PathOverrides, ResolvedPaths, RunOptions, normalize_for_display, resolve_paths,
};
use tagbridge_core::sync::{MigrationReport, run_migration};

#[derive(Debug, Parser)]
#[command(
    name = "tagbridge",
    version,
    about = "Copy Pocket tags onto matching Wallabag entries"
)]
struct Cli {
    #[arg(long, short = 'v', help = "Verbose mode")]
    verbose: bool,
    #[arg(long, short = 'd', help = "Debug output (implies verbose mode)")]
    debug: bool,
    #[arg(
        long,
        value_name = "PATH",
        help = "Wallabag connection config (TOML, or legacy wallabago JSON) [default: config.toml]"
    )]
    config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "HTML export of your Pocket entries, downloaded from https://getpocket.com/export [default: ril_export.html]"
    )]
    pocket_file: Option<PathBuf>,
    #[arg(
        long,
        help = "Also match and tag archived Wallabag entries. A snapshot taken with a different setting is fetched again"
    )]
    archives: bool,
    #[arg(
        long,
        value_name = "PATH",
        help = "Wallabag entry snapshot. Reused until deleted, so entries added to Wallabag later are not seen without --refresh"
    )]
    cache: Option<PathBuf>,
    #[arg(long, help = "Discard the Wallabag entry snapshot and fetch again")]
    refresh: bool,
    #[arg(
        long,
        value_name = "DIR",
        help = "Directory for result files and the default snapshot [default: current directory]"
    )]
    output_dir: Option<PathBuf>,
    #[arg(long, help = "Match and write result files without changing Wallabag tags")]
    dry_run: bool,
    #[arg(
        long,
        value_name = "N",
        default_value_t = 1,
        help = "Concurrent redirect lookups for unmatched Pocket URLs"
    )]
    redirect_workers: usize,
    #[arg(long, help = "Print resolved paths before running")]
    diagnostics: bool,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            verbose: self.verbose,
            debug: self.debug,
            include_archived: self.archives,
            refresh_cache: self.refresh,
            dry_run: self.dry_run,
            redirect_workers: self.redirect_workers,
        }
        .normalized()
    }

    fn path_overrides(&self) -> PathOverrides {
        PathOverrides {
            pocket_file: self.pocket_file.clone(),
            config: self.config.clone(),
            cache: self.cache.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = cli.run_options();
    dotenvy::dotenv().ok();
    init_logging(&options);

    if options.debug {
        debug!("debug mode");
    } else if options.verbose {
        info!("verbose mode");
    }

    let paths = resolve_paths(&cli.path_overrides())?;
    if cli.diagnostics || options.debug {
        println!("[diagnostics]\n{}\n", paths.diagnostics());
    }

    let report = run_migration(&paths, &options)?;
    print_summary(&paths, &options, &report);
    Ok(())
}

fn init_logging(options: &RunOptions) {
    let filter = if options.debug {
        "debug"
    } else if options.verbose {
        "warn,tagbridge=debug,tagbridge_core=debug"
    } else {
        "warn,tagbridge=info,tagbridge_core=info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .target(env_logger::Target::Stdout)
        .init();
}

fn print_summary(paths: &ResolvedPaths, options: &RunOptions, report: &MigrationReport) {
    let reconcile = &report.reconcile;
    println!();
    println!("migration summary");
    println!("pocket_entries: {}", report.sources.len());
    println!(
        "wallabag_entries: {} ({})",
        report.targets.len(),
        report.cache_origin.as_str()
    );
    println!("matches: {}", reconcile.matched_count());
    println!("matches.exact: {}", report.exact_matches());
    println!("matches.redirect: {}", report.redirect_matches());
    println!(
        "redirect_pass.ignored: {}",
        reconcile.ignored_in_redirect_pass
    );
    println!(
        "unmatched_pocket: {} (see {})",
        reconcile.unmatched_sources.len(),
        normalize_for_display(&paths.unmatched_pocket_path)
    );
    println!(
        "unmatched_wallabag: {} (see {})",
        reconcile.unmatched_targets.len(),
        normalize_for_display(&paths.unmatched_wallabag_path)
    );
    match &report.tags {
        Some(tags) => {
            println!("tagged: {}", tags.tagged);
            println!("skipped_without_tags: {}", tags.skipped_without_tags);
        }
        None => println!("tagged: <dry run>"),
    }
    println!("requests: {}", report.request_count);
    if report.cache_origin == CacheOrigin::Snapshot {
        println!(
            "note: Wallabag entries came from {}; delete it or pass --refresh to pick up new entries",
            normalize_for_display(&paths.cache_path)
        );
    }
    if options.verbose {
        for record in report.sources.iter().filter(|record| !record.is_matched()) {
            println!("unmatched: {}", record.url);
        }
    }
}
