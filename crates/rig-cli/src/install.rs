//! The install run: resolve the configuration, install all packages, purge
//! stale ones and print a summary.

use anyhow::Result;
use clap::Parser;
use console::style;
use std::path::PathBuf;
use std::time::Duration;

use rig_pm::config::DEFAULT_CONFIG_FILE;
use rig_pm::{CacheMode, HttpClientConfig, InstallConfig, InstallStatus, InstallSummary, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "rig")]
#[command(about = "Install engines, extensions and scenarios from a package configuration")]
#[command(disable_version_flag = true)]
pub struct InstallArgs {
    /// Package configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Install root holding the engines, extensions and scenarios directories
    #[arg(short, long, default_value = ".")]
    pub root: PathBuf,

    /// Cache directory (defaults to $RIG_CACHE_DIR or the platform cache dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Version to install for ("latest", "stable" or e.g. "13.307")
    #[arg(short, long, default_value = "latest")]
    pub version: String,

    /// Major version used when the requested version is not numeric
    #[arg(long, default_value = "1")]
    pub default_major: String,

    /// Show what would be installed and purged without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub debug: bool,

    /// Use the built-in tar decoder and copy instead of external tools
    #[arg(long)]
    pub builtin_extractor: bool,

    /// Cache behavior: "revalidate" or "bust"
    #[arg(long, default_value = "revalidate")]
    pub cache_mode: CacheMode,

    /// Retries for transient network failures
    #[arg(long, default_value = "3")]
    pub retries: u32,

    /// Empty the download cache before installing
    #[arg(long)]
    pub clear_cache: bool,
}

impl InstallArgs {
    fn install_config(&self) -> InstallConfig {
        let mut config = InstallConfig::new()
            .with_config_path(&self.config)
            .with_install_root(&self.root)
            .with_version(&self.version)
            .with_default_major(&self.default_major)
            .with_dry_run(self.dry_run)
            .with_builtin_extractor(self.builtin_extractor)
            .with_cache_mode(self.cache_mode)
            .with_http(
                HttpClientConfig::new()
                    .with_max_retries(self.retries)
                    .with_retry_delay(Duration::from_secs(1)),
            );

        if let Some(cache_dir) = &self.cache_dir {
            config = config.with_cache_dir(cache_dir);
        }
        config
    }
}

pub async fn execute(args: InstallArgs) -> Result<i32> {
    let orchestrator = Orchestrator::new(args.install_config())?;

    if args.clear_cache {
        let cache = orchestrator.fetch_cache();
        if args.dry_run {
            println!(
                "{} Would clear {} bytes of downloads",
                style("Info:").cyan(),
                cache.size()
            );
        } else {
            let size = cache.size();
            cache.clear()?;
            println!("{} Cleared {} bytes of downloads", style("Info:").cyan(), size);
        }
    }

    if args.dry_run {
        println!("{} Dry run, nothing will be written", style("Info:").cyan());
    }

    let summary = orchestrator.run().await?;
    print_summary(&summary, args.dry_run);

    Ok(0)
}

fn print_summary(summary: &InstallSummary, dry_run: bool) {
    for outcome in &summary.outcomes {
        let marker = match outcome.status {
            InstallStatus::Installed => style("+").green(),
            InstallStatus::Skipped => style("=").dim(),
            InstallStatus::Failed => style("x").red(),
        };
        match &outcome.error {
            Some(error) => println!(
                "  {} {} {} {}",
                marker,
                outcome.kind,
                style(&outcome.package_id).bold(),
                style(error).red()
            ),
            None => println!("  {} {} {}", marker, outcome.kind, style(&outcome.package_id).bold()),
        }
    }

    let verb = if dry_run { "Would remove" } else { "Removed" };
    for path in &summary.purged {
        println!("  {} {} {}", style("-").red(), verb, path.display());
    }

    println!(
        "{} version {}: {} installed, {} up to date, {} failed, {} removed",
        style("Done:").green().bold(),
        summary.version,
        summary.installed(),
        summary.skipped(),
        style(summary.failed()).red(),
        summary.purged.len()
    );
}
