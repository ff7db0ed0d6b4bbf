//! vds CLI
//!
//! Entry point for the `vds` command-line tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use vds_store::config::{host_config_path, EffectiveConfig, StoreConfig};
use vds_store::logging::{self, LogFormat};
use vds_store::publish::{cleanup_incomplete_dirs, find_incomplete_dirs};
use vds_store::{DataDirLocator, DatasetPath, ReadOnlyArtifact, SplitEntry, Version, VersionRequest};

#[derive(Parser)]
#[command(name = "vds")]
#[command(about = "Versioned dataset store", version)]
struct Cli {
    /// Path to host config file (default: $VDS_CONFIG or ~/.config/vds/store.toml)
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    /// Log output format: pretty or json (default from config)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show where a dataset version lives, or would be created
    Locate {
        /// Dataset name
        name: String,

        /// Variant name
        #[arg(long)]
        config: Option<String>,

        /// Version or pattern (e.g. 1.0.0, 1.*.*, latest)
        #[arg(long)]
        version: Option<String>,

        /// Only look under this data root
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Summarize a published dataset directory
    Info {
        /// Version directory holding descriptor.json
        dir: PathBuf,

        /// Print the descriptor as JSON
        #[arg(long)]
        json: bool,
    },

    /// List or remove leftover incomplete directories
    Sweep {
        /// Directory to scan recursively
        parent: PathBuf,

        /// Only list what would be removed
        #[arg(long)]
        dry_run: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    let host_path = cli.config_file.clone().or_else(host_config_path);
    let effective = match EffectiveConfig::build(host_path.as_deref(), None) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };
    let store_config = match effective.store_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    let format = cli
        .log_format
        .as_deref()
        .unwrap_or(&store_config.log.format)
        .parse::<LogFormat>()
        .unwrap_or_else(|e| {
            eprintln!("{}", e);
            process::exit(1);
        });
    if let Err(e) = logging::init(format) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Locate {
            name,
            config,
            version,
            data_dir,
            json,
        } => run_locate(&store_config, name, config, version.as_deref(), data_dir, json),
        Commands::Info { dir, json } => run_info(dir, json),
        Commands::Sweep {
            parent,
            dry_run,
            json,
        } => run_sweep(parent, dry_run, json),
        Commands::Config => run_config(&effective),
    }
}

fn run_locate(
    store_config: &StoreConfig,
    name: String,
    config: Option<String>,
    version: Option<&str>,
    data_dir: Option<PathBuf>,
    json_output: bool,
) {
    let request = match VersionRequest::parse(version) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Invalid version: {}", e);
            process::exit(1);
        }
    };

    let locator = DataDirLocator::from_config(store_config);
    let dataset = DatasetPath::new(name, config);

    // Without a dataset definition, pick among what is published
    let mut published: Vec<Version> = Vec::new();
    for root in locator.roots(data_dir.as_deref()) {
        match locator.versions_at(&root, &dataset) {
            Ok(versions) => published.extend(versions),
            Err(e) => {
                eprintln!("Error scanning {}: {}", root.display(), e);
                process::exit(1);
            }
        }
    }
    let chosen = published
        .iter()
        .filter(|v| v.matches(&request))
        .max()
        .cloned()
        .or_else(|| match &request {
            VersionRequest::Pattern(pattern) => pattern.to_string().parse::<Version>().ok(),
            _ => None,
        });
    let Some(version) = chosen else {
        eprintln!(
            "No published version of '{}' matches {}",
            dataset.builder_dir().display(),
            request
        );
        process::exit(1);
    };

    let located = match locator.locate(data_dir.as_deref(), &dataset, &version) {
        Ok(located) => located,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if json_output {
        let output = serde_json::json!({
            "name": dataset.name,
            "config": dataset.config,
            "version": version.to_string(),
            "root": located.root,
            "dir": located.dir,
            "exists": located.exists,
            "other_versions": located
                .other_versions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
        });
        print_json(&output);
    } else {
        println!("{}", located.dir.display());
        if !located.exists {
            eprintln!("(not published yet)");
            if !located.other_versions.is_empty() {
                let others: Vec<String> =
                    located.other_versions.iter().map(ToString::to_string).collect();
                eprintln!("(other versions published: {})", others.join(", "));
            }
        }
    }
}

fn run_info(dir: PathBuf, json_output: bool) {
    let artifact = match ReadOnlyArtifact::from_dir(&dir) {
        Ok(artifact) => artifact,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    let info = artifact.info();

    if json_output {
        print_json(&info.to_descriptor());
        return;
    }

    println!("{}", info.full_name());
    if let Some(description) = &info.fields().description {
        println!("  {}", description);
    }
    println!("  Location: {}", info.data_dir().display());
    if let Some(format) = info.file_format() {
        println!("  File format: {}", format);
    }
    println!("  Download size: {} bytes", info.download_size());
    println!("  Dataset size: {} bytes", info.dataset_size());
    println!("  Splits:");
    for entry in info.splits().iter() {
        match entry {
            SplitEntry::Single(split) => println!(
                "    {}: {} examples, {} shards, {} bytes",
                split.name,
                split.num_examples(),
                split.num_shards(),
                split.num_bytes
            ),
            SplitEntry::Multi(multi) => println!(
                "    {}: {} examples across {} directories",
                multi.name,
                multi.num_examples(),
                multi.split_infos.len()
            ),
        }
    }
}

fn run_sweep(parent: PathBuf, dry_run: bool, json_output: bool) {
    let found = match find_incomplete_dirs(&parent) {
        Ok(found) => found,
        Err(e) => {
            eprintln!("Error scanning {}: {}", parent.display(), e);
            process::exit(1);
        }
    };

    let reclaimed = if dry_run {
        0
    } else {
        match cleanup_incomplete_dirs(&found) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Error removing incomplete directories: {}", e);
                process::exit(1);
            }
        }
    };

    if json_output {
        let dirs: Vec<serde_json::Value> = found
            .iter()
            .map(|d| serde_json::json!({ "path": d.path, "size_bytes": d.size_bytes }))
            .collect();
        print_json(&serde_json::json!({
            "dry_run": dry_run,
            "incomplete_dirs": dirs,
            "reclaimed_bytes": reclaimed,
        }));
        return;
    }

    if found.is_empty() {
        println!("No incomplete directories under {}.", parent.display());
        return;
    }
    for dir in &found {
        println!("  {} ({} bytes)", dir.path.display(), dir.size_bytes);
    }
    if dry_run {
        println!("{} incomplete directories (dry run, nothing removed).", found.len());
    } else {
        println!(
            "Removed {} incomplete directories, {} bytes reclaimed.",
            found.len(),
            reclaimed
        );
    }
}

fn run_config(effective: &EffectiveConfig) {
    match effective.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}
