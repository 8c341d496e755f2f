//! BvFs command line tool
//!
//! Formats, inspects and edits bvfs volume images.

use anyhow::{bail, Context, Result};
use bvfs::core::dump;
use bvfs::{BlockStore, FileBacking, ReusePolicy, Volume, VolumeOptions, VolumeStats};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bvfs")]
#[command(about = "Inspect and edit block virtual filesystem images")]
struct Args {
    /// Path to the volume image
    image: PathBuf,

    /// TOML file with volume options
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Block reuse policy (rewind, forward-only) [default: from config or rewind]
    #[arg(long)]
    reuse_policy: Option<String>,

    /// Sync after every block write
    #[arg(long)]
    sync: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write an empty volume
    Format {
        /// Replace an image that already holds data
        #[arg(short, long)]
        force: bool,
    },
    /// Print every block
    Dump,
    /// Block usage summary
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        dir: String,
    },
    /// Create a directory
    Mkdir {
        path: String,
        /// Octal permission bits
        #[arg(short, long, default_value = "755")]
        mode: String,
    },
    /// Copy a host file into the volume
    Put {
        src: PathBuf,
        dest: String,
        /// Octal permission bits for a new file
        #[arg(short, long, default_value = "644")]
        mode: String,
    },
    /// Print a file to stdout
    Cat { path: String },
    /// Remove a file or an empty directory
    Rm { path: String },
    /// Drop trailing free blocks from the image
    Trim,
    /// Clear a stale lock flag
    Unlock,
}

/// Parse a reuse policy from a CLI string
fn parse_reuse_policy(s: &str) -> Result<ReusePolicy> {
    match ReusePolicy::parse(s) {
        Some(policy) => Ok(policy),
        None => bail!(
            "Invalid reuse policy '{}'. Valid options: rewind, forward-only",
            s
        ),
    }
}

fn parse_mode(s: &str) -> Result<u16> {
    let mode = u16::from_str_radix(s, 8).with_context(|| format!("invalid octal mode '{}'", s))?;
    if mode > 0o777 {
        bail!("mode {:o} has bits outside rwxrwxrwx", mode);
    }
    Ok(mode)
}

fn load_options(args: &Args) -> Result<VolumeOptions> {
    let mut options = match &args.config {
        Some(path) => VolumeOptions::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => VolumeOptions::default(),
    };
    if let Some(policy) = &args.reuse_policy {
        options.reuse_policy = parse_reuse_policy(policy)?;
    }
    if args.sync {
        options.sync_writes = true;
    }
    Ok(options)
}

/// Split a volume path into its components
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

/// Walk `parts` from the root directory and return the final directory block
fn resolve_dir(volume: &Volume, parts: &[&str]) -> Result<u64> {
    let mut dir = volume.root_directory()?;
    for part in parts {
        let entry = volume
            .lookup(dir, part)?
            .with_context(|| format!("no such directory: {}", part))?;
        if !volume.node_metadata(entry.metadata)?.is_directory() {
            bail!("not a directory: {}", part);
        }
        dir = entry.content;
    }
    Ok(dir)
}

/// Resolve the parent directory of `path` and return it with the last component
fn resolve_parent<'a>(volume: &Volume, path: &'a str) -> Result<(u64, &'a str)> {
    let parts = components(path);
    let (name, parents) = parts
        .split_last()
        .with_context(|| format!("path '{}' has no final component", path))?;
    Ok((resolve_dir(volume, parents)?, *name))
}

fn open_store(image: &Path) -> Result<BlockStore<FileBacking>> {
    let backing = FileBacking::open_read_only(image)
        .with_context(|| format!("opening {}", image.display()))?;
    Ok(BlockStore::new(backing)?)
}

fn print_stats(stats: &VolumeStats, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }

    println!("Total blocks:     {}", stats.total_blocks);
    println!("Free blocks:      {}", stats.free_blocks);
    println!("Used blocks:      {}", stats.used_blocks);
    println!("  Root:           {}", stats.root_blocks);
    println!("  Directory:      {}", stats.directory_blocks);
    println!("  NodeMetadata:   {}", stats.node_metadata_blocks);
    println!("  Superblock:     {}", stats.superblocks);
    println!("  Data:           {}", stats.data_blocks);
    if stats.unrecognized_blocks > 0 {
        println!("  Unrecognized:   {}", stats.unrecognized_blocks);
    }
    Ok(())
}

fn run_mounted(volume: &Volume, command: &Command) -> Result<()> {
    match command {
        Command::Ls { dir } => {
            let dir = resolve_dir(volume, &components(dir))?;
            for entry in volume.list(dir)? {
                let meta = volume.node_metadata(entry.metadata)?;
                let kind = if meta.is_directory() { 'd' } else { '-' };
                println!(
                    "{}{} {:>5} {:>5} {:>10} {}",
                    kind,
                    meta.mode_string(),
                    meta.uid,
                    meta.gid,
                    meta.size,
                    entry.name
                );
            }
        }
        Command::Mkdir { path, mode } => {
            let (parent, name) = resolve_parent(volume, path)?;
            let block = volume.mkdir(parent, name, parse_mode(mode)?)?;
            info!("Created directory {} at block {}", path, block);
        }
        Command::Put { src, dest, mode } => {
            let content =
                std::fs::read(src).with_context(|| format!("reading {}", src.display()))?;
            let (dir, name) = resolve_parent(volume, dest)?;
            if volume.lookup(dir, name)?.is_none() {
                volume.create_file(dir, name, parse_mode(mode)?)?;
            }
            volume.write_file(dir, name, &content)?;
            info!("Wrote {} bytes to {}", content.len(), dest);
        }
        Command::Cat { path } => {
            let (dir, name) = resolve_parent(volume, path)?;
            let content = volume.read_file(dir, name)?;
            std::io::stdout().write_all(&content)?;
        }
        Command::Rm { path } => {
            let (dir, name) = resolve_parent(volume, path)?;
            volume.remove(dir, name)?;
        }
        Command::Trim => {
            let removed = volume.trim()?;
            println!("Removed {} trailing free blocks", removed);
        }
        Command::Format { .. } | Command::Dump | Command::Stats { .. } | Command::Unlock => {
            bail!("{:?} runs without mounting the volume", command)
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = load_options(&args)?;

    match &args.command {
        Command::Format { force } => {
            Volume::format(&args.image, *force || options.overwrite)
                .with_context(|| format!("formatting {}", args.image.display()))?;
            println!("Formatted {}", args.image.display());
        }
        Command::Dump => {
            let mut store = open_store(&args.image)?;
            print!("{}", dump::render(&mut store)?);
        }
        Command::Stats { json } => {
            let mut store = open_store(&args.image)?;
            print_stats(&VolumeStats::collect(&mut store)?, *json)?;
        }
        Command::Unlock => {
            if Volume::force_unlock(&args.image)? {
                println!("Cleared lock flag on {}", args.image.display());
            } else {
                println!("{} was not locked", args.image.display());
            }
        }
        command => {
            let volume = Volume::open_with(&args.image, options)
                .with_context(|| format!("opening {}", args.image.display()))?;
            run_mounted(&volume, command)?;
            volume.close()?;
        }
    }

    Ok(())
}
