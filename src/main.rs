//! unionfs - Inspect and modify a stack of directories as one filesystem
//!
//! Usage:
//!   unionfs --layer <dir> ... ls <path>     - List a merged directory
//!   unionfs stat <path>                     - Show the visible entry for a path
//!   unionfs cat <path>                      - Print a file from the topmost layer that has it
//!   unionfs --writable write <path>         - Write stdin to a file in the first layer
//!   unionfs layers                          - Show the configured layers

use anyhow::{bail, Context};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use unionfs::backend::{Backend, BackendIterator, DirEntry, Lstater};
use unionfs::{OverlayConfig, OverlayFs};

#[derive(Parser)]
#[command(name = "unionfs")]
#[command(version = "0.1.0")]
#[command(about = "Layered view over a stack of directories")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Layer directory, highest priority first (repeatable; overrides the config file)
    #[arg(short = 'L', long = "layer")]
    layers: Vec<PathBuf>,

    /// Send writes to the first layer
    #[arg(short, long)]
    writable: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show metadata for a path
    Stat {
        path: PathBuf,
    },

    /// List a directory, merged across layers
    Ls {
        #[arg(default_value = "/")]
        path: PathBuf,

        /// Read entries in pages of this size
        #[arg(long)]
        page: Option<usize>,

        /// Show type, mode, size and modification time
        #[arg(short, long)]
        long: bool,
    },

    /// Print a file to stdout
    Cat {
        path: PathBuf,
    },

    /// Show the configured layers
    Layers,

    /// Create a directory in the first layer
    Mkdir {
        path: PathBuf,

        /// Create missing parents
        #[arg(short, long)]
        parents: bool,
    },

    /// Write stdin to a file in the first layer
    Write {
        path: PathBuf,
    },

    /// Remove a path from the first layer
    Rm {
        path: PathBuf,

        /// Remove directories and their contents
        #[arg(short, long)]
        recursive: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = if cli.verbose {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .with_writer(io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_target(false)
            .with_writer(io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    };
    if let Err(e) = result {
        eprintln!("Failed to set subscriber: {}", e);
    }

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<OverlayConfig> {
    let mut config = if !cli.layers.is_empty() {
        OverlayConfig {
            layers: cli.layers.clone(),
            first_writable: false,
        }
    } else {
        let path = cli.config.clone().unwrap_or_else(OverlayConfig::default_path);
        if path.exists() {
            debug!("Loading config from {:?}", path);
            OverlayConfig::load(&path)
                .with_context(|| format!("loading config {}", path.display()))?
        } else if cli.config.is_some() {
            bail!("config file {} does not exist", path.display());
        } else {
            let mut config = OverlayConfig::default();
            config.apply_env_overrides();
            config
        }
    };

    if cli.writable {
        config.first_writable = true;
    }
    config.validate()?;
    if config.layers.is_empty() {
        bail!("no layers configured: pass --layer, --config or set UNIONFS_LAYERS");
    }
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let ofs = config.build().context("building overlay")?;

    match cli.command {
        Commands::Stat { path } => cmd_stat(&ofs, &path),
        Commands::Ls { path, page, long } => cmd_ls(&ofs, &path, page, long),
        Commands::Cat { path } => cmd_cat(&ofs, &path),
        Commands::Layers => cmd_layers(&config, &ofs),
        Commands::Mkdir { path, parents } => cmd_mkdir(&ofs, &path, parents),
        Commands::Write { path } => cmd_write(&ofs, &path),
        Commands::Rm { path, recursive } => cmd_rm(&ofs, &path, recursive),
    }
}

fn format_time(time: std::time::SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn type_char(entry: &DirEntry) -> char {
    if entry.is_dir() {
        'd'
    } else if entry.metadata().is_symlink() {
        'l'
    } else {
        '-'
    }
}

fn cmd_stat(ofs: &OverlayFs, path: &Path) -> anyhow::Result<()> {
    let (meta, lstat_used) = ofs
        .lstat_if_possible(path)
        .with_context(|| format!("stat {}", path.display()))?;

    println!("Name:     {}", meta.name());
    println!("Type:     {:?}", meta.file_type());
    println!("Size:     {}", meta.len());
    println!("Mode:     {:o}", meta.mode());
    println!("Modified: {}", format_time(meta.modified()));
    println!("Lstat:    {}", lstat_used);
    Ok(())
}

fn cmd_ls(ofs: &OverlayFs, path: &Path, page: Option<usize>, long: bool) -> anyhow::Result<()> {
    let mut dir = ofs
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let page = page.unwrap_or(0);
    loop {
        let entries = match dir.read_dir(page) {
            Ok(entries) => entries,
            Err(e) if e.is_end_of_directory() => break,
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        for entry in &entries {
            if long {
                let meta = entry.metadata();
                writeln!(
                    out,
                    "{}{:04o} {:>10} {} {}",
                    type_char(entry),
                    meta.mode() & 0o7777,
                    meta.len(),
                    format_time(meta.modified()),
                    entry.name()
                )?;
            } else {
                writeln!(out, "{}", entry.name())?;
            }
        }
        if page == 0 || entries.is_empty() {
            break;
        }
    }

    dir.close()?;
    Ok(())
}

fn cmd_cat(ofs: &OverlayFs, path: &Path) -> anyhow::Result<()> {
    let mut file = ofs
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    if file.stat()?.is_dir() {
        bail!("{} is a directory", path.display());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut file, &mut out)?;
    file.close()?;
    Ok(())
}

fn cmd_layers(config: &OverlayConfig, ofs: &OverlayFs) -> anyhow::Result<()> {
    for (i, layer) in config.layers.iter().enumerate() {
        let marker = if i == 0 && ofs.is_first_writable() {
            " (writable)"
        } else {
            ""
        };
        println!("{:>3}  {}{}", i, layer.display(), marker);
    }
    debug!("{} backends", ofs.num_backends());
    Ok(())
}

fn cmd_mkdir(ofs: &OverlayFs, path: &Path, parents: bool) -> anyhow::Result<()> {
    let result = if parents {
        ofs.mkdir_all(path, 0o755)
    } else {
        ofs.mkdir(path, 0o755)
    };
    result.with_context(|| format!("mkdir {}", path.display()))
}

fn cmd_write(ofs: &OverlayFs, path: &Path) -> anyhow::Result<()> {
    let mut file = ofs
        .create(path)
        .with_context(|| format!("create {}", path.display()))?;
    let written = io::copy(&mut io::stdin().lock(), &mut file)?;
    file.sync()?;
    file.close()?;
    debug!("Wrote {} bytes to {:?}", written, path);
    Ok(())
}

fn cmd_rm(ofs: &OverlayFs, path: &Path, recursive: bool) -> anyhow::Result<()> {
    let result = if recursive {
        ofs.remove_all(path)
    } else {
        ofs.remove(path)
    };
    result.with_context(|| format!("remove {}", path.display()))
}
