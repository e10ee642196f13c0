//! Inspect a virtual namespace and pack `LVPK` archives.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lilium_vfs::archive::ArchiveWriter;
use lilium_vfs::codec::CompressionMethod;
use lilium_vfs::{SystemMount, VfsConfig, VirtualFileSystem};

/// Lilium virtual file system tool.
#[derive(Parser, Debug)]
#[command(
    name = "lilium-vfs",
    about = "Inspect an overlay namespace and build LVPK archives",
    long_about = "Builds a virtual namespace from a TOML config and/or --mount flags, \
        then runs one command against it.\n\n\
        EXAMPLES:\n\
          # List a directory across every mount\n\
          lilium-vfs --config vfs.toml ls /data\n\
        \n\
          # Overlay a patch directory over the base assets\n\
          lilium-vfs --mount /data=./assets --mount /data=./patch cat /data/x.txt\n\
        \n\
          # Pack a directory into a compressed container\n\
          lilium-vfs pack ./assets assets.lvpk --compress",
    version
)]
struct Args {
    /// TOML file with `[vfs]` options and `[[mount]]` tables.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mount a host directory, as `POINT=DIR`. Later flags take precedence.
    #[arg(long = "mount", value_name = "POINT=DIR")]
    mounts: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory.
    Ls { path: String },
    /// Print a file to stdout.
    Cat { path: String },
    /// Show what a path resolves to.
    Stat { path: String },
    /// Pack a host directory into an LVPK container.
    Pack {
        dir: PathBuf,
        archive: PathBuf,
        /// Compress every entry with zlib.
        #[arg(long)]
        compress: bool,
    },
}

fn build_vfs(args: &Args) -> Result<VirtualFileSystem, Box<dyn std::error::Error>> {
    let vfs = match &args.config {
        Some(path) => VfsConfig::load(path)?.build()?,
        None => VirtualFileSystem::new(),
    };
    let base_priority = vfs.mounts().iter().map(|m| m.priority).max().unwrap_or(0);
    for flag in &args.mounts {
        let Some((point, dir)) = flag.split_once('=') else {
            return Err(format!("--mount expects POINT=DIR, got {flag:?}").into());
        };
        vfs.mount(point, SystemMount::new(dir), base_priority)?;
    }
    Ok(vfs)
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if let Command::Pack {
        dir,
        archive,
        compress,
    } = &args.command
    {
        let method = compress.then_some(CompressionMethod::Zlib);
        let mut writer = ArchiveWriter::create(archive)?;
        let count = writer.add_directory(dir, method)?;
        writer.finish()?;
        log::info!("Packed {count} files from {} into {}", dir.display(), archive.display());
        return Ok(());
    }

    let vfs = build_vfs(&args)?;
    match &args.command {
        Command::Ls { path } => {
            for child in vfs.list(path)? {
                let suffix = if child.is_directory() { "/" } else { "" };
                println!("{}{suffix}", child.name());
            }
        }
        Command::Cat { path } => {
            let data = vfs.read_file(path)?;
            std::io::stdout().write_all(&data)?;
        }
        Command::Stat { path } => {
            let file = vfs.resolve(path)?;
            let stat = file.stat()?;
            println!("path:      {}", file.path());
            println!("kind:      {:?}", file.kind());
            match stat.size {
                Some(size) => println!("size:      {size}"),
                None => println!("size:      unknown"),
            }
            println!("mounts:    {}", stat.mount_count);
            for id in file.mount_ids() {
                if let Some(info) = vfs.mounts().into_iter().find(|m| m.id == id) {
                    println!("  {id} {} at {} (priority {})", info.description, info.point, info.priority);
                }
            }
        }
        Command::Pack { .. } => {}
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
