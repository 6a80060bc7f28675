//! mfs: 创建 MINIX v1 磁盘镜像并以交互命令行操作

mod disk;
mod logger;
mod shell;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use minix_fs::{FormatParams, FsError, MinixFileSystem, MountFlags, Session, BLOCK_SZ};

use disk::{FileDisk, SystemClock};
use shell::Shell;

/// 挂载时使用的设备号
const ROOT_DEV: u32 = 0x0301;

#[derive(Parser)]
#[command(name = "mfs", version, about = "MINIX v1 filesystem image tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level: error, warn, info, debug or trace (falls back to RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an image file and format it
    Mkfs(MkfsArgs),
    /// Mount an image and run the interactive shell
    Shell(ShellArgs),
}

#[derive(Args)]
struct MkfsArgs {
    /// Image file to create
    image: PathBuf,
    /// Number of inodes
    #[arg(long)]
    inodes: Option<u16>,
    /// Number of zones (image size in 1 KiB blocks)
    #[arg(long)]
    zones: Option<u16>,
    /// Blocks of inode bitmap
    #[arg(long)]
    imap_blocks: Option<u16>,
    /// Blocks of zone bitmap
    #[arg(long)]
    zmap_blocks: Option<u16>,
}

#[derive(Args)]
struct ShellArgs {
    /// Image file to mount
    image: PathBuf,
    /// Mount read-only
    #[arg(long)]
    read_only: bool,
}

/// 命令行错误
enum CliError {
    Io(io::Error),
    Fs(FsError),
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<FsError> for CliError {
    fn from(e: FsError) -> Self {
        Self::Fs(e)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{}", e),
            Self::Fs(e) => write!(f, "{} ({})", e, e.errno()),
        }
    }
}

impl MkfsArgs {
    fn params(&self) -> FormatParams {
        let default = FormatParams::default();
        FormatParams {
            inodes: self.inodes.unwrap_or(default.inodes),
            zones: self.zones.unwrap_or(default.zones),
            imap_blocks: self.imap_blocks.unwrap_or(default.imap_blocks),
            zmap_blocks: self.zmap_blocks.unwrap_or(default.zmap_blocks),
        }
    }

    fn make(self) -> Result<(), CliError> {
        let params = self.params();
        let disk = Arc::new(FileDisk::create(&self.image, params.zones as usize)?);
        let fs = MinixFileSystem::format(ROOT_DEV, disk, Arc::new(SystemClock), params)?;
        let sb = fs.geometry();
        println!(
            "{}: {} inodes, {} blocks of {} bytes, first data zone {}",
            self.image.display(),
            sb.ninodes,
            sb.nzones,
            BLOCK_SZ,
            sb.first_data_zone
        );
        fs.release_unused()?;
        Ok(())
    }
}

impl ShellArgs {
    fn run(self) -> Result<(), CliError> {
        let disk = Arc::new(FileDisk::open(&self.image, !self.read_only)?);
        log::info!("{}: {} blocks", self.image.display(), disk.blocks());
        let flags = if self.read_only {
            MountFlags::RDONLY
        } else {
            MountFlags::empty()
        };
        let fs = MinixFileSystem::mount(ROOT_DEV, disk.clone(), Arc::new(SystemClock), flags)?;
        let session = Session::new(fs)?;
        Shell::new(disk, session).run()?;
        Ok(())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init();
    let level = cli.log_level.or_else(|| std::env::var("RUST_LOG").ok());
    logger::set_log_level(level.as_deref());

    let result = match cli.command {
        Commands::Mkfs(args) => args.make(),
        Commands::Shell(args) => args.run(),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mfs: {}", e);
            ExitCode::FAILURE
        }
    }
}
