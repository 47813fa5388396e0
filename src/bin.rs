//! The command-line front-end: parses a verb and its operands, mounts the
//! image, dispatches to [`ext2fs::vfs::Vfs`], and prints diagnostics in the
//! `***`-prefixed form required of the CLI surface.

use std::io::{Read, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ext2fs::device::FileBlockDevice;
use ext2fs::vfs::VNode;
use ext2fs::{Error, Ext2Fs, FsResult, Vfs};

#[derive(Parser)]
#[command(name = "ext2fs", about = "Read/write driver for ext2 images")]
struct Cli {
    /// Path to the disk image to mount.
    image: PathBuf,
    /// Raises log verbosity by one level per occurrence (warn -> info -> debug -> trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    verb: Verb,
}

#[derive(Subcommand)]
enum Verb {
    /// Lists a directory's entries.
    Ls { path: String },
    /// Prints a file's contents to stdout.
    Cat { path: String },
    /// Prints an inode's stat record.
    Stat { path: String },
    /// Creates an empty regular file.
    Create { path: String },
    /// Creates an empty directory.
    Mkdir { path: String },
    /// Overwrites a file's contents with stdin.
    Write { path: String },
    /// Removes a directory entry.
    Unlink { path: String },
    /// Creates a symbolic link at `path` pointing to `target`.
    Symlink { target: String, path: String },
    /// Creates a hard link at `newpath` for the file at `oldpath`.
    Link { oldpath: String, newpath: String },
}

impl Verb {
    fn name(&self) -> &'static str {
        match self {
            Verb::Ls { .. } => "ls",
            Verb::Cat { .. } => "cat",
            Verb::Stat { .. } => "stat",
            Verb::Create { .. } => "create",
            Verb::Mkdir { .. } => "mkdir",
            Verb::Write { .. } => "write",
            Verb::Unlink { .. } => "unlink",
            Verb::Symlink { .. } => "symlink",
            Verb::Link { .. } => "link",
        }
    }

    /// The path named in the diagnostic should the operation fail.
    fn subject_path(&self) -> &str {
        match self {
            Verb::Ls { path }
            | Verb::Cat { path }
            | Verb::Stat { path }
            | Verb::Create { path }
            | Verb::Mkdir { path }
            | Verb::Write { path }
            | Verb::Unlink { path }
            | Verb::Symlink { path, .. } => path,
            Verb::Link { newpath, .. } => newpath,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let verb_name = cli.verb.name();
    let subject = cli.verb.subject_path().to_string();
    match run(&cli) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("*** {verb_name} failed on {subject}: {e}");
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    match std::env::var("RUST_LOG") {
        Ok(spec) => {
            builder.parse_filters(&spec);
        }
        Err(_) => {
            builder.filter_level(default_level);
        }
    }
    builder.init();
}

/// Splits `path` at its last `/` into an absolute directory path and a tail
/// component, so path-based operands can resolve a parent before acting on
/// the tail themselves (`link`'s destination).
fn split_tail(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

fn run(cli: &Cli) -> FsResult<()> {
    let dev = FileBlockDevice::open(&cli.image)?;
    let mut fs = Ext2Fs::mount(Box::new(dev))?;
    let root = Vfs::root(&mut fs)?;

    match &cli.verb {
        Verb::Ls { path } => {
            let dir = Vfs::resolve(&mut fs, root, root, path.as_bytes())?;
            if !dir.is_dir() {
                return Err(Error::NotDir);
            }
            let mut index = 0;
            while let Some(entry) = Vfs::readdir(&mut fs, dir, index)? {
                println!("{}", String::from_utf8_lossy(&entry.name));
                index += 1;
            }
        }
        Verb::Cat { path } => {
            let node = Vfs::resolve(&mut fs, root, root, path.as_bytes())?;
            cat(&mut fs, node)?;
        }
        Verb::Stat { path } => {
            let node = Vfs::resolve(&mut fs, root, root, path.as_bytes())?;
            print_stat(&mut fs, node)?;
        }
        Verb::Create { path } => {
            Vfs::create(&mut fs, root, root, path.as_bytes(), false)?;
        }
        Verb::Mkdir { path } => {
            Vfs::create(&mut fs, root, root, path.as_bytes(), true)?;
        }
        Verb::Write { path } => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            let node = Vfs::resolve(&mut fs, root, root, path.as_bytes())?;
            Vfs::truncate(&mut fs, node)?;
            Vfs::write(&mut fs, node, 0, &buf)?;
        }
        Verb::Unlink { path } => {
            Vfs::unlink(&mut fs, root, root, path.as_bytes())?;
        }
        Verb::Symlink { target, path } => {
            Vfs::symlink(&mut fs, root, root, path.as_bytes(), target.as_bytes())?;
        }
        Verb::Link { oldpath, newpath } => {
            let old = Vfs::resolve(&mut fs, root, root, oldpath.as_bytes())?;
            let (dir_path, tail) = split_tail(newpath);
            let new_dir = Vfs::resolve(&mut fs, root, root, dir_path.as_bytes())?;
            Vfs::link(&mut fs, old, new_dir, tail.as_bytes())?;
        }
    }
    Ok(())
}

fn cat(fs: &mut Ext2Fs, node: VNode) -> FsResult<()> {
    let mut off = 0u64;
    let mut buf = [0u8; 4096];
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    loop {
        let n = Vfs::read(fs, node, off, &mut buf)?;
        if n == 0 {
            break;
        }
        handle.write_all(&buf[..n])?;
        off += n as u64;
    }
    Ok(())
}

fn print_stat(fs: &mut Ext2Fs, node: VNode) -> FsResult<()> {
    let st = Vfs::stat(fs, node)?;
    println!("  Inode: {}", st.inum);
    println!("  Mode: {:#06o}  Links: {}", st.mode, st.link_count);
    println!("  Uid: {}  Gid: {}", st.uid, st.gid);
    println!("  Size: {}  Blocks: {}  IO Block: {}", st.size, st.blocks, st.block_size);
    println!("  Access: {}  Modify: {}  Change: {}", st.atime, st.mtime, st.ctime);
    Ok(())
}
