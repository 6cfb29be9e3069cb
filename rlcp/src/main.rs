use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use structopt::StructOpt;

use rlfs::{FileSystem, Instance, LocalFileSystem, OpenFlags};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "rlcp",
    about = "Copy files and directories through a rate-limited filesystem"
)]
struct Args {
    /// Source file or directory
    #[structopt(parse(from_os_str))]
    src: PathBuf,

    /// Destination file or directory
    #[structopt(parse(from_os_str))]
    dst: PathBuf,

    /// Read bandwidth in bytes per second, 0 means unlimited
    #[structopt(long, default_value = "0")]
    read_bw: u64,

    /// Write bandwidth in bytes per second, 0 means unlimited
    #[structopt(long, default_value = "0")]
    write_bw: u64,

    /// Burst size in bytes for reads and writes, 0 means no burst cap
    #[structopt(long, default_value = "0")]
    burst: u64,

    /// What to do when a quota is exhausted: blocking or non_blocking
    #[structopt(long, default_value = "blocking")]
    mode: String,

    /// Copy buffer size in bytes
    #[structopt(long, default_value = "131072")]
    chunk_size: usize,

    /// Show progress
    #[structopt(short, long)]
    progress: bool,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,

    /// Print summary statistics at the end
    #[structopt(long)]
    summary: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct CopySummary {
    files_copied: usize,
    directories_created: usize,
    bytes_copied: u64,
}

impl std::fmt::Display for CopySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files copied: {}\ndirectories created: {}\nbytes copied: {}",
            self.files_copied, self.directories_created, self.bytes_copied
        )
    }
}

struct Copier {
    fs: Arc<dyn FileSystem>,
    chunk_size: usize,
    progress: Option<indicatif::ProgressBar>,
}

impl Copier {
    fn copy_file(&self, src: &Path, dst: &Path, summary: &mut CopySummary) -> Result<()> {
        tracing::debug!("copy: {:?} -> {:?}", src, dst);
        let mut reader = self
            .fs
            .open(src, OpenFlags::read_only())
            .with_context(|| format!("rlcp: cannot open {:?} for reading", src))?;
        let mut writer = self
            .fs
            .open(dst, OpenFlags::write_only().with_create().with_truncate())
            .with_context(|| format!("rlcp: cannot open {:?} for writing", dst))?;
        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let n = self
                .fs
                .read(reader.as_mut(), &mut buffer)
                .with_context(|| format!("rlcp: failed reading from {:?}", src))?;
            if n == 0 {
                break;
            }
            let mut written = 0;
            while written < n {
                let w = self
                    .fs
                    .write(writer.as_mut(), &buffer[written..n])
                    .with_context(|| format!("rlcp: failed writing to {:?}", dst))?;
                written += w;
            }
            summary.bytes_copied += n as u64;
            if let Some(pbar) = &self.progress {
                pbar.inc(n as u64);
            }
        }
        writer
            .close()
            .with_context(|| format!("rlcp: failed closing {:?}", dst))?;
        reader.close()?;
        summary.files_copied += 1;
        Ok(())
    }

    fn copy_tree(&self, src: &Path, dst: &Path, summary: &mut CopySummary) -> Result<()> {
        if !self
            .fs
            .directory_exists(src)
            .with_context(|| format!("rlcp: failed reading metadata from {:?}", src))?
        {
            return self.copy_file(src, dst, summary);
        }
        self.fs
            .create_directory(dst)
            .with_context(|| format!("rlcp: cannot create directory {:?}", dst))?;
        summary.directories_created += 1;
        let mut entries = vec![];
        self.fs
            .list_files(src, &mut |name, is_dir| {
                entries.push((name.to_owned(), is_dir));
            })
            .with_context(|| format!("rlcp: cannot open directory {:?} for reading", src))?;
        for (name, _is_dir) in entries {
            self.copy_tree(&src.join(&name), &dst.join(&name), summary)?;
        }
        Ok(())
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn setup_instance(args: &Args) -> Result<Arc<dyn FileSystem>> {
    let instance = Instance::new();
    instance.register_backend(Arc::new(LocalFileSystem::new()))?;
    if args.read_bw > 0 {
        instance.set_quota("local", "read", args.read_bw as i64, &args.mode)?;
    }
    if args.write_bw > 0 {
        instance.set_quota("local", "write", args.write_bw as i64, &args.mode)?;
    }
    if args.burst > 0 {
        instance.set_burst("local", "read", args.burst as i64)?;
        instance.set_burst("local", "write", args.burst as i64)?;
    }
    let wrapped = instance.wrap("local")?;
    instance
        .backend(&wrapped)
        .ok_or_else(|| anyhow::anyhow!("rlcp: wrapped filesystem {} not found", wrapped))
}

fn main() -> Result<()> {
    let args = Args::from_args();
    init_logging(args.verbose);

    if args.burst > 0 && args.burst < args.chunk_size as u64 {
        return Err(anyhow::anyhow!(
            "rlcp: burst ({}) must be at least the chunk size ({}), \
             otherwise every chunk exceeds it",
            args.burst,
            args.chunk_size
        ));
    }

    let fs = setup_instance(&args)?;
    let progress = args.progress.then(|| {
        let pbar = indicatif::ProgressBar::new_spinner();
        pbar.set_style(
            indicatif::ProgressStyle::with_template(
                "{spinner} {bytes} copied ({bytes_per_sec})",
            )
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
        );
        pbar
    });

    let copier = Copier {
        fs,
        chunk_size: args.chunk_size.max(1),
        progress,
    };
    let mut summary = CopySummary::default();
    copier.copy_tree(&args.src, &args.dst, &mut summary)?;

    if let Some(pbar) = &copier.progress {
        pbar.finish_and_clear();
    }
    if args.summary {
        println!("{}", &summary);
    }
    Ok(())
}
