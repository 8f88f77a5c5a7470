//! blobdir command-line driver.
//!
//! Inspect and exercise a blobdir database from the shell.
//!
//! Usage:
//!   # Create the tables (once per database)
//!   blobdir --db index.db provision
//!
//!   # Look around
//!   blobdir --db index.db ls
//!   blobdir --db index.db stat _0.cfs
//!
//!   # Run the exclusive-writer demo; start two at once to watch them take turns
//!   blobdir --db index.db demo --rounds 10

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use blobdir::{DirError, Directory, DirectoryConfig, Store};

/// Virtual index directory stored in SQLite.
#[derive(Parser, Debug)]
#[command(name = "blobdir")]
#[command(about = "Inspect and exercise a blobdir database")]
struct Args {
    /// Database file (default: <data dir>/blobdir/index.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory config in RON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the required tables
    Provision {
        /// Drop existing tables (and all content) first
        #[arg(long)]
        drop: bool,
    },
    /// List live files
    Ls,
    /// Show length and modified time of a file
    Stat { name: String },
    /// Write a file's content to stdout
    Cat { name: String },
    /// Store a local file under NAME
    Put { name: String, file: PathBuf },
    /// Delete a file
    Rm { name: String },
    /// Rename a file
    Mv { from: String, to: String },
    /// Bump a file's modified time
    Touch { name: String },
    /// Inspect or clear locks
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
    /// Repeatedly take the write lock, write a segment, release, verify
    Demo {
        /// Number of segments to write
        #[arg(long, default_value_t = 10)]
        rounds: usize,

        /// Records per segment
        #[arg(long, default_value_t = 1000)]
        records: usize,
    },
}

#[derive(Subcommand, Debug)]
enum LockAction {
    /// Show who holds a lock and until when
    Status { name: Option<String> },
    /// Remove a lock whoever holds it
    Clear { name: Option<String> },
}

/// Fixed record width for demo segments.
const RECORD_SIZE: usize = 100;

const SAMPLE_TERMS: &[&str] = &[
    "dog", "cat", "car", "horse", "door", "tree", "chair", "apple", "golf", "linux", "windows",
    "mouse", "hornet", "monkey", "giraffe", "computer", "monitor", "love", "hate", "fast", "slow",
    "new", "old",
];

fn main() -> Result<()> {
    // Logs go to stderr so `cat` output stays clean
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DirectoryConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DirectoryConfig::default(),
    };
    let db_path = match args.db {
        Some(path) => path,
        None => default_db_path()?,
    };

    let store = Store::open(&db_path, &config)
        .with_context(|| format!("opening {}", db_path.display()))?;

    match args.command {
        Command::Provision { drop } => {
            store.provision(drop)?;
            println!("provisioned {}", db_path.display());
            Ok(())
        }
        Command::Demo { rounds, records } => run_demo(store, rounds, records),
        command => run_command(open_directory(store)?, command),
    }
}

/// Default database path, creating its parent directory.
fn default_db_path() -> Result<PathBuf> {
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blobdir")
        .join("index.db");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(path)
}

fn open_directory(store: Store) -> Result<Directory> {
    match Directory::new(store) {
        Ok(dir) => Ok(dir),
        Err(DirError::NotProvisioned(table)) => {
            bail!("database is missing table {table}; run `blobdir provision` first")
        }
        Err(e) => Err(e.into()),
    }
}

fn run_command(dir: Directory, command: Command) -> Result<()> {
    match command {
        Command::Ls => {
            for name in dir.list_files()? {
                println!("{name}");
            }
        }
        Command::Stat { name } => {
            let record = dir.file_record(&name)?;
            let info = dir.blob_info(&name)?;
            println!("name:       {}", record.name);
            println!("id:         {}", record.id);
            println!("length:     {}", info.length);
            println!("chunk size: {}", info.chunk_size);
            println!("modified:   {}", format_time(record.last_touched()));
        }
        Command::Cat { name } => {
            let mut input = dir.open_input(&name)?;
            let mut stdout = std::io::stdout().lock();
            std::io::copy(&mut input, &mut stdout)?;
            stdout.flush()?;
        }
        Command::Put { name, file } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let mut lock = dir.write_lock();
            lock.obtain_timeout(dir.config().lock_lease())?;
            let mut out = dir.create_output(&name)?;
            out.write(&data)?;
            out.close()?;
            println!("{name}: {} bytes", data.len());
        }
        Command::Rm { name } => dir.delete_file(&name)?,
        Command::Mv { from, to } => dir.rename_file(&from, &to)?,
        Command::Touch { name } => dir.touch_file(&name)?,
        Command::Lock { action } => run_lock(&dir, action)?,
        other => bail!("{other:?} does not run against an open directory"),
    }
    Ok(())
}

fn run_lock(dir: &Directory, action: LockAction) -> Result<()> {
    let default_name = || dir.config().write_lock_name.clone();
    match action {
        LockAction::Status { name } => {
            let name = name.unwrap_or_else(default_name);
            match dir.locks().record(&name)? {
                Some(record) => {
                    let state = if dir.locks().is_locked(&name)? { "held" } else { "expired" };
                    println!(
                        "{name}: {state} by {} until {}",
                        record.owner,
                        format_time(UNIX_EPOCH + Duration::from_millis(record.release_at.max(0) as u64))
                    );
                }
                None => println!("{name}: free"),
            }
        }
        LockAction::Clear { name } => {
            let name = name.unwrap_or_else(default_name);
            dir.clear_lock(&name)?;
            println!("{name}: cleared");
        }
    }
    Ok(())
}

/// The exclusive-writer demo.
///
/// Every round takes the write lock (waiting while another process holds
/// it), writes one segment of fixed-size records, releases the lock and
/// reads the segment back.
fn run_demo(store: Store, rounds: usize, records: usize) -> Result<()> {
    ensure_provisioned(&store)?;
    let dir = Directory::new(store)?;
    let pid = std::process::id();

    for round in 0..rounds {
        let mut lock = dir.write_lock();
        loop {
            match lock.obtain() {
                Ok(()) => break,
                Err(e) if e.is_retryable() => {
                    println!("Lock is taken, waiting for timeout...");
                    std::thread::sleep(dir.config().lock_poll_interval());
                }
                Err(e) => return Err(e.into()),
            }
        }
        println!("write lock obtained, this process has exclusive write access");

        let name = format!("seg_{pid}_{round}");
        let started = Instant::now();
        let mut out = dir.create_output(&name)?;
        for i in 0..records {
            out.write(&demo_record(round, i))?;
        }
        out.close()?;
        lock.release()?;
        println!("{name}: wrote {records} records in {:?}", started.elapsed());

        verify_segment(&dir, &name, round, records)?;
    }

    println!("files in directory: {}", dir.list_files()?.len());
    Ok(())
}

/// Create whichever tables are missing, leaving existing ones and their rows alone.
fn ensure_provisioned(store: &Store) -> Result<()> {
    if let Err(DirError::NotProvisioned(table)) = store.check_provisioned() {
        tracing::info!(missing = %table, "provisioning missing tables");
        store.provision(false)?;
    }
    Ok(())
}

fn verify_segment(dir: &Directory, name: &str, round: usize, records: usize) -> Result<()> {
    let started = Instant::now();
    let expected_len = (records * RECORD_SIZE) as u64;
    let actual_len = dir.file_length(name)?;
    if actual_len != expected_len {
        bail!("{name}: expected {expected_len} bytes, found {actual_len}");
    }

    let mut input = dir.open_input(name)?;
    let mut buf = [0u8; RECORD_SIZE];
    for i in 0..records {
        input.read_exact(&mut buf)?;
        if buf != demo_record(round, i) {
            bail!("{name}: record {i} does not match what was written");
        }
    }
    println!("{name}: verified in {:?}", started.elapsed());
    Ok(())
}

/// Deterministic record `i` of segment `round`, padded to `RECORD_SIZE`.
fn demo_record(round: usize, i: usize) -> [u8; RECORD_SIZE] {
    let mut record = [0u8; RECORD_SIZE];
    let mut text = format!("{round}:{i} dog");
    let mut k = round * 31 + i;
    while text.len() < RECORD_SIZE {
        text.push(' ');
        text.push_str(SAMPLE_TERMS[k % SAMPLE_TERMS.len()]);
        k = k.wrapping_mul(7).wrapping_add(3);
    }
    record.copy_from_slice(&text.as_bytes()[..RECORD_SIZE]);
    record
}

fn format_time(t: SystemTime) -> String {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => format!("{}.{:03} (unix)", d.as_secs(), d.subsec_millis()),
        Err(_) => "before epoch".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_provisioned_keeps_existing_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.db");
        let store = Store::open(&path, &DirectoryConfig::default()).unwrap();
        store.provision(false).unwrap();

        let dir = Directory::new(store).unwrap();
        let mut out = dir.create_output("seg_0").unwrap();
        out.write(b"kept").unwrap();
        out.close().unwrap();
        drop(out);
        let store = dir.into_store();

        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE file_locks;")
            .unwrap();
        assert!(matches!(store.check_provisioned(), Err(DirError::NotProvisioned(_))));

        ensure_provisioned(&store).unwrap();
        let dir = Directory::new(store).unwrap();
        assert_eq!(dir.list_files().unwrap(), vec!["seg_0"]);
        assert_eq!(dir.file_length("seg_0").unwrap(), 4);
    }

    #[test]
    fn test_demo_record_is_fixed_width() {
        let a = demo_record(0, 0);
        let b = demo_record(0, 1);
        assert_eq!(a.len(), RECORD_SIZE);
        assert_ne!(a, b);
        assert_eq!(demo_record(3, 7), demo_record(3, 7));
    }
}
