//! A thin CLI harness for exercising the `jbtree` engine directly: format a
//! disk, insert and look up records, and dump a tree's on-disk shape for
//! diagnosis. Not a query language or a REPL — every subcommand maps onto
//! exactly one library call.
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use jbtree::jdisk::{FileJDisk, SECTOR_SIZE};
use jbtree::{err, Error, Tree};
use tracing::error;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "jbtreectl", version = VERSION, about = "Inspect and drive a jbtree disk file.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format a new disk file with an empty tree.
    Create {
        path: PathBuf,
        /// Disk size in bytes; must be a multiple of the 1024-byte sector size.
        size: i64,
        /// Key width in bytes.
        key_size: i32,
    },
    /// Look up a key, printing its payload LBA (0 if absent).
    Find {
        path: PathBuf,
        /// The key, taken as raw bytes of the argument and zero-padded or
        /// truncated to the tree's key size.
        key: String,
    },
    /// Insert or overwrite a key's record, printing the payload LBA.
    Insert {
        path: PathBuf,
        key: String,
        /// File whose contents become the 1024-byte record (zero-padded if shorter).
        record_file: PathBuf,
    },
    /// Print the tree's on-disk shape: every node's lba, kind, keys, and LBAs.
    Dump { path: PathBuf },
}

fn fit_key(raw: &str, key_size: u32) -> Vec<u8> {
    let mut key = raw.as_bytes().to_vec();
    key.resize(key_size as usize, 0);
    key.truncate(key_size as usize);
    key
}

fn fit_record(bytes: &[u8]) -> Result<[u8; SECTOR_SIZE], Error> {
    if bytes.len() > SECTOR_SIZE {
        return Err(err!(
            InvalidArgument,
            "record file is {} bytes, exceeds the {}-byte sector size",
            bytes.len(),
            SECTOR_SIZE
        ));
    }
    let mut buf = [0u8; SECTOR_SIZE];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

fn build_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut result = String::new();
    let num_columns = headers.len();

    let mut column_widths = vec![0; num_columns];
    for (i, header) in headers.iter().enumerate() {
        column_widths[i] = header.len();
    }
    for row in rows {
        for (i, col) in row.iter().enumerate() {
            column_widths[i] = column_widths[i].max(col.len());
        }
    }

    let border = |result: &mut String| {
        result.push('+');
        for width in &column_widths {
            result.push_str(&"-".repeat(*width));
            result.push('+');
        }
        result.push('\n');
    };

    border(&mut result);
    result.push('|');
    for (i, header) in headers.iter().enumerate() {
        result.push_str(&format!("{:<width$}|", header, width = column_widths[i]));
    }
    result.push('\n');
    border(&mut result);
    for row in rows {
        result.push('|');
        for (i, col) in row.iter().enumerate() {
            result.push_str(&format!("{:<width$}|", col, width = column_widths[i]));
        }
        result.push('\n');
    }
    border(&mut result);
    result
}

fn run(cli: Cli) -> Result<String, Error> {
    match cli.command {
        Command::Create { path, size, key_size } => {
            let disk = FileJDisk::create(&path, size)?;
            let tree = Tree::create(disk, key_size)?;
            Ok(format!(
                "created {} ({} bytes, key_size={})",
                path.display(),
                size,
                tree.key_size()
            ))
        }
        Command::Find { path, key } => {
            let disk = FileJDisk::attach(&path)?;
            let mut tree = Tree::attach(disk)?;
            let key = fit_key(&key, tree.key_size());
            let lba = tree.find(&key)?;
            Ok(lba.to_string())
        }
        Command::Insert { path, key, record_file } => {
            let disk = FileJDisk::attach(&path)?;
            let mut tree = Tree::attach(disk)?;
            let key = fit_key(&key, tree.key_size());
            let bytes = fs::read(&record_file)?;
            let record = fit_record(&bytes)?;
            let lba = tree.insert(&key, &record)?;
            Ok(lba.to_string())
        }
        Command::Dump { path } => {
            let disk = FileJDisk::attach(&path)?;
            let mut tree = Tree::attach(disk)?;
            let headers = vec![
                "lba".to_string(),
                "internal".to_string(),
                "nkeys".to_string(),
                "keys".to_string(),
                "child/payload lbas".to_string(),
            ];
            let rows: Vec<Vec<String>> = tree
                .dump_nodes()?
                .into_iter()
                .map(|row| {
                    let keys = row
                        .keys
                        .iter()
                        .map(|k| String::from_utf8_lossy(k).into_owned())
                        .collect::<Vec<_>>()
                        .join(",");
                    let lbas = row
                        .lbas
                        .iter()
                        .map(|l| l.to_string())
                        .collect::<Vec<_>>()
                        .join(",");
                    vec![
                        row.lba.to_string(),
                        row.internal.to_string(),
                        row.nkeys.to_string(),
                        keys,
                        lbas,
                    ]
                })
                .collect();
            Ok(build_table(&headers, &rows))
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("JBTREE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(%e, "jbtreectl failed");
            ExitCode::FAILURE
        }
    }
}
