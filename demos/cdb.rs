use cdb::{Cdb, CdbBuilder, CdbError};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> cdb::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Make(args) => run_make(args),
        Command::Dump(args) => run_dump(args),
        Command::Get(args) => run_get(args),
        Command::Info(args) => run_info(args),
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "cdb utility for creating, dumping and querying constant databases",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a cdb file from text records read on stdin
    Make(MakeArgs),
    /// Write every record of a cdb file to stdout in text form
    Dump(DumpArgs),
    /// Look up a key and print its values
    Get(GetArgs),
    /// Print the table layout of a cdb file
    Info(InfoArgs),
}

#[derive(clap::Args)]
struct MakeArgs {
    /// Path of the cdb file to produce
    #[arg(value_name = "CDB")]
    output: PathBuf,

    /// Temporary file renamed onto the output once complete
    #[arg(value_name = "TEMP")]
    temp: PathBuf,

    /// Skip records whose data is a key of this cdb file
    #[arg(long, value_name = "CDB")]
    ignore: Option<PathBuf>,

    /// Writer buffer size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = 16 << 20)]
    buffer_size: usize,
}

#[derive(clap::Args)]
struct DumpArgs {
    /// Path to the cdb file
    #[arg(value_name = "CDB")]
    input: PathBuf,
}

#[derive(clap::Args)]
struct GetArgs {
    /// Path to the cdb file
    #[arg(value_name = "CDB")]
    input: PathBuf,

    /// Key to look up
    key: String,

    /// Print every value stored under the key, not only the first
    #[arg(short, long)]
    all: bool,

    /// Report read errors instead of treating them as missing values
    #[arg(long)]
    strict: bool,
}

#[derive(clap::Args)]
struct InfoArgs {
    /// Path to the cdb file
    #[arg(value_name = "CDB")]
    input: PathBuf,
}

fn run_make(args: MakeArgs) -> cdb::Result<()> {
    let builder = CdbBuilder::default().with_writer_buffer_size(args.buffer_size);
    let stdin = std::io::stdin().lock();
    let info = match args.ignore {
        Some(ignore) => {
            let ignore = Cdb::open(ignore)?;
            builder.make_from_text_excluding(stdin, &args.output, &args.temp, &ignore)?
        }
        None => builder.make_from_text(stdin, &args.output, &args.temp)?,
    };
    print_json(&info)
}

fn run_dump(args: DumpArgs) -> cdb::Result<()> {
    let mut out = BufWriter::new(std::io::stdout().lock());
    cdb::text::dump(cdb::entries(&args.input)?, &mut out)?;
    out.flush()?;
    Ok(())
}

fn run_get(args: GetArgs) -> cdb::Result<()> {
    let cdb = Cdb::open(&args.input)?;
    let key = args.key.as_bytes();
    let mut out = std::io::stdout().lock();
    let mut cursor = cdb.find_start(key);
    loop {
        let value = if args.strict {
            cdb.try_find_next(&mut cursor)?
        } else {
            cdb.find_next(&mut cursor)
        };
        let Some(value) = value else {
            break;
        };
        out.write_all(&value)?;
        out.write_all(b"\n")?;
        if !args.all {
            break;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct TableInfo {
    bucket: usize,
    position: u32,
    slot_count: u32,
}

#[derive(Serialize)]
struct FileInfo {
    end_of_data: u32,
    empty_buckets: usize,
    tables: Vec<TableInfo>,
}

fn run_info(args: InfoArgs) -> cdb::Result<()> {
    let cdb = Cdb::open(&args.input)?;
    let Some(header) = cdb.header() else {
        return Err(CdbError::CorruptFormat(format!(
            "{} is shorter than a cdb header",
            args.input.display()
        )));
    };
    let info = FileInfo {
        end_of_data: header.end_of_data(),
        empty_buckets: header.buckets.iter().filter(|b| b.is_empty()).count(),
        tables: header
            .buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty())
            .map(|(bucket, b)| TableInfo {
                bucket,
                position: b.position,
                slot_count: b.slot_count,
            })
            .collect(),
    };
    print_json(&info)
}

fn print_json<T: Serialize>(value: &T) -> cdb::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::other(format!("Failed to format JSON: {e}")))?;
    println!("{}", json);
    Ok(())
}
