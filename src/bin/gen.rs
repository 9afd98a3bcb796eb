//! ubx-gen: CLI tool for compiling filter lists into UBX snapshots.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use ubx::snapshot::Snapshot;
use ubx::{CompileOptions, Compiler};

#[derive(Parser)]
#[command(name = "ubx-gen")]
#[command(version = "0.1.0")]
#[command(about = "Compile ABP/uBO filter lists into UBX snapshots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile one or more filter-list files into a snapshot
    Compile {
        /// Input filter-list files, in precedence order
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Output snapshot file
        #[arg(short, long)]
        output: PathBuf,

        /// Public suffix list file (built-in default when omitted)
        #[arg(long)]
        psl: Option<PathBuf>,

        /// Skip CRC32 checksums
        #[arg(long)]
        no_crc: bool,

        /// Print compile statistics as JSON
        #[arg(short, long)]
        stats: bool,
    },

    /// Validate a snapshot and print its metadata
    Inspect {
        /// Snapshot file
        input: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            psl,
            no_crc,
            stats,
        } => compile(&input, &output, psl.as_deref(), no_crc, stats),
        Commands::Inspect { input } => inspect(&input),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn compile(
    inputs: &[PathBuf],
    output: &PathBuf,
    psl: Option<&std::path::Path>,
    no_crc: bool,
    stats: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = CompileOptions {
        with_crc: !no_crc,
        ..Default::default()
    };
    if let Some(path) = psl {
        options.psl_text = fs::read_to_string(path)?;
    }

    let texts: Vec<String> = inputs
        .iter()
        .map(fs::read_to_string)
        .collect::<Result<_, _>>()?;
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

    let out = Compiler::new(options).compile(&refs)?;
    fs::write(output, &out.snapshot)?;

    log::info!(
        "wrote {} ({} bytes, {} rules)",
        output.display(),
        out.snapshot.len(),
        out.stats.rules_after
    );
    if stats {
        println!("{}", serde_json::to_string_pretty(&out.stats)?);
    }
    Ok(())
}

fn inspect(input: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = Snapshot::open(input)?;
    println!("size:       {} bytes", snapshot.size());
    println!("build id:   {}", snapshot.build_id());
    println!("rule count: {}", snapshot.rule_count());
    Ok(())
}
