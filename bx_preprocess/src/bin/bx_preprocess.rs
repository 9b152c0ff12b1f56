use anyhow::{Context, Result};
use bx_preprocess::summary::write_summary_json;
use bx_preprocess::{CorrectBarcodes, CountBarcodes, PreprocessParams};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[clap(name = "bx_preprocess", version)]
struct Args {
    #[clap(subcommand)]
    subcmd: SubCommand,

    /// TOML file overriding the default preprocessing parameters.
    #[clap(long, value_name = "TOML", global = true)]
    params: Option<PathBuf>,

    /// Number of worker threads. Defaults to one per core.
    #[clap(long, value_name = "NUM", global = true)]
    threads: Option<usize>,
}

#[derive(Parser, Debug)]
enum SubCommand {
    /// Count whitelist barcode observations in read 1 FASTQs.
    #[clap(name = "count")]
    Count {
        /// Barcode whitelist, one barcode per line.
        #[clap(long, value_name = "PATH")]
        whitelist: PathBuf,

        /// Read 1 FASTQ files, optionally gzipped.
        #[clap(long, value_name = "PATH", required = true, value_delimiter = ',')]
        reads: Vec<PathBuf>,

        /// Output barcode dictionary.
        #[clap(long, value_name = "PATH")]
        output: PathBuf,

        /// Write run statistics to this JSON file.
        #[clap(long, value_name = "JSON")]
        summary: Option<PathBuf>,
    },

    /// Correct barcodes of read pairs and write tagged FASTQs.
    #[clap(name = "correct")]
    Correct {
        /// Barcode dictionary written by `count`.
        #[clap(long, value_name = "PATH")]
        counts: PathBuf,

        #[clap(long, value_name = "PATH")]
        r1: PathBuf,

        #[clap(long, value_name = "PATH")]
        r2: PathBuf,

        /// Output read 1 FASTQ, gzipped if the name ends in .gz.
        #[clap(long, value_name = "PATH")]
        out_r1: PathBuf,

        /// Output read 2 FASTQ, gzipped if the name ends in .gz.
        #[clap(long, value_name = "PATH")]
        out_r2: PathBuf,

        /// Write run statistics to this JSON file.
        #[clap(long, value_name = "JSON")]
        summary: Option<PathBuf>,
    },
}

fn inner_main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let params = match &args.params {
        Some(path) => PreprocessParams::from_toml_file(path)?,
        None => PreprocessParams::default(),
    };
    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("While configuring the thread pool")?;
    }
    info!("Running with {params:?}");

    match args.subcmd {
        SubCommand::Count {
            whitelist,
            reads,
            output,
            summary,
        } => {
            let stats = CountBarcodes {
                whitelist: &whitelist,
                reads: &reads,
                output: &output,
            }
            .run(&params)?;
            if let Some(path) = summary {
                write_summary_json(&path, &stats)?;
            }
        }
        SubCommand::Correct {
            counts,
            r1,
            r2,
            out_r1,
            out_r2,
            summary,
        } => {
            let stats = CorrectBarcodes {
                counts: &counts,
                read1: &r1,
                read2: &r2,
                out_read1: &out_r1,
                out_read2: &out_r2,
            }
            .run(&params)?;
            if let Some(path) = summary {
                write_summary_json(&path, &stats)?;
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
