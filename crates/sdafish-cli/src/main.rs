use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

#[derive(Debug, Parser)]
#[command(
    name = "sdafish",
    version,
    disable_version_flag = true,
    propagate_version = true,
    about = "streaming k-mer-group-based estimation of transcript abundance"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Print version information.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version, global = true)]
    version: Option<bool>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Quantify transcript abundance from RNA-seq reads")]
    Quant {
        /// Directory holding the transcriptome index.
        #[arg(short = 'i', long)]
        index: PathBuf,
        /// Library format string, e.g. T=PE:O=><:S=SA.
        #[arg(short = 'l', long)]
        libtype: String,
        /// Files containing the #1 mates.
        #[arg(short = '1', long, num_args = 1..)]
        mates1: Vec<PathBuf>,
        /// Files containing the #2 mates.
        #[arg(short = '2', long, num_args = 1..)]
        mates2: Vec<PathBuf>,
        /// Files containing unmated reads.
        #[arg(short = 'r', long = "unmated-reads", alias = "unmated_reads", num_args = 1..)]
        unmated_reads: Vec<PathBuf>,
        /// Number of worker threads.
        #[arg(short = 'p', long, default_value_t = sdafish::quant::default_thread_count())]
        threads: usize,
        /// Output directory.
        #[arg(short = 'o', long)]
        output: PathBuf,
    },
}

fn main() {
    logging::init(log::LevelFilter::Info).expect("logger already installed");

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let result = match cli.command {
        Commands::Quant {
            index,
            libtype,
            mates1,
            mates2,
            unmated_reads,
            threads,
            output,
        } => commands::quant::run(commands::quant::QuantArgs {
            index,
            libtype,
            mates1,
            mates2,
            unmated_reads,
            threads,
            output,
        }),
    };

    if let Err(err) = result {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}
