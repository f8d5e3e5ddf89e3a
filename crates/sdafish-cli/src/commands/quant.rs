use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use log::info;

use sdafish::cluster::ClusterForest;
use sdafish::index::{load_transcript_table, KmerIndex};
use sdafish::io::PairedReader;
use sdafish::library::{LibraryFormat, ReadType};
use sdafish::quant::{quantify, write_quant_sf, QuantConfig};
use sdafish::transcript::build_transcript_table;

pub struct QuantArgs {
    pub index: PathBuf,
    pub libtype: String,
    pub mates1: Vec<PathBuf>,
    pub mates2: Vec<PathBuf>,
    pub unmated_reads: Vec<PathBuf>,
    pub threads: usize,
    pub output: PathBuf,
}

pub fn run(args: QuantArgs) -> Result<()> {
    let library: LibraryFormat = args
        .libtype
        .parse()
        .with_context(|| format!("cannot parse library type {:?}", args.libtype))?;
    info!("library format: {library}");

    if library.read_type == ReadType::SingleEnd || !args.unmated_reads.is_empty() {
        return Err(anyhow!("single-end libraries are not supported"));
    }
    if args.mates1.is_empty() || args.mates2.is_empty() {
        return Err(anyhow!(
            "paired-end quantification requires both --mates1 and --mates2"
        ));
    }
    for path in args.mates1.iter().chain(args.mates2.iter()) {
        if !path.exists() {
            return Err(anyhow!("reads file {} does not exist", path.display()));
        }
    }

    fs::create_dir_all(&args.output)
        .with_context(|| format!("cannot create output directory {}", args.output.display()))?;

    info!("loading index from {}", args.index.display());
    let index = KmerIndex::load(&args.index).context("failed to load k-mer index")?;
    info!(
        "index contains {} k-mers of length {}",
        index.num_kmers(),
        index.k()
    );
    let transcript_infos =
        load_transcript_table(&args.index).context("failed to load transcript table")?;
    info!("transcript table contains {} records", transcript_infos.len());

    let transcripts = build_transcript_table(transcript_infos);
    let forest = ClusterForest::new(transcripts.len());
    let mut pairs = PairedReader::new(args.mates1, args.mates2);

    let config = QuantConfig {
        num_threads: args.threads.max(1),
        ..QuantConfig::default()
    };

    let start = Instant::now();
    let stats = quantify(&index, &transcripts, &forest, &mut pairs, &config)
        .context("quantification failed")?;
    let (left_bases, right_bases) = stats.total_bases();
    info!(
        "mapped {} of {} read pairs ({left_bases} + {right_bases} bases) in {:.2?}",
        stats.num_mapped_pairs(),
        stats.num_read_pairs(),
        start.elapsed()
    );

    let output_file = args.output.join("quant.sf");
    write_quant_sf(&output_file, &transcripts, &forest, stats.num_read_pairs())
        .context("failed to write quantification output")?;
    info!("wrote {}", output_file.display());
    Ok(())
}
