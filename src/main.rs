use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;

use methyl_align::errors::Result;
use methyl_align::index::MethylIndex;
use methyl_align::map_opt::MapOpt;
use methyl_align::paired_end::map_paired_ended;
use methyl_align::sam::write_header;
use methyl_align::single_end::map_single_ended;

#[derive(Parser)]
#[command(name = "methyl-align")]
#[command(about = "Map bisulfite-converted reads to an indexed genome", long_about = None)]
#[command(version)]
struct Cli {
    /// Index file built by the external indexer
    #[arg(short = 'i', long, value_name = "FILE")]
    index: PathBuf,

    /// SAM output file (stdout if omitted)
    #[arg(short = 'o', long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Stats output file (default: <output>.mapstats)
    #[arg(short = 'm', long, value_name = "FILE")]
    mapstats: Option<PathBuf>,

    /// Worker threads
    #[arg(short = 't', long, value_name = "INT", default_value = "1")]
    threads: usize,

    /// Reads to load at once
    #[arg(short = 'b', long, value_name = "INT", default_value = "20000")]
    batch: usize,

    /// Max candidates for full comparison (0 derives it from genome size)
    #[arg(short = 'c', long, value_name = "INT", default_value = "0")]
    candidates: u32,

    /// Sensitive mode: raise the candidate cap
    #[arg(short = 's', long)]
    sensitive: bool,

    /// Max candidates as mates (paired-end mode)
    #[arg(short = 'p', long, value_name = "INT", default_value = "20")]
    max_mates: usize,

    /// Min fragment size (paired-end mode)
    #[arg(short = 'l', long, value_name = "INT", default_value = "32")]
    min_frag: u32,

    /// Max fragment size (paired-end mode)
    #[arg(short = 'L', long, value_name = "INT", default_value = "3000")]
    max_frag: u32,

    /// Max fractional edit distance of a reported hit
    #[arg(short = 'M', long, value_name = "FLOAT", default_value = "0.1")]
    max_frac_edits: f32,

    /// Report a position for ambiguous mappers (flagged secondary)
    #[arg(short = 'a', long)]
    ambig: bool,

    /// Input data follow the PBAT protocol
    #[arg(short = 'P', long)]
    pbat: bool,

    /// Input data follow random PBAT
    #[arg(short = 'R', long)]
    random_pbat: bool,

    /// Single-end reads are A-rich
    #[arg(short = 'A', long)]
    a_rich: bool,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// One FASTQ file for single-end, two for paired-end (.gz accepted)
    #[arg(value_name = "READS.FQ", required = true, num_args = 1..=2)]
    reads: Vec<PathBuf>,
}

fn run(cli: &Cli) -> Result<()> {
    let opt = MapOpt {
        n_threads: rayon::current_num_threads(),
        batch_size: cli.batch,
        max_candidates: cli.candidates,
        sensitive: cli.sensitive,
        max_mates: cli.max_mates,
        min_frag: cli.min_frag,
        max_frag: cli.max_frag,
        valid_frac: cli.max_frac_edits,
        allow_ambig: cli.ambig,
        pbat: cli.pbat,
        random_pbat: cli.random_pbat,
        a_rich: cli.a_rich,
    };

    log::info!("loading index {}", cli.index.display());
    let load_start = Instant::now();
    let index = MethylIndex::read_from_path(&cli.index)?;
    log::info!(
        "loaded index ({} chromosomes, {} bp) in {:.2} sec",
        index.chrom_lookup().names().len(),
        index.genome_size(),
        load_start.elapsed().as_secs_f64()
    );

    let max_candidates = opt.check_against_index(&index)?;
    log::info!("using up to {max_candidates} candidates per seed");

    let mut writer: BufWriter<Box<dyn Write>> = match &cli.output {
        Some(path) => BufWriter::new(Box::new(File::create(path)?)),
        None => BufWriter::new(Box::new(io::stdout())),
    };

    let command_line: Vec<String> = std::env::args().collect();
    write_header(&mut writer, index.chrom_lookup(), &command_line.join(" "))?;

    let stats = if cli.reads.len() == 2 {
        let (file1, file2) = (
            cli.reads[0].to_string_lossy().to_string(),
            cli.reads[1].to_string_lossy().to_string(),
        );
        log::info!("mapping paired end: {file1} {file2}");
        map_paired_ended(&index, &opt, max_candidates, &file1, &file2, &mut writer)?.to_string()
    } else {
        let file = cli.reads[0].to_string_lossy().to_string();
        log::info!("mapping single end: {file}");
        map_single_ended(&index, &opt, max_candidates, &file, &mut writer)?.to_string()
    };
    writer.flush()?;

    let stats_path = cli.mapstats.clone().unwrap_or_else(|| match &cli.output {
        Some(out) => {
            let mut p = out.clone().into_os_string();
            p.push(".mapstats");
            PathBuf::from(p)
        }
        None => PathBuf::from("methyl-align.mapstats"),
    });
    std::fs::write(&stats_path, stats)?;
    log::info!("wrote stats to {}", stats_path.display());

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .format_timestamp(None)
        .format_target(false)
        .init();

    let mut num_threads = cli.threads.max(1);
    let max_threads = num_cpus::get() * 2;
    if num_threads > max_threads {
        log::warn!("thread count {num_threads} exceeds recommended maximum, capping at {max_threads}");
        num_threads = max_threads;
    }
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
    {
        log::warn!("failed to configure thread pool: {e}");
    }
    log::info!("using {num_threads} threads for mapping");

    if let Err(e) = run(&cli) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
