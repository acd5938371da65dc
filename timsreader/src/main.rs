use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tofcore::timstof::filter::FilteringParams;

use timsreader::data::dataset::TimsTofDataset;
use timsreader::error::Result;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reconstruct spectra from a timsTOF DDA-PASEF or MRM .d directory", long_about = None)]
struct Args {
    /// Path to the .d directory
    #[arg(short, long)]
    data: String,

    /// Path to the Bruker timsdata shared library
    #[arg(short, long)]
    bruker_lib: String,

    /// Number of worker threads for frame decoding
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Keep only the N most intense peaks per spectrum window
    #[arg(long)]
    peaks_per_window: Option<usize>,

    /// Number of m/z windows for the peak filter
    #[arg(long)]
    number_of_windows: Option<usize>,

    /// Drop peaks below this fraction of the base peak
    #[arg(long)]
    min_ratio: Option<f64>,

    /// Write the per-scan summary as JSON to this path
    #[arg(long)]
    json: Option<String>,
}

fn filtering_from_args(args: &Args) -> Option<FilteringParams> {
    if args.peaks_per_window.is_none() && args.min_ratio.is_none() {
        return None;
    }
    Some(FilteringParams {
        peaks_per_window: args.peaks_per_window,
        number_of_windows: args.number_of_windows,
        min_ratio_to_base_peak: args.min_ratio,
        ..FilteringParams::default()
    })
}

fn run(args: &Args) -> Result<()> {
    let filtering = filtering_from_args(args);
    let dataset = TimsTofDataset::load(
        &args.data,
        &args.bruker_lib,
        args.threads,
        filtering.as_ref(),
    )?;

    let ms1_count = dataset.scans.iter().filter(|s| s.ms_order == 1).count();
    info!(
        scans = dataset.num_scans(),
        ms1 = ms1_count,
        ms2 = dataset.num_scans() - ms1_count,
        "finished reconstructing scans"
    );

    match &args.json {
        Some(path) => {
            let summaries = dataset.summaries();
            let json = serde_json::to_string_pretty(&summaries).map_err(|e| {
                timsreader::error::TimsReaderError::Resource(format!(
                    "failed to serialize summary: {}",
                    e
                ))
            })?;
            std::fs::write(path, json).map_err(|e| {
                timsreader::error::TimsReaderError::Resource(format!(
                    "failed to write {}: {}",
                    path, e
                ))
            })?;
            info!(path = path.as_str(), "wrote scan summary");
        }
        None => {
            for summary in dataset.summaries() {
                println!(
                    "#{:<6} MS{} rt={:.3}min 1/K0={:.4} peaks={} tic={:.0} {}",
                    summary.scan_number.unwrap_or(0),
                    summary.ms_order,
                    summary.retention_time,
                    summary.median_one_over_k0,
                    summary.num_peaks,
                    summary.total_ion_current,
                    summary.native_id,
                );
            }
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
