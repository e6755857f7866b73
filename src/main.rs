use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use regex::Regex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use pixelspots::codebook::read_codebook_json;
use pixelspots::decoder::{Connectivity, DecoderParams, DistanceMetric, NormOrder, PixelSpotDecoder};
use pixelspots::filters::{scale_by_percentile, zero_by_channel_magnitude};
use pixelspots::output::{write_labels, write_regions, write_target_counts};
use pixelspots::schemas::OutputFormat;
use pixelspots::stack::read_stack_table;

#[derive(Parser, Debug)]
#[command(name = "pixelspots")]
#[command(about = "Decode a multiplexed image stack pixel by pixel and report connected spots.")]
struct Args {
    // long-format table with round, channel, z, y, x, intensity columns
    stack: String,
    codebook: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    stack_fmt: OutputFormat,

    #[arg(long, default_value = "(?i)^blank")]
    blank_pattern: String,

    #[arg(long, default_value = None)]
    scale_percentile: Option<f32>,

    #[arg(long, default_value = None)]
    zero_channel_magnitude: Option<f32>,

    #[arg(long, default_value_t = false)]
    normalize_channel_magnitude: bool,

    #[arg(long, value_enum, default_value_t = DistanceMetric::Euclidean)]
    metric: DistanceMetric,

    #[arg(long, value_enum, default_value_t = NormOrder::L2)]
    norm_order: NormOrder,

    #[arg(long, default_value_t = false)]
    normalize_traces: bool,

    #[arg(long, default_value_t = 0.5176)]
    distance_threshold: f32,

    #[arg(long, default_value_t = 1.77e-5)]
    magnitude_threshold: f32,

    #[arg(long, default_value_t = 1)]
    min_area: usize,

    #[arg(long, default_value = None)]
    max_area: Option<usize>,

    #[arg(long, value_enum, default_value_t = Connectivity::Eight)]
    connectivity: Connectivity,

    #[arg(long, default_value = "pixelspots-regions.csv.gz")]
    output_regions: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_regions_fmt: OutputFormat,

    #[arg(long, default_value = None)]
    output_labels: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_labels_fmt: OutputFormat,

    #[arg(long, default_value = None)]
    output_counts: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_counts_fmt: OutputFormat,

    #[arg(short = 't', long, default_value = None)]
    nthreads: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Some(nthreads) = args.nthreads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build_global()
            .context("Unable to configure thread pool")?;
    }
    tracing::info!(threads = rayon::current_num_threads(), "starting");

    let blank_pattern = Regex::new(&args.blank_pattern)
        .with_context(|| format!("Invalid --blank-pattern '{}'", args.blank_pattern))?;

    let mut stack = read_stack_table(&args.stack, args.stack_fmt)?;
    let codebook = read_codebook_json(
        &args.codebook,
        Some(stack.nrounds()),
        Some(stack.nchannels()),
        Some(&blank_pattern),
    )?;

    if let Some(p) = args.scale_percentile {
        stack = scale_by_percentile(&stack, p)?;
    }

    if let Some(thresh) = args.zero_channel_magnitude {
        stack = zero_by_channel_magnitude(&stack, thresh, args.normalize_channel_magnitude)?;
    }

    let params = DecoderParams {
        metric: args.metric,
        norm_order: args.norm_order,
        normalize: args.normalize_traces,
        distance_threshold: args.distance_threshold,
        magnitude_threshold: args.magnitude_threshold,
        min_area: args.min_area,
        max_area: args.max_area.unwrap_or(usize::MAX),
        connectivity: args.connectivity,
    };
    let decoder = PixelSpotDecoder::new(&codebook, params)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("decoding pixels");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let spots = decoder.decode(&stack)?;
    spinner.finish_and_clear();

    write_regions(&args.output_regions, args.output_regions_fmt, &spots)?;
    write_labels(&args.output_labels, args.output_labels_fmt, &spots)?;
    write_target_counts(&args.output_counts, args.output_counts_fmt, &spots)?;

    return Ok(());
}
