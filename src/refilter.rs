use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pixelspots::decoder::RegionFilter;
use pixelspots::output::write_table;
use pixelspots::schemas::{region_fields, OutputFormat};
use pixelspots::tables::{determine_format, read_table_with_schema, refilter_region_table};

use arrow::datatypes::Schema;

#[derive(Parser, Debug)]
#[command(name = "pixelspots-refilter")]
#[command(about = "Recompute region pass/fail flags of a pixelspots region table under new cutoffs.")]
struct Args {
    regions: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    regions_fmt: OutputFormat,

    #[arg(long, default_value_t = 1)]
    min_area: usize,

    #[arg(long, default_value = None)]
    max_area: Option<usize>,

    #[arg(long, default_value = None)]
    max_distance: Option<f32>,

    #[arg(long, default_value_t = 0.0)]
    min_magnitude: f32,

    #[arg(long, default_value = "pixelspots-refiltered-regions.csv.gz")]
    output: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_fmt: OutputFormat,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let filter = RegionFilter {
        min_area: args.min_area,
        max_area: args.max_area.unwrap_or(usize::MAX),
        max_distance: args.max_distance.unwrap_or(f32::INFINITY),
        min_magnitude: args.min_magnitude,
    };
    filter.validate().context("Invalid refilter cutoffs")?;

    let input_fmt = determine_format(&args.regions, args.regions_fmt)?;
    let expected = Schema::new(region_fields(input_fmt));
    let (schema, batches) = read_table_with_schema(&args.regions, input_fmt, &expected)?;
    let batch = refilter_region_table(&schema, &batches, &filter)?;

    let npassing = batch
        .column(batch.schema().index_of("passes_thresholds")?)
        .as_any()
        .downcast_ref::<arrow::array::BooleanArray>()
        .map_or(0, |flags| flags.true_count());
    tracing::info!(
        regions = batch.num_rows(),
        passing = npassing,
        "refiltered regions"
    );

    write_table(&args.output, args.output_fmt, &batch)?;

    return Ok(());
}
