use anyhow::{bail, Context, Result};
use arrow::array::{
    ArrayRef, BooleanArray, Float32Array, LargeStringArray, RecordBatch, StringArray, UInt32Array,
};
use arrow::csv;
use arrow::error::ArrowError;
use flate2::write::GzEncoder;
use flate2::Compression;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression::ZSTD, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use tracing::info;

use crate::decoder::{DecodedSpots, RegionRecord};
use crate::schemas::{
    label_table_schema, region_table_schema, target_count_schema, OutputFormat,
};
use crate::tables::determine_format;

pub fn write_table(filename: &str, fmt: OutputFormat, batch: &RecordBatch) -> Result<()> {
    let fmt = determine_format(filename, fmt)?;
    let file =
        File::create(filename).with_context(|| format!("Unable to create '{}'", filename))?;

    match fmt {
        OutputFormat::Csv => {
            write_table_csv(file, batch)
                .with_context(|| format!("Error writing csv file: {}", filename))?;
        }
        OutputFormat::CsvGz => {
            let mut encoder = GzEncoder::new(file, Compression::default());
            write_table_csv(&mut encoder, batch)
                .with_context(|| format!("Error writing csv.gz file: {}", filename))?;
            encoder.finish()?;
        }
        OutputFormat::Parquet => {
            write_table_parquet(file, batch)
                .with_context(|| format!("Error writing parquet file: {}", filename))?;
        }
        OutputFormat::Infer => bail!("Indeterminable output format for '{}'", filename),
    }

    info!(rows = batch.num_rows(), "wrote {}", filename);
    return Ok(());
}

fn write_table_csv<W>(output: W, batch: &RecordBatch) -> Result<(), ArrowError>
where
    W: Write,
{
    let mut writer = csv::WriterBuilder::new().with_header(true).build(output);
    writer.write(batch)?;
    return Ok(());
}

fn write_table_parquet<W>(output: W, batch: &RecordBatch) -> Result<()>
where
    W: Write + Send,
{
    let props = WriterProperties::builder()
        .set_compression(ZSTD(ZstdLevel::default()))
        .build();

    let mut writer = ArrowWriter::try_new(output, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;

    return Ok(());
}

fn string_array<'a, I>(fmt: OutputFormat, values: I) -> ArrayRef
where
    I: Iterator<Item = &'a str>,
{
    match fmt {
        OutputFormat::Parquet => Arc::new(LargeStringArray::from_iter_values(values)),
        _ => Arc::new(StringArray::from_iter_values(values)),
    }
}

fn u32_column<F>(regions: &[RegionRecord], f: F) -> ArrayRef
where
    F: Fn(&RegionRecord) -> usize,
{
    Arc::new(UInt32Array::from_iter_values(
        regions.iter().map(|r| f(r) as u32),
    ))
}

fn f32_column<F>(regions: &[RegionRecord], f: F) -> ArrayRef
where
    F: Fn(&RegionRecord) -> f32,
{
    Arc::new(Float32Array::from_iter_values(regions.iter().map(f)))
}

fn bool_column<F>(regions: &[RegionRecord], f: F) -> ArrayRef
where
    F: Fn(&RegionRecord) -> bool,
{
    Arc::new(BooleanArray::from(regions.iter().map(f).collect::<Vec<_>>()))
}

// One row per region, with the columns of `region_table_schema`.
pub fn region_record_batch(spots: &DecodedSpots, fmt: OutputFormat) -> Result<RecordBatch> {
    let schema = region_table_schema(fmt, spots.nrounds(), spots.nchannels());
    let regions = spots.regions();

    let mut columns: Vec<ArrayRef> = vec![
        u32_column(regions, |r| r.id as usize),
        u32_column(regions, |r| r.z),
        f32_column(regions, |r| r.centroid.0),
        f32_column(regions, |r| r.centroid.1),
        f32_column(regions, |r| r.centroid.2),
        u32_column(regions, |r| r.area),
        string_array(fmt, regions.iter().map(|r| r.target_name.as_str())),
        bool_column(regions, |r| r.is_blank),
        f32_column(regions, |r| r.mean_distance),
        f32_column(regions, |r| r.mean_magnitude),
        u32_column(regions, |r| r.bbox.y_min),
        u32_column(regions, |r| r.bbox.y_max),
        u32_column(regions, |r| r.bbox.x_min),
        u32_column(regions, |r| r.bbox.x_max),
        bool_column(regions, |r| r.flags.passes_area),
        bool_column(regions, |r| r.flags.passes_distance),
        bool_column(regions, |r| r.flags.passes_thresholds),
    ];

    for k in 0..spots.nrounds() * spots.nchannels() {
        columns.push(f32_column(regions, |r| r.mean_intensity[k]));
    }

    return Ok(RecordBatch::try_new(Arc::new(schema), columns)?);
}

// Sparse label image: one row per labeled pixel.
pub fn label_record_batch(spots: &DecodedSpots) -> Result<RecordBatch> {
    let mut zs = Vec::new();
    let mut ys = Vec::new();
    let mut xs = Vec::new();
    let mut labels = Vec::new();
    for ((z, y, x), &label) in spots.labels().indexed_iter() {
        if label != 0 {
            zs.push(z as u32);
            ys.push(y as u32);
            xs.push(x as u32);
            labels.push(label);
        }
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt32Array::from(zs)),
        Arc::new(UInt32Array::from(ys)),
        Arc::new(UInt32Array::from(xs)),
        Arc::new(UInt32Array::from(labels)),
    ];

    return Ok(RecordBatch::try_new(
        Arc::new(label_table_schema()),
        columns,
    )?);
}

pub fn target_count_record_batch(
    spots: &DecodedSpots,
    fmt: OutputFormat,
    passing_only: bool,
) -> Result<RecordBatch> {
    let counts = spots.target_counts(passing_only);

    let columns: Vec<ArrayRef> = vec![
        string_array(fmt, counts.iter().map(|(name, _, _)| name.as_str())),
        Arc::new(BooleanArray::from(
            counts.iter().map(|&(_, blank, _)| blank).collect::<Vec<_>>(),
        )),
        Arc::new(UInt32Array::from_iter_values(
            counts.iter().map(|&(_, _, count)| count as u32),
        )),
    ];

    return Ok(RecordBatch::try_new(
        Arc::new(target_count_schema(fmt)),
        columns,
    )?);
}

pub fn write_regions(output_regions: &str, fmt: OutputFormat, spots: &DecodedSpots) -> Result<()> {
    let fmt = determine_format(output_regions, fmt)?;
    let batch = region_record_batch(spots, fmt)?;
    return write_table(output_regions, fmt, &batch);
}

pub fn write_labels(
    output_labels: &Option<String>,
    fmt: OutputFormat,
    spots: &DecodedSpots,
) -> Result<()> {
    if let Some(output_labels) = output_labels {
        let batch = label_record_batch(spots)?;
        write_table(output_labels, fmt, &batch)?;
    }
    return Ok(());
}

pub fn write_target_counts(
    output_counts: &Option<String>,
    fmt: OutputFormat,
    spots: &DecodedSpots,
) -> Result<()> {
    if let Some(output_counts) = output_counts {
        let fmt = determine_format(output_counts, fmt)?;
        let batch = target_count_record_batch(spots, fmt, true)?;
        write_table(output_counts, fmt, &batch)?;
    }
    return Ok(());
}
