// Reading tabular inputs (csv, csv.gz, parquet) into arrow record batches,
// and recomputing region flags on already written region tables.

use anyhow::{bail, Context, Result};
use arrow::array::{Array, ArrayRef, BooleanArray, Float32Array, RecordBatch, UInt32Array};
use arrow::compute::{cast, concat_batches};
use arrow::csv;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use flate2::read::GzDecoder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use crate::decoder::RegionFilter;
use crate::schemas::OutputFormat;

pub fn determine_format(filename: &str, fmt: OutputFormat) -> Result<OutputFormat> {
    if fmt != OutputFormat::Infer {
        return Ok(fmt);
    }

    if filename.ends_with(".csv.gz") {
        Ok(OutputFormat::CsvGz)
    } else if filename.ends_with(".csv") {
        Ok(OutputFormat::Csv)
    } else if filename.ends_with(".parquet") {
        Ok(OutputFormat::Parquet)
    } else {
        bail!("Unknown file format for: {}", filename);
    }
}

pub fn find_column_index(schema: &Schema, column: &str) -> Result<usize> {
    schema
        .index_of(column)
        .map_err(|_| anyhow::anyhow!("Column '{}' not found", column))
}

// CSV readers need a schema up front. Take the column names from the header
// and use the expected types for any column we know about.
fn csv_schema<R: Read>(reader: R, expected: &Schema) -> Result<Schema> {
    let (inferred, _) = Format::default()
        .with_header(true)
        .infer_schema(reader, Some(100))?;

    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|f| match expected.field_with_name(f.name()) {
            Ok(e) => e.clone(),
            Err(_) => f.as_ref().clone(),
        })
        .collect();

    return Ok(Schema::new(fields));
}

fn collect_batches<T>(rdr: T) -> Result<Vec<RecordBatch>>
where
    T: Iterator<Item = Result<RecordBatch, ArrowError>>,
{
    let mut batches = Vec::new();
    for batch in rdr {
        batches.push(batch.context("Unable to read record batch.")?);
    }
    return Ok(batches);
}

fn open(filename: &str) -> Result<File> {
    File::open(filename).with_context(|| format!("Unable to open '{}'.", filename))
}

// Read every record batch of a table. `expected` gives the types of known
// columns; parquet files carry their own schema.
pub fn read_table(filename: &str, fmt: OutputFormat, expected: &Schema) -> Result<Vec<RecordBatch>> {
    let (_, batches) = read_table_with_schema(filename, fmt, expected)?;
    return Ok(batches);
}

// Like `read_table`, but also returns the table's schema, which is known even
// when the table has no rows and so no batches.
pub fn read_table_with_schema(
    filename: &str,
    fmt: OutputFormat,
    expected: &Schema,
) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    match determine_format(filename, fmt)? {
        OutputFormat::Csv => {
            let schema = Arc::new(csv_schema(open(filename)?, expected)?);
            let rdr = csv::ReaderBuilder::new(schema.clone())
                .with_header(true)
                .build(open(filename)?)
                .with_context(|| format!("Unable to construct CSV reader for '{}'", filename))?;
            Ok((schema, collect_batches(rdr)?))
        }
        OutputFormat::CsvGz => {
            let schema = Arc::new(csv_schema(GzDecoder::new(open(filename)?), expected)?);
            let rdr = csv::ReaderBuilder::new(schema.clone())
                .with_header(true)
                .build(GzDecoder::new(open(filename)?))
                .with_context(|| format!("Unable to construct CSV reader for '{}'", filename))?;
            Ok((schema, collect_batches(rdr)?))
        }
        OutputFormat::Parquet => {
            let builder = ParquetRecordBatchReaderBuilder::try_new(open(filename)?)?;
            let schema = builder.schema().clone();
            let rdr = builder
                .build()
                .with_context(|| format!("Unable to read parquet data from {}", filename))?;
            Ok((schema, collect_batches(rdr)?))
        }
        OutputFormat::Infer => bail!("Indeterminable format for '{}'", filename),
    }
}

fn float_column(batch: &RecordBatch, name: &str) -> Result<Float32Array> {
    let col = find_column_index(&batch.schema(), name)?;
    let casted = cast(batch.column(col), &DataType::Float32)?;
    return Ok(casted
        .as_any()
        .downcast_ref::<Float32Array>()
        .context("Expected a float column")?
        .clone());
}

fn uint_column(batch: &RecordBatch, name: &str) -> Result<UInt32Array> {
    let col = find_column_index(&batch.schema(), name)?;
    let casted = cast(batch.column(col), &DataType::UInt32)?;
    return Ok(casted
        .as_any()
        .downcast_ref::<UInt32Array>()
        .context("Expected an integer column")?
        .clone());
}

// Recompute passes_area, passes_distance and passes_thresholds for a batch
// of region rows. Every other column is passed through untouched.
pub fn refilter_region_batch(batch: &RecordBatch, filter: &RegionFilter) -> Result<RecordBatch> {
    filter.validate()?;
    let area = uint_column(batch, "area")?;
    let mean_distance = float_column(batch, "mean_distance")?;
    let mean_magnitude = float_column(batch, "mean_magnitude")?;

    let nrows = batch.num_rows();
    let mut passes_area = Vec::with_capacity(nrows);
    let mut passes_distance = Vec::with_capacity(nrows);
    let mut passes_thresholds = Vec::with_capacity(nrows);
    for i in 0..nrows {
        let flags = filter.flags(
            area.value(i) as usize,
            mean_distance.value(i),
            mean_magnitude.value(i),
        );
        passes_area.push(flags.passes_area);
        passes_distance.push(flags.passes_distance);
        passes_thresholds.push(flags.passes_thresholds);
    }

    let schema = batch.schema();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    for (name, values) in [
        ("passes_area", passes_area),
        ("passes_distance", passes_distance),
        ("passes_thresholds", passes_thresholds),
    ] {
        let col = find_column_index(&schema, name)?;
        columns[col] = Arc::new(BooleanArray::from(values));
    }

    return Ok(RecordBatch::try_new(
        Arc::new(refiltered_schema(&schema)?),
        columns,
    )?);
}

// Schema of a refiltered region table: flag columns become non-null booleans.
fn refiltered_schema(schema: &Schema) -> Result<Schema> {
    for name in ["area", "mean_distance", "mean_magnitude"] {
        find_column_index(schema, name)?;
    }

    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    for name in ["passes_area", "passes_distance", "passes_thresholds"] {
        let col = find_column_index(schema, name)?;
        fields[col] = Field::new(name, DataType::Boolean, false);
    }
    return Ok(Schema::new(fields));
}

// Refilter a whole region table read as `batches` with `schema`. A table
// without rows gives an empty batch with the refiltered schema.
pub fn refilter_region_table(
    schema: &Schema,
    batches: &[RecordBatch],
    filter: &RegionFilter,
) -> Result<RecordBatch> {
    filter.validate()?;
    let output_schema = Arc::new(refiltered_schema(schema)?);
    let refiltered = batches
        .iter()
        .map(|batch| refilter_region_batch(batch, filter))
        .collect::<Result<Vec<_>>>()?;
    return Ok(concat_batches(&output_schema, &refiltered)?);
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::StringArray;

    fn region_batch() -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("target", DataType::Utf8, false),
            Field::new("area", DataType::UInt32, false),
            Field::new("mean_distance", DataType::Float32, false),
            Field::new("mean_magnitude", DataType::Float32, false),
            Field::new("passes_area", DataType::Boolean, false),
            Field::new("passes_distance", DataType::Boolean, false),
            Field::new("passes_thresholds", DataType::Boolean, false),
        ]);
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["a", "b", "c"])),
            Arc::new(UInt32Array::from(vec![1, 4, 9])),
            Arc::new(Float32Array::from(vec![0.1, 0.3, 0.1])),
            Arc::new(Float32Array::from(vec![1.0, 1.0, 1.0])),
            Arc::new(BooleanArray::from(vec![true, true, true])),
            Arc::new(BooleanArray::from(vec![true, true, true])),
            Arc::new(BooleanArray::from(vec![true, true, true])),
        ];
        RecordBatch::try_new(Arc::new(schema), columns).unwrap()
    }

    fn bools(batch: &RecordBatch, name: &str) -> Vec<bool> {
        let col = batch.schema().index_of(name).unwrap();
        batch
            .column(col)
            .as_any()
            .downcast_ref::<BooleanArray>()
            .unwrap()
            .iter()
            .map(|v| v.unwrap())
            .collect()
    }

    #[test]
    fn test_determine_format() {
        assert_eq!(
            determine_format("a.csv.gz", OutputFormat::Infer).unwrap(),
            OutputFormat::CsvGz
        );
        assert_eq!(
            determine_format("a.csv", OutputFormat::Infer).unwrap(),
            OutputFormat::Csv
        );
        assert_eq!(
            determine_format("a.parquet", OutputFormat::Infer).unwrap(),
            OutputFormat::Parquet
        );
        assert_eq!(
            determine_format("a.txt", OutputFormat::Csv).unwrap(),
            OutputFormat::Csv
        );
        assert!(determine_format("a.txt", OutputFormat::Infer).is_err());
    }

    #[test]
    fn test_refilter_region_batch() {
        let filter = RegionFilter {
            min_area: 2,
            max_area: 4,
            max_distance: 0.2,
            min_magnitude: 0.0,
        };
        let batch = refilter_region_batch(&region_batch(), &filter).unwrap();
        assert_eq!(bools(&batch, "passes_area"), vec![false, true, false]);
        assert_eq!(bools(&batch, "passes_distance"), vec![true, false, true]);
        assert_eq!(bools(&batch, "passes_thresholds"), vec![false, false, false]);
        assert_eq!(batch.num_columns(), 7);
    }

    #[test]
    fn test_refilter_region_table() {
        let batch = region_batch();
        let schema = batch.schema();
        let filter = RegionFilter {
            min_area: 4,
            ..RegionFilter::default()
        };

        let empty = refilter_region_table(&schema, &[], &filter).unwrap();
        assert_eq!(empty.num_rows(), 0);
        assert_eq!(empty.num_columns(), 7);

        let merged = refilter_region_table(&schema, &[batch.clone(), batch.slice(1, 2)], &filter).unwrap();
        assert_eq!(merged.num_rows(), 5);
        assert_eq!(
            bools(&merged, "passes_thresholds"),
            vec![false, true, true, true, true]
        );

        let invalid = RegionFilter {
            max_distance: f32::NAN,
            ..RegionFilter::default()
        };
        assert!(refilter_region_table(&schema, &[batch.clone()], &invalid).is_err());
        assert!(refilter_region_batch(&batch, &invalid).is_err());
    }

    #[test]
    fn test_refilter_requires_flag_columns() {
        let batch = region_batch().project(&[0, 1, 2, 3]).unwrap();
        assert!(refilter_region_batch(&batch, &RegionFilter::default()).is_err());
    }
}
