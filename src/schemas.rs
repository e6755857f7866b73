// File schemas shared by the decoder output in output.rs and by the
// refilter binary.

use arrow::datatypes::{DataType, Field, Schema};
use clap::ValueEnum;
use itertools::iproduct;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    Infer,
    Csv,
    CsvGz,
    Parquet,
}

pub fn large_utf8_if_parquet(fmt: OutputFormat) -> DataType {
    match fmt {
        OutputFormat::Parquet => DataType::LargeUtf8,
        _ => DataType::Utf8,
    }
}

pub fn stack_table_schema() -> Schema {
    Schema::new(vec![
        Field::new("round", DataType::UInt32, false),
        Field::new("channel", DataType::UInt32, false),
        Field::new("z", DataType::UInt32, false),
        Field::new("y", DataType::UInt32, false),
        Field::new("x", DataType::UInt32, false),
        Field::new("intensity", DataType::Float32, false),
    ])
}

pub fn intensity_column_name(round: usize, channel: usize) -> String {
    format!("intensity_r{}_c{}", round, channel)
}

// Fixed region columns, without the per round/channel intensities.
pub fn region_fields(fmt: OutputFormat) -> Vec<Field> {
    vec![
        Field::new("region_id", DataType::UInt32, false),
        Field::new("z", DataType::UInt32, false),
        Field::new("centroid_z", DataType::Float32, false),
        Field::new("centroid_y", DataType::Float32, false),
        Field::new("centroid_x", DataType::Float32, false),
        Field::new("area", DataType::UInt32, false),
        Field::new("target", large_utf8_if_parquet(fmt), false),
        Field::new("is_blank", DataType::Boolean, false),
        Field::new("mean_distance", DataType::Float32, false),
        Field::new("mean_magnitude", DataType::Float32, false),
        Field::new("y_min", DataType::UInt32, false),
        Field::new("y_max", DataType::UInt32, false),
        Field::new("x_min", DataType::UInt32, false),
        Field::new("x_max", DataType::UInt32, false),
        Field::new("passes_area", DataType::Boolean, false),
        Field::new("passes_distance", DataType::Boolean, false),
        Field::new("passes_thresholds", DataType::Boolean, false),
    ]
}

pub fn region_table_schema(fmt: OutputFormat, nrounds: usize, nchannels: usize) -> Schema {
    let mut fields = region_fields(fmt);
    for (r, c) in iproduct!(0..nrounds, 0..nchannels) {
        fields.push(Field::new(
            intensity_column_name(r, c),
            DataType::Float32,
            false,
        ));
    }
    Schema::new(fields)
}

pub fn label_table_schema() -> Schema {
    Schema::new(vec![
        Field::new("z", DataType::UInt32, false),
        Field::new("y", DataType::UInt32, false),
        Field::new("x", DataType::UInt32, false),
        Field::new("label", DataType::UInt32, false),
    ])
}

pub fn target_count_schema(fmt: OutputFormat) -> Schema {
    Schema::new(vec![
        Field::new("target", large_utf8_if_parquet(fmt), false),
        Field::new("is_blank", DataType::Boolean, false),
        Field::new("count", DataType::UInt32, false),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_schema_intensity_columns() {
        let schema = region_table_schema(OutputFormat::Csv, 2, 3);
        assert_eq!(schema.fields().len(), region_fields(OutputFormat::Csv).len() + 6);
        assert!(schema.index_of("intensity_r1_c2").is_ok());
        assert!(schema.index_of("intensity_r2_c0").is_err());
    }

    #[test]
    fn test_parquet_uses_large_utf8() {
        let schema = region_table_schema(OutputFormat::Parquet, 1, 1);
        let target = schema.field_with_name("target").unwrap();
        assert_eq!(target.data_type(), &DataType::LargeUtf8);
    }
}
