// Multi-round, multi-channel image stacks with axes (round, channel, z, y, x).

use anyhow::{bail, Context, Result};
use arrow::array::{Array, Float32Array, RecordBatch, UInt32Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use itertools::izip;
use ndarray::{s, Array3, Array5, ArrayView3, ArrayView5, Axis, Zip};
use tracing::info;

use crate::errors::DecodeError;
use crate::tables::{find_column_index, read_table};

#[derive(Clone, Debug, PartialEq)]
pub struct ImageStack {
    data: Array5<f32>,
}

impl ImageStack {
    pub fn new(data: Array5<f32>) -> Result<Self, DecodeError> {
        for ((r, c, z, y, x), &v) in data.indexed_iter() {
            if !v.is_finite() || v < 0.0 {
                return Err(DecodeError::InvalidIntensity {
                    location: format!("round={r} channel={c} z={z} y={y} x={x}"),
                    value: v,
                });
            }
        }
        return Ok(Self { data });
    }

    // For filter output, which is non-negative and finite whenever its input is.
    pub(crate) fn from_filtered(data: Array5<f32>) -> Self {
        return Self { data };
    }

    pub fn zeros(nrounds: usize, nchannels: usize, nz: usize, ny: usize, nx: usize) -> Self {
        return Self {
            data: Array5::zeros((nrounds, nchannels, nz, ny, nx)),
        };
    }

    pub fn nrounds(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn nchannels(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn nz(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn ny(&self) -> usize {
        self.data.len_of(Axis(3))
    }

    pub fn nx(&self) -> usize {
        self.data.len_of(Axis(4))
    }

    // Length of a pixel trace.
    pub fn trace_len(&self) -> usize {
        self.nrounds() * self.nchannels()
    }

    pub fn spatial_shape(&self) -> (usize, usize, usize) {
        (self.nz(), self.ny(), self.nx())
    }

    pub fn view(&self) -> ArrayView5<f32> {
        self.data.view()
    }

    pub fn into_inner(self) -> Array5<f32> {
        self.data
    }

    // The (z, y, x) volume imaged in one round and channel.
    pub fn get_slice(&self, round: usize, channel: usize) -> ArrayView3<f32> {
        self.data.slice(s![round, channel, .., .., ..])
    }

    // Fill `trace` with the intensities at (z, y, x), round-major: element
    // `r * nchannels + c` is round r, channel c.
    pub fn trace_into(&self, z: usize, y: usize, x: usize, trace: &mut [f32]) {
        debug_assert_eq!(trace.len(), self.trace_len());
        let pixel = self.data.slice(s![.., .., z, y, x]);
        for (t, &v) in trace.iter_mut().zip(pixel.iter()) {
            *t = v;
        }
    }

    pub fn trace(&self, z: usize, y: usize, x: usize) -> Vec<f32> {
        let mut trace = vec![0.0; self.trace_len()];
        self.trace_into(z, y, x, &mut trace);
        return trace;
    }

    // Max over every round and channel, used as a reference image.
    pub fn max_projection(&self) -> Array3<f32> {
        let mut proj = Array3::<f32>::zeros(self.spatial_shape());
        for round in self.data.outer_iter() {
            for channel in round.outer_iter() {
                Zip::from(&mut proj)
                    .and(&channel)
                    .for_each(|p, &v| *p = p.max(v));
            }
        }
        return proj;
    }
}

fn column_as<T: Array + Clone + 'static>(
    batch: &RecordBatch,
    col: usize,
    data_type: &DataType,
) -> Result<T> {
    let casted = cast(batch.column(col), data_type)?;
    let array = casted
        .as_any()
        .downcast_ref::<T>()
        .context("Unexpected column type after cast")?
        .clone();
    if array.null_count() > 0 {
        bail!("Column {} contains missing values", batch.schema().field(col).name());
    }
    return Ok(array);
}

// Number of f32 cells of a dense stack, if it can be allocated at all.
fn dense_cell_count(shape: (usize, usize, usize, usize, usize)) -> Option<usize> {
    let ncells = [shape.1, shape.2, shape.3, shape.4]
        .into_iter()
        .try_fold(shape.0, |n, m| n.checked_mul(m))?;
    let nbytes = ncells.checked_mul(std::mem::size_of::<f32>())?;
    if nbytes > isize::MAX as usize {
        return None;
    }
    return Some(ncells);
}

// Read a long-format table with one row per (round, channel, z, y, x) and an
// `intensity` column. Extents are one past the largest index seen along each
// axis and cells without a row are zero.
pub fn read_stack_table(filename: &str, fmt: crate::schemas::OutputFormat) -> Result<ImageStack> {
    let schema = crate::schemas::stack_table_schema();
    let batches = read_table(filename, fmt, &schema)?;

    let mut rounds = Vec::new();
    let mut channels = Vec::new();
    let mut zs = Vec::new();
    let mut ys = Vec::new();
    let mut xs = Vec::new();
    let mut intensities = Vec::new();

    for batch in &batches {
        let batch_schema = batch.schema();
        let columns = [
            (&mut rounds, "round"),
            (&mut channels, "channel"),
            (&mut zs, "z"),
            (&mut ys, "y"),
            (&mut xs, "x"),
        ];
        for (values, name) in columns {
            let col = find_column_index(&batch_schema, name)?;
            let array: UInt32Array = column_as(batch, col, &DataType::UInt32)?;
            values.extend(array.values().iter().cloned());
        }

        let col = find_column_index(&batch_schema, "intensity")?;
        let array: Float32Array = column_as(batch, col, &DataType::Float32)?;
        intensities.extend(array.values().iter().cloned());
    }

    if intensities.is_empty() {
        bail!("Image stack table '{}' has no rows", filename);
    }

    let extent = |values: &Vec<u32>| values.iter().max().map_or(0, |&m| m as usize + 1);
    let shape = (
        extent(&rounds),
        extent(&channels),
        extent(&zs),
        extent(&ys),
        extent(&xs),
    );

    let ncells = dense_cell_count(shape)
        .with_context(|| format!("Image stack extents {:?} in '{}' are too large", shape, filename))?;
    let mut cells = Vec::new();
    cells
        .try_reserve_exact(ncells)
        .with_context(|| format!("Unable to allocate an image stack of shape {:?}", shape))?;
    cells.resize(ncells, 0.0_f32);
    let mut data = Array5::from_shape_vec(shape, cells)?;
    for (&r, &c, &z, &y, &x, &v) in izip!(&rounds, &channels, &zs, &ys, &xs, &intensities) {
        data[[r as usize, c as usize, z as usize, y as usize, x as usize]] = v;
    }

    info!(
        rounds = shape.0,
        channels = shape.1,
        z = shape.2,
        y = shape.3,
        x = shape.4,
        "read image stack"
    );

    return ImageStack::new(data)
        .with_context(|| format!("Invalid image stack in '{}'", filename));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ramp_stack() -> ImageStack {
        let data = Array::from_shape_fn((2, 3, 1, 2, 2), |(r, c, _z, y, x)| {
            (r * 100 + c * 10 + y * 2 + x) as f32
        });
        ImageStack::new(data).unwrap()
    }

    #[test]
    fn test_extents() {
        let stack = ramp_stack();
        assert_eq!(stack.nrounds(), 2);
        assert_eq!(stack.nchannels(), 3);
        assert_eq!(stack.trace_len(), 6);
        assert_eq!(stack.spatial_shape(), (1, 2, 2));
    }

    #[test]
    fn test_trace_is_round_major() {
        let stack = ramp_stack();
        let trace = stack.trace(0, 1, 0);
        assert_eq!(trace, vec![2.0, 12.0, 22.0, 102.0, 112.0, 122.0]);
    }

    #[test]
    fn test_get_slice() {
        let stack = ramp_stack();
        let tile = stack.get_slice(1, 2);
        assert_eq!(tile.dim(), (1, 2, 2));
        assert_eq!(tile[[0, 1, 1]], 123.0);
    }

    #[test]
    fn test_max_projection() {
        let stack = ramp_stack();
        let proj = stack.max_projection();
        assert_eq!(proj[[0, 0, 0]], 120.0);
        assert_eq!(proj[[0, 1, 1]], 123.0);
    }

    #[test]
    fn test_rejects_negative_intensity() {
        let mut data = Array5::<f32>::zeros((1, 1, 1, 1, 2));
        data[[0, 0, 0, 0, 1]] = -1.0;
        assert!(matches!(
            ImageStack::new(data),
            Err(DecodeError::InvalidIntensity { .. })
        ));
    }

    #[test]
    fn test_dense_cell_count() {
        assert_eq!(dense_cell_count((2, 3, 1, 4, 5)), Some(120));
        assert_eq!(dense_cell_count((1, 1, 0, 4, 5)), Some(0));
        let huge = u32::MAX as usize + 1;
        assert_eq!(dense_cell_count((1, 1, huge, huge, huge)), None);
        assert_eq!(dense_cell_count((1, 1, 1, huge, huge)), None);
    }

    #[test]
    fn test_read_rejects_oversized_extents() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stack.csv");
        std::fs::write(
            &path,
            "round,channel,z,y,x,intensity\n\
             0,0,0,0,0,1.0\n\
             0,0,4294967295,4294967295,4294967295,1.0\n",
        )
        .unwrap();
        let result = read_stack_table(path.to_str().unwrap(), crate::schemas::OutputFormat::Csv);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_nan() {
        let mut data = Array5::<f32>::zeros((1, 1, 1, 1, 1));
        data[[0, 0, 0, 0, 0]] = f32::NAN;
        assert!(ImageStack::new(data).is_err());
    }
}
