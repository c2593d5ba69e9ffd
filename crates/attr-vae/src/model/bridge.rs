//! Tensor bridge: conversions between host-side label/feature vectors and
//! burn tensors, plus the one-hot scatter used to feed the model.
//!
//! Everything that crosses the host/device boundary goes through here so the
//! loss and step code only ever sees tensors.

use burn::prelude::*;
use burn::tensor::{Shape, TensorData};

/// Convert a batch of equal-length label sequences to a `(batch, time)` index tensor.
///
/// # Panics
/// Panics if `sequences` is empty or if sequences have inconsistent lengths.
pub fn labels_to_tensor<B: Backend>(sequences: &[Vec<i64>], device: &B::Device) -> Tensor<B, 2, Int> {
    assert!(!sequences.is_empty(), "sequences must not be empty");
    let len = sequences[0].len();
    assert!(len > 0, "sequence length must be > 0");
    for (i, seq) in sequences.iter().enumerate() {
        assert_eq!(seq.len(), len, "sequence {i} has length {}, expected {len}", seq.len());
    }

    let batch = sequences.len();
    let flat: Vec<i64> = sequences.iter().flat_map(|s| s.iter().copied()).collect();
    Tensor::from_data(TensorData::new(flat, [batch, len]), device)
}

/// Convert a slice of class labels to a `(batch,)` index tensor.
pub fn classes_to_tensor<B: Backend>(classes: &[i64], device: &B::Device) -> Tensor<B, 1, Int> {
    Tensor::from_data(TensorData::new(classes.to_vec(), [classes.len()]), device)
}

/// Convert a batch of f32 feature rows (e.g. chroma vectors) to a `(batch, dim)` tensor.
///
/// # Panics
/// Panics if rows is empty or if rows have inconsistent lengths.
pub fn rows_to_tensor<B: Backend>(rows: &[Vec<f32>], device: &B::Device) -> Tensor<B, 2> {
    assert!(!rows.is_empty(), "rows must not be empty");
    let dim = rows[0].len();
    assert!(dim > 0, "row dimension must be > 0");
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row.len(), dim, "row {i} has length {}, expected {dim}", row.len());
    }

    let batch = rows.len();
    let flat: Vec<f32> = rows.iter().flat_map(|v| v.iter().copied()).collect();
    Tensor::from_data(TensorData::new(flat, [batch, dim]), device)
}

/// Convert per-example scalars to a `(batch,)` float tensor.
pub fn scalars_to_tensor<B: Backend>(values: &[f32], device: &B::Device) -> Tensor<B, 1> {
    Tensor::from_data(TensorData::new(values.to_vec(), [values.len()]), device)
}

/// Scatter integer indices into a one-hot float tensor with a trailing vocab axis.
///
/// Works for any input rank: `(B,)` becomes `(B, vocab)`, `(B, T)` becomes
/// `(B, T, vocab)`. `D2` must equal `D + 1`. Indices must lie in `0..vocab`.
pub fn one_hot<B: Backend, const D: usize, const D2: usize>(
    indices: Tensor<B, D, Int>,
    vocab: usize,
) -> Tensor<B, D2> {
    assert_eq!(D2, D + 1, "one-hot output rank must be input rank + 1");
    let device = indices.device();
    let dims = indices.dims();
    let n: usize = dims.iter().product();

    let flat = indices.reshape([n, 1]);
    let ones = Tensor::<B, 2>::ones([n, 1], &device);
    let encoded = Tensor::<B, 2>::zeros([n, vocab], &device).scatter(1, flat, ones);

    let mut shape = [0usize; D2];
    shape[..D].copy_from_slice(&dims);
    shape[D] = vocab;
    encoded.reshape(Shape::new(shape))
}

/// Extract f64 values from a float tensor of any rank (row-major order).
pub fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f64> {
    let data = tensor.into_data();
    data.iter::<f64>().collect()
}

/// Extract i64 values from an index tensor of any rank (row-major order).
pub fn int_tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Vec<i64> {
    let data = tensor.into_data();
    data.iter::<i64>().collect()
}

/// Extract a single f64 scalar from a single-element tensor.
///
/// # Panics
/// Panics if the tensor does not contain exactly one element.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    let val: f64 = tensor.into_scalar().elem();
    val
}
