//! COO (coordinate) sparse tensor format
//!
//! The coordinate format stores a sparse tensor as a list of
//! (coordinates, value) pairs. It is the construction format: tensors are
//! assembled here and then converted to CSF for the traversal kernels, or
//! consumed directly by the coordinate-streaming TTMc path.
//!
//! # Format
//!
//! For an N-dimensional sparse tensor:
//! - `indices`: `Vec<Vec<usize>>` - each inner vec is one coordinate \[i₀, i₁, ..., iₙ₋₁\]
//! - `values`: `Vec<T>` - the non-zero values
//! - `shape`: `Vec<usize>` - the shape of the tensor
//!
//! # Examples
//!
//! ```
//! use spindle_sparse::coo::CooTensor;
//!
//! // 3x4x2 sparse tensor with 2 non-zero elements
//! let indices = vec![
//!     vec![0, 1, 0],
//!     vec![2, 3, 1],
//! ];
//! let values = vec![2.5, 3.0];
//! let coo = CooTensor::new(indices, values, vec![3, 4, 2]).unwrap();
//! assert_eq!(coo.nnz(), 2);
//! ```

use anyhow::Result;
use scirs2_core::ndarray_ext::ArrayD;
use scirs2_core::ndarray_ext::Dimension;
use scirs2_core::numeric::Float;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CooError {
    #[error(
        "Shape mismatch: index has {index_len} coordinates but shape has {shape_len} dimensions"
    )]
    ShapeMismatch { index_len: usize, shape_len: usize },

    #[error("Length mismatch: {indices} indices but {values} values")]
    LengthMismatch { indices: usize, values: usize },

    #[error("Index out of bounds: index {index:?} exceeds shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),
}

/// COO (coordinate) sparse tensor
///
/// Stores sparse tensors as (coordinate, value) pairs. Flexible and easy to
/// construct, but not organized for traversal; convert to [`crate::CsfTensor`]
/// for the tree kernels.
#[derive(Debug, Clone)]
pub struct CooTensor<T> {
    /// Coordinates of non-zero elements, each `[i₀, i₁, ..., iₙ₋₁]`
    indices: Vec<Vec<usize>>,

    /// Values at the corresponding coordinates
    values: Vec<T>,

    /// Shape of the tensor
    shape: Vec<usize>,
}

fn validate_shape(shape: &[usize]) -> Result<(), CooError> {
    if shape.is_empty() {
        return Err(CooError::InvalidShape("Shape cannot be empty".to_string()));
    }
    if shape.contains(&0) {
        return Err(CooError::InvalidShape(
            "Shape cannot contain zeros".to_string(),
        ));
    }
    Ok(())
}

fn validate_index(index: &[usize], shape: &[usize]) -> Result<(), CooError> {
    if index.len() != shape.len() {
        return Err(CooError::ShapeMismatch {
            index_len: index.len(),
            shape_len: shape.len(),
        });
    }
    if index.iter().zip(shape).any(|(&coord, &size)| coord >= size) {
        return Err(CooError::IndexOutOfBounds {
            index: index.to_vec(),
            shape: shape.to_vec(),
        });
    }
    Ok(())
}

impl<T: Clone> CooTensor<T> {
    /// Create a new COO sparse tensor
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Indices and values have different lengths
    /// - Index dimensionality doesn't match shape
    /// - Any index is out of bounds
    /// - Shape is empty or contains zeros
    pub fn new(
        indices: Vec<Vec<usize>>,
        values: Vec<T>,
        shape: Vec<usize>,
    ) -> Result<Self, CooError> {
        validate_shape(&shape)?;

        if indices.len() != values.len() {
            return Err(CooError::LengthMismatch {
                indices: indices.len(),
                values: values.len(),
            });
        }
        for index in &indices {
            validate_index(index, &shape)?;
        }

        Ok(Self {
            indices,
            values,
            shape,
        })
    }

    /// Create an empty COO tensor with given shape
    pub fn zeros(shape: Vec<usize>) -> Result<Self, CooError> {
        Self::new(Vec::new(), Vec::new(), shape)
    }

    /// Number of non-zero elements
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Shape of the tensor
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of modes
    pub fn nmodes(&self) -> usize {
        self.shape.len()
    }

    /// Get indices
    pub fn indices(&self) -> &[Vec<usize>] {
        &self.indices
    }

    /// Get values
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Compute density (nnz / total elements)
    pub fn density(&self) -> f64 {
        let total: usize = self.shape.iter().product();
        self.nnz() as f64 / total as f64
    }

    /// Add a non-zero element
    ///
    /// Note: does not check for duplicates. Use `deduplicate()` after
    /// construction.
    pub fn push(&mut self, index: Vec<usize>, value: T) -> Result<(), CooError> {
        validate_index(&index, &self.shape)?;

        self.indices.push(index);
        self.values.push(value);
        Ok(())
    }

    /// Sort entries in row-major (lexicographic) coordinate order
    pub fn sort(&mut self) {
        let mut entries: Vec<(Vec<usize>, T)> = std::mem::take(&mut self.indices)
            .into_iter()
            .zip(std::mem::take(&mut self.values))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let (indices, values): (Vec<Vec<usize>>, Vec<T>) = entries.into_iter().unzip();
        self.indices = indices;
        self.values = values;
    }
}

impl<T: Float> CooTensor<T> {
    /// Convert to a dense tensor
    ///
    /// # Complexity
    ///
    /// Time: O(nnz + ∏ᵢ shape\[i\])
    pub fn to_dense(&self) -> Result<ArrayD<T>> {
        let mut dense = ArrayD::zeros(self.shape.to_vec());

        for (idx, &value) in self.indices.iter().zip(&self.values) {
            dense[idx.as_slice()] = value;
        }

        Ok(dense)
    }

    /// Create a COO tensor from a dense tensor, keeping elements with
    /// `|value| > threshold`
    pub fn from_dense(dense: &ArrayD<T>, threshold: T) -> Result<Self, CooError> {
        let shape = dense.shape().to_vec();

        let mut indices = Vec::new();
        let mut values = Vec::new();

        for (idx, &value) in dense.indexed_iter() {
            if value.abs() > threshold {
                indices.push(idx.slice().to_vec());
                values.push(value);
            }
        }

        Self::new(indices, values, shape)
    }

    /// Deduplicate entries by summing values at the same coordinate
    pub fn deduplicate(&mut self) {
        if self.nnz() <= 1 {
            return;
        }

        self.sort();

        let mut indices: Vec<Vec<usize>> = Vec::with_capacity(self.nnz());
        let mut values: Vec<T> = Vec::with_capacity(self.nnz());

        for (index, value) in std::mem::take(&mut self.indices)
            .into_iter()
            .zip(std::mem::take(&mut self.values))
        {
            if indices.last() == Some(&index) {
                let last = values.len() - 1;
                values[last] = values[last] + value;
            } else {
                indices.push(index);
                values.push(value);
            }
        }

        self.indices = indices;
        self.values = values;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coo_creation() {
        let indices = vec![vec![0, 1, 0], vec![1, 2, 1], vec![2, 0, 0]];
        let values = vec![2.5, 3.0, 1.5];

        let coo = CooTensor::new(indices, values, vec![3, 4, 2]).unwrap();
        assert_eq!(coo.nnz(), 3);
        assert_eq!(coo.shape(), &[3, 4, 2]);
        assert_eq!(coo.nmodes(), 3);
    }

    #[test]
    fn test_coo_zeros() {
        let coo = CooTensor::<f64>::zeros(vec![5, 5]).unwrap();
        assert_eq!(coo.nnz(), 0);
        assert_eq!(coo.shape(), &[5, 5]);
    }

    #[test]
    fn test_coo_invalid_shape() {
        assert!(CooTensor::<f64>::zeros(vec![]).is_err());
        assert!(CooTensor::<f64>::zeros(vec![3, 0, 2]).is_err());
    }

    #[test]
    fn test_coo_push_out_of_bounds() {
        let mut coo = CooTensor::<f64>::zeros(vec![3, 3]).unwrap();
        assert!(coo.push(vec![3, 0], 1.0).is_err());
        assert!(coo.push(vec![0], 1.0).is_err());
        assert!(coo.push(vec![2, 2], 1.0).is_ok());
    }

    #[test]
    fn test_coo_density() {
        let indices = vec![vec![0, 0], vec![1, 1]];
        let values = vec![1.0, 2.0];

        let coo = CooTensor::new(indices, values, vec![10, 10]).unwrap();
        assert_eq!(coo.density(), 0.02);
    }

    #[test]
    fn test_coo_sort() {
        let indices = vec![vec![2, 0], vec![0, 1], vec![1, 1], vec![0, 0]];
        let values = vec![4.0, 2.0, 3.0, 1.0];
        let mut coo = CooTensor::new(indices, values, vec![3, 2]).unwrap();

        coo.sort();

        assert_eq!(coo.indices()[0], vec![0, 0]);
        assert_eq!(coo.indices()[1], vec![0, 1]);
        assert_eq!(coo.indices()[2], vec![1, 1]);
        assert_eq!(coo.indices()[3], vec![2, 0]);
        assert_eq!(coo.values(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_coo_to_dense() {
        let indices = vec![vec![0, 1], vec![1, 0], vec![2, 2]];
        let values = vec![1.0, 2.0, 3.0];

        let coo = CooTensor::new(indices, values, vec![3, 3]).unwrap();
        let dense = coo.to_dense().unwrap();

        assert_eq!(dense.shape(), &[3, 3]);
        assert_eq!(dense[[0, 1]], 1.0);
        assert_eq!(dense[[1, 0]], 2.0);
        assert_eq!(dense[[2, 2]], 3.0);
        assert_eq!(dense[[0, 0]], 0.0);
    }

    #[test]
    fn test_coo_dense_roundtrip() {
        let indices = vec![vec![0, 1, 1], vec![2, 0, 3]];
        let values = vec![1.5, -2.5];
        let coo = CooTensor::new(indices, values, vec![3, 2, 4]).unwrap();

        let dense = coo.to_dense().unwrap();
        let back = CooTensor::from_dense(&dense, 1e-12).unwrap();

        assert_eq!(back.nnz(), 2);
        assert_eq!(back.shape(), &[3, 2, 4]);
    }

    #[test]
    fn test_coo_deduplicate() {
        let indices = vec![vec![0, 0], vec![1, 1], vec![0, 0]];
        let values = vec![1.0, 2.0, 3.0];
        let mut coo = CooTensor::new(indices, values, vec![2, 2]).unwrap();

        coo.deduplicate();

        assert_eq!(coo.nnz(), 2);
        assert_eq!(coo.indices()[0], vec![0, 0]);
        assert_eq!(coo.values()[0], 4.0);
    }
}
