//! # spindle-sparse
//!
//! Sparse tensor storage for Spindle.
//!
//! This crate provides the two storage formats the Spindle kernels consume:
//!
//! - **COO** (`CooTensor`): a flexible list of (coordinate, value) pairs.
//!   Easy to build incrementally; the input to every format conversion and
//!   the operand of the coordinate-streaming kernels.
//! - **CSF** (`CsfTensor`): compressed sparse fiber, a hierarchical format
//!   that stores an N-mode tensor as a tree. Level `d` of the tree indexes
//!   tensor mode `dim_perm[d]`; internal nodes are fibers and leaves carry
//!   the non-zero values. CSF is the operand of the tree-traversal TTMc
//!   kernels in `spindle-kernels`.
//!
//! # Examples
//!
//! ```rust
//! use spindle_sparse::{CooTensor, CsfTensor};
//!
//! let mut coo = CooTensor::zeros(vec![3, 4, 5]).unwrap();
//! coo.push(vec![0, 1, 2], 5.0).unwrap();
//! coo.push(vec![1, 2, 3], 7.0).unwrap();
//!
//! // Build a CSF tree with the smallest dimension at the root
//! let order = spindle_sparse::csf::smallest_first(coo.shape());
//! let csf = CsfTensor::from_coo(&coo, &order).unwrap();
//! assert_eq!(csf.nnz(), 2);
//! ```

#![deny(warnings)]

pub mod coo;
pub mod csf;

pub use coo::{CooError, CooTensor};
pub use csf::{CsfError, CsfTensor, SparsityPattern, TileScheme};
