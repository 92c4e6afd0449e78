//! # spindle-kernels
//!
//! Parallel sparse TTMc (tensor-times-matrix-chain) kernels over
//! compressed sparse fiber storage — the hot inner loop of Tucker
//! decomposition by higher-order orthogonal iteration.
//!
//! ## Overview
//!
//! For an N-mode sparse tensor X and dense factor matrices U_0..U_{N-1},
//! the mode-n TTMc contracts every mode but n:
//!
//! ```text
//! Y(i_n, :) = Σ X(i_0, ..., i_{N-1}) · ⊗_{m ≠ n} U_m(i_m, :)
//! ```
//!
//! **Key pieces:**
//! - [`ttmc`] — CSF tree traversals (root / internal / leaf output depth)
//!   dispatched over the allocation scheme ([`CsfAlloc`])
//! - [`ttmc_stream`] — coordinate-streaming fallback with identical
//!   semantics
//! - [`ttmc_csf_count_flops`] / [`ttmc_fill_flop_tbl`] — the flop model
//!   used to choose an allocation scheme
//! - [`ttmc_largest_outer`] / [`tenout_dim`] — scratch and output sizing
//! - Striped row locks and per-worker scratch arenas underneath
//!
//! ## Quick start
//!
//! ```rust
//! use scirs2_core::ndarray_ext::Array2;
//! use spindle_kernels::{csf_for_scheme, ttmc, CsfAlloc, TtmcOptions};
//! use spindle_sparse::CooTensor;
//!
//! // A 4x3x5 sparse tensor
//! let mut coo = CooTensor::zeros(vec![4, 3, 5]).unwrap();
//! coo.push(vec![0, 1, 2], 1.5).unwrap();
//! coo.push(vec![3, 0, 4], -2.0).unwrap();
//!
//! // Rank-2 factors per mode
//! let factors: Vec<Array2<f64>> = coo
//!     .shape()
//!     .iter()
//!     .map(|&d| Array2::ones((d, 2)))
//!     .collect();
//! let views: Vec<_> = factors.iter().map(|f| f.view()).collect();
//!
//! // Mode-1 TTMc with a single smallest-first CSF
//! let opts = TtmcOptions::default().csf_alloc(CsfAlloc::OneMode);
//! let tensors = csf_for_scheme(&coo, CsfAlloc::OneMode).unwrap();
//!
//! let mut y = vec![0.0; 3 * 4];
//! ttmc(1, &tensors, &views, &mut y, &opts).unwrap();
//! ```
//!
//! ## Concurrency
//!
//! Each call forks a worker pool (`num_threads` in [`TtmcOptions`], 0 =
//! automatic), distributes slices dynamically in fixed-size chunks, and
//! joins at the end. Output rows shared between workers are serialized by
//! a process-wide striped lock pool; root traversals write disjoint rows
//! and take no locks. Floating-point reduction order across workers is not
//! specified; results for a fixed thread count are deterministic.
//!
//! ## Features
//!
//! - `parallel` (default) — multi-threaded execution via rayon
//! - `gemm` — batched outer-product accumulation delegated to a dense
//!   rank-update instead of the unrolled loop

#![deny(warnings)]

pub mod error;
pub mod flops;
pub mod locks;
pub mod options;
pub mod outer;
pub mod scratch;
pub mod stream;
pub mod ttmc;

#[cfg(test)]
mod property_tests;
#[cfg(test)]
mod test_support;

pub use error::KernelError;
pub use flops::{ttmc_coord_count_flops, ttmc_csf_count_flops, ttmc_fill_flop_tbl};
pub use locks::{LockStripes, NLOCKS};
pub use options::{csf_for_scheme, CsfAlloc, TtmcOptions};
pub use outer::{batched_outer_add, kron_fold_add, outer_add_into, outer_into};
pub use scratch::{tenout_dim, ttmc_largest_outer, TtmcScratch};
pub use stream::ttmc_stream;
pub use ttmc::ttmc;
