//! Option bundle for the TTMc kernels
//!
//! Mirrors the dense numeric option array of the original kernel as a typed
//! struct with builder-style setters.

use anyhow::Result;
use scirs2_core::numeric::Float;
use spindle_sparse::{csf, CooTensor, CsfTensor, TileScheme};

/// CSF allocation scheme: how many CSF representations back a tensor and
/// which traversal each output mode gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsfAlloc {
    /// One CSF; output modes map to root/internal/leaf traversals by depth.
    OneMode,
    /// Two CSFs; the second is rooted at the first's leaf mode, so every
    /// output mode runs as a root or internal traversal.
    TwoMode,
    /// One CSF per mode; every output mode runs as a root traversal.
    AllMode,
}

impl CsfAlloc {
    /// Number of CSF tensors the scheme expects for an `nmodes`-way tensor.
    pub fn tensor_count(&self, nmodes: usize) -> usize {
        match self {
            CsfAlloc::OneMode => 1,
            CsfAlloc::TwoMode => 2,
            CsfAlloc::AllMode => nmodes,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            CsfAlloc::OneMode => "ONEMODE",
            CsfAlloc::TwoMode => "TWOMODE",
            CsfAlloc::AllMode => "ALLMODE",
        }
    }
}

/// TTMc execution options.
///
/// # Examples
///
/// ```
/// use spindle_kernels::{CsfAlloc, TtmcOptions};
///
/// let opts = TtmcOptions::default()
///     .nthreads(4)
///     .csf_alloc(CsfAlloc::AllMode);
/// assert_eq!(opts.num_threads, 4);
/// ```
#[derive(Debug, Clone)]
pub struct TtmcOptions {
    /// Worker count for the parallel region; 0 means the pool default.
    pub num_threads: usize,
    /// CSF allocation scheme the caller built its tensors with.
    pub alloc: CsfAlloc,
    /// Output tiling scheme; anything but `NoTile` is rejected.
    pub tile: TileScheme,
    /// Tile nesting depth. Accepted for compatibility, ignored by the
    /// untiled kernels.
    pub tile_depth: usize,
}

impl Default for TtmcOptions {
    fn default() -> Self {
        Self {
            num_threads: 0,
            alloc: CsfAlloc::OneMode,
            tile: TileScheme::NoTile,
            tile_depth: 0,
        }
    }
}

impl TtmcOptions {
    /// Set the worker count (0 = automatic).
    pub fn nthreads(mut self, n: usize) -> Self {
        self.num_threads = n;
        self
    }

    /// Set the CSF allocation scheme.
    pub fn csf_alloc(mut self, alloc: CsfAlloc) -> Self {
        self.alloc = alloc;
        self
    }

    /// Set the tiling scheme.
    pub fn tile(mut self, tile: TileScheme) -> Self {
        self.tile = tile;
        self
    }
}

/// Build the CSF set a scheme expects from a coordinate tensor.
///
/// - `OneMode`: a single smallest-first CSF.
/// - `TwoMode`: the smallest-first CSF plus a second one rooted at the
///   first's leaf mode, which serves that mode's output.
/// - `AllMode`: one CSF per mode, with mode `m` at the root of the m-th.
///
/// # Examples
///
/// ```
/// use spindle_kernels::{csf_for_scheme, CsfAlloc};
/// use spindle_sparse::CooTensor;
///
/// let mut coo = CooTensor::zeros(vec![4, 2, 3]).unwrap();
/// coo.push(vec![0, 1, 2], 1.0).unwrap();
/// coo.push(vec![3, 0, 0], 2.0).unwrap();
///
/// let tensors = csf_for_scheme(&coo, CsfAlloc::AllMode).unwrap();
/// assert_eq!(tensors.len(), 3);
/// assert_eq!(tensors[1].dim_perm()[0], 1);
/// ```
pub fn csf_for_scheme<T: Float>(
    coo: &CooTensor<T>,
    alloc: CsfAlloc,
) -> Result<Vec<CsfTensor<T>>> {
    let dims = coo.shape();

    match alloc {
        CsfAlloc::OneMode => Ok(vec![CsfTensor::from_coo(
            coo,
            &csf::smallest_first(dims),
        )?]),
        CsfAlloc::TwoMode => {
            let first = CsfTensor::from_coo(coo, &csf::smallest_first(dims))?;
            let leaf_mode = first.dim_perm()[first.nmodes() - 1];
            let second =
                CsfTensor::from_coo(coo, &csf::smallest_first_with_root(dims, leaf_mode))?;
            Ok(vec![first, second])
        }
        CsfAlloc::AllMode => (0..dims.len())
            .map(|m| CsfTensor::from_coo(coo, &csf::smallest_first_with_root(dims, m)))
            .collect(),
    }
}
