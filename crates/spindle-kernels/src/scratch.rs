//! Per-worker scratch arenas and output sizing queries
//!
//! Every worker in a TTMc parallel region owns one [`TtmcScratch`]: the
//! accumulation arena that collects per-fiber reductions, the id buffer and
//! row-gather arena feeding the batched rank-update, the single
//! outer-product buffer of the leaf traversal, and the per-level fold
//! buffers of the N-mode walk. Arenas are allocated at parallel-region
//! entry and never shared, so there is no false sharing between workers.

use scirs2_core::numeric::Float;
use spindle_sparse::CsfTensor;

/// Scratch arenas owned by one worker for the duration of a traversal.
///
/// Arenas are flat row-major buffers; only the slots a traversal uses are
/// allocated, the rest stay empty.
pub struct TtmcScratch<T> {
    /// Per-fiber accumulation arena, one row per gathered fiber
    pub(crate) accum: Vec<T>,
    /// Fiber ids gathered alongside `accum` rows
    pub(crate) fiber_ids: Vec<usize>,
    /// Factor-row gather arena for the batched rank-update
    pub(crate) gather: Vec<T>,
    /// Dense outer-product buffer of the leaf traversal
    pub(crate) oprod: Vec<T>,
    /// Per-level Kronecker fold buffers of the N-mode root traversal
    pub(crate) levels: Vec<Vec<T>>,
}

impl<T: Float> TtmcScratch<T> {
    /// Scratch for the 3-mode root traversal: up to `max_span` fibers per
    /// slice, gathered factor rows of width `rank_gather`, accumulated
    /// fiber vectors of width `rank_accum`.
    pub fn for_root3(max_span: usize, rank_gather: usize, rank_accum: usize) -> Self {
        Self {
            accum: vec![T::zero(); max_span * rank_accum],
            fiber_ids: vec![0; max_span],
            gather: vec![T::zero(); max_span * rank_gather],
            oprod: Vec::new(),
            levels: Vec::new(),
        }
    }

    /// Scratch for the 3-mode internal traversal: one fiber accumulator.
    pub fn for_intl3(rank_accum: usize) -> Self {
        Self {
            accum: vec![T::zero(); rank_accum],
            fiber_ids: Vec::new(),
            gather: Vec::new(),
            oprod: Vec::new(),
            levels: Vec::new(),
        }
    }

    /// Scratch for the 3-mode leaf traversal: one dense outer product.
    pub fn for_leaf3(rank_a: usize, rank_b: usize) -> Self {
        Self {
            accum: Vec::new(),
            fiber_ids: Vec::new(),
            gather: Vec::new(),
            oprod: vec![T::zero(); rank_a * rank_b],
            levels: Vec::new(),
        }
    }

    /// Scratch for the N-mode root traversal: one fold buffer per internal
    /// level, `widths[d]` columns for the buffer of level `d + 1`.
    pub fn for_root_nmode(widths: &[usize]) -> Self {
        Self {
            accum: Vec::new(),
            fiber_ids: Vec::new(),
            gather: Vec::new(),
            oprod: Vec::new(),
            levels: widths.iter().map(|&w| vec![T::zero(); w]).collect(),
        }
    }
}

/// Largest child span at `level` across all tiles of a CSF tensor.
pub(crate) fn max_level_span<T>(csf: &CsfTensor<T>, level: usize) -> usize {
    let mut max_span = 0;
    for pt in csf.tiles() {
        let fptr = pt.fptr(level);
        for f in 0..pt.nfibs(level) {
            max_span = max_span.max(fptr[f + 1] - fptr[f]);
        }
    }
    max_span
}

/// Report, per tensor mode, the maximum fiber span at the non-leaf levels
/// where the mode appears. Callers use this to bound scratch arenas.
///
/// Levels within two of the leaf are skipped: their nodes accumulate into
/// scratch instead of feeding outer products.
pub fn ttmc_largest_outer<T>(tensors: &[CsfTensor<T>]) -> Vec<usize> {
    let nmodes = tensors.first().map_or(0, |csf| csf.nmodes());
    let mut outer_sizes = vec![0; nmodes];

    for csf in tensors {
        for level in 0..nmodes.saturating_sub(2) {
            let madj = csf.dim_perm()[level];
            outer_sizes[madj] = outer_sizes[madj].max(max_level_span(csf, level));
        }
    }

    outer_sizes
}

/// Product of factor column counts over all modes but `mode`: the column
/// count of the TTMc output.
pub(crate) fn out_ncols(ncolumns: &[usize], mode: usize) -> usize {
    ncolumns
        .iter()
        .enumerate()
        .filter(|&(m, _)| m != mode)
        .map(|(_, &k)| k)
        .product()
}

/// Upper bound on the output buffer length over every choice of output
/// mode: `max_m dims[m] · prod_{m' ≠ m} nfactors[m']`.
///
/// # Examples
///
/// ```
/// use spindle_kernels::tenout_dim;
///
/// // dims (4, 2, 3), factor widths (2, 5, 2)
/// let len = tenout_dim(&[2, 5, 2], &[4, 2, 3]);
/// // mode 0: 4 * 10, mode 1: 2 * 4, mode 2: 3 * 10
/// assert_eq!(len, 40);
/// ```
pub fn tenout_dim(nfactors: &[usize], dims: &[usize]) -> usize {
    let nmodes = dims.len();
    let mut maxdim = 0;

    for m in 0..nmodes {
        maxdim = maxdim.max(dims[m] * out_ncols(nfactors, m));
    }

    maxdim
}
