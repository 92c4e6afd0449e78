//! Coordinate-streaming TTMc
//!
//! The fallback execution path when no CSF is available: stream the raw
//! non-zeros and realize the contraction as nested Kronecker products. Each
//! non-zero walks the non-output modes from the innermost outward, growing
//! a per-thread buffer by one factor width per step; the outermost
//! participating mode accumulates straight into the output row under its
//! stripe lock. Non-zeros are divided statically, one contiguous span per
//! worker, unlike the dynamically chunked CSF traversals.
//!
//! The result is identical (up to floating-point associativity) to the CSF
//! traversals, with a higher flop count; see the cost model in
//! [`crate::flops`].

use anyhow::{bail, Result};
use scirs2_core::ndarray_ext::ArrayView2;
use scirs2_core::numeric::{Float, NumAssign};
use spindle_sparse::{CooTensor, TileScheme};

use crate::error::KernelError;
use crate::locks::row_locks;
use crate::options::TtmcOptions;
use crate::outer::{outer_add_into, outer_into};
use crate::scratch::out_ncols;
use crate::ttmc::{clear_tenout, validate_factors, OutTensor};

#[cfg(feature = "parallel")]
use scirs2_core::parallel_ops::*;
#[cfg(feature = "parallel")]
use scirs2_core::ThreadPoolBuilder;

/// Walk `0..n` with a static schedule: the range splits into one fixed
/// contiguous span per worker, each worker owning its scratch from `init`.
///
/// The CSF traversals balance irregular slice work by dynamic chunking;
/// here every non-zero costs the same, so a static partition avoids the
/// scheduling traffic entirely.
#[cfg(feature = "parallel")]
fn for_each_static<S, INIT, BODY>(n: usize, nthreads: usize, init: INIT, body: BODY) -> Result<()>
where
    S: Send,
    INIT: Fn() -> S + Send + Sync,
    BODY: Fn(&mut S, usize) + Send + Sync,
{
    let pool = ThreadPoolBuilder::new()
        .num_threads(nthreads)
        .build()
        .map_err(|e| KernelError::PoolBuild(e.to_string()))?;

    let nworkers = pool.current_num_threads().max(1);
    let span = n.div_ceil(nworkers);

    pool.install(|| {
        (0..nworkers).into_par_iter().for_each(|w| {
            let start = (w * span).min(n);
            let end = ((w + 1) * span).min(n);
            if start >= end {
                return;
            }

            let mut scratch = init();
            for i in start..end {
                body(&mut scratch, i);
            }
        });
    });

    Ok(())
}

#[cfg(not(feature = "parallel"))]
fn for_each_static<S, INIT, BODY>(n: usize, _nthreads: usize, init: INIT, body: BODY) -> Result<()>
where
    INIT: Fn() -> S,
    BODY: Fn(&mut S, usize),
{
    let mut scratch = init();
    for i in 0..n {
        body(&mut scratch, i);
    }
    Ok(())
}

/// Compute the mode-`mode` TTMc of a coordinate tensor into `tenout`.
///
/// Semantics match [`crate::ttmc`]; only the execution strategy differs.
/// Per non-zero cost grows with the full Kronecker width, so prefer the CSF
/// path when a CSF representation exists.
///
/// # Examples
///
/// ```
/// use scirs2_core::ndarray_ext::array;
/// use spindle_kernels::{ttmc_stream, TtmcOptions};
/// use spindle_sparse::CooTensor;
///
/// let mut coo = CooTensor::zeros(vec![2, 2, 2]).unwrap();
/// coo.push(vec![0, 1, 0], 3.0).unwrap();
///
/// let u0 = array![[2.0], [5.0]];
/// let u1 = array![[7.0], [11.0]];
/// let u2 = array![[13.0], [17.0]];
///
/// let mut y = vec![0.0; 2];
/// ttmc_stream(
///     &coo,
///     &[u0.view(), u1.view(), u2.view()],
///     &mut y,
///     1,
///     &TtmcOptions::default(),
/// )
/// .unwrap();
/// // Y[1] = 3 * U0[0] * U2[0]
/// assert_eq!(y, vec![0.0, 3.0 * 2.0 * 13.0]);
/// ```
pub fn ttmc_stream<T>(
    coo: &CooTensor<T>,
    factors: &[ArrayView2<T>],
    tenout: &mut [T],
    mode: usize,
    opts: &TtmcOptions,
) -> Result<()>
where
    T: Float + NumAssign + Send + Sync + 'static,
{
    let nmodes = coo.nmodes();
    let dims = coo.shape();

    if nmodes < 3 {
        bail!("TTMc requires a tensor with at least 3 modes, got {nmodes}");
    }
    if mode >= nmodes {
        bail!(KernelError::InvalidMode { mode, nmodes });
    }

    let (mats, ncolumns) = validate_factors(dims, factors)?;

    let ncols = out_ncols(&ncolumns, mode);
    if tenout.len() != dims[mode] * ncols {
        bail!(KernelError::OutputSizeMismatch {
            expected: dims[mode] * ncols,
            actual: tenout.len(),
        });
    }

    clear_tenout(tenout);

    if opts.tile != TileScheme::NoTile {
        bail!(KernelError::UnsupportedTiling(opts.tile));
    }

    // Buffer width after folding mode m: the column product of every
    // participating mode at or above m
    let mut bufw = vec![0usize; nmodes];
    let mut acc = 1;
    for m in (0..nmodes).rev() {
        if m != mode {
            acc *= ncolumns[m];
            bufw[m] = acc;
        }
    }
    debug_assert_eq!(acc, ncols);

    // The innermost and outermost modes that participate in the Kronecker
    let last_mode = if mode == nmodes - 1 {
        nmodes - 2
    } else {
        nmodes - 1
    };
    let first_mode = usize::from(mode == 0);

    let out = OutTensor::new(tenout, ncols);
    let indices = coo.indices();
    let values = coo.values();

    for_each_static(
        coo.nnz(),
        opts.num_threads,
        || -> Vec<Vec<T>> {
            bufw.iter()
                .map(|&w| vec![T::zero(); w])
                .collect()
        },
        |buffers: &mut Vec<Vec<T>>, n| {
            let idx = &indices[n];
            let v = values[n];
            let out_row = idx[mode];

            // Seed the innermost buffer with v * U_last(i_last, :)
            let k_last = ncolumns[last_mode];
            let seed = &mats[last_mode][idx[last_mode] * k_last..(idx[last_mode] + 1) * k_last];
            for (c, &x) in buffers[last_mode].iter_mut().zip(seed.iter()) {
                *c = v * x;
            }

            // Remaining Kronecker products, inner to outer
            let mut curr = last_mode;
            for m in (0..last_mode).rev() {
                if m == mode {
                    continue;
                }

                let k = ncolumns[m];
                let urow = &mats[m][idx[m] * k..(idx[m] + 1) * k];

                if m != first_mode {
                    let (lo, hi) = buffers.split_at_mut(curr);
                    outer_into(urow, &hi[0], &mut lo[m]);
                    curr = m;
                } else {
                    let _guard = row_locks().lock(out_row);
                    // SAFETY: the stripe lock for `out_row` is held.
                    let outv = unsafe { out.row_mut(out_row) };
                    outer_add_into(urow, &buffers[curr], outv);
                }
            }
        },
    )?;

    Ok(())
}
