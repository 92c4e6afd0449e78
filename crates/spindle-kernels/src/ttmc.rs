//! TTMc: sparse tensor-times-matrix-chain over CSF
//!
//! For an N-mode sparse tensor X and dense factor matrices U_0..U_{N-1},
//! the mode-n TTMc computes a dense output Y with one row per mode-n index:
//!
//! ```text
//! Y(i_n, :) = Σ X(i_0, ..., i_{N-1}) · ⊗_{m ≠ n} U_m(i_m, :)
//! ```
//!
//! where the Kronecker product runs over the non-output modes in increasing
//! mode order. Y has `dims[n] × Π_{m≠n} K_m` entries and is written into a
//! caller-provided flat row-major buffer. This contraction is the hot inner
//! loop of Tucker decomposition by higher-order orthogonal iteration.
//!
//! The traversal executed for a mode depends on where the mode sits in the
//! CSF tree (root, internal, leaf) and on the allocation scheme
//! ([`CsfAlloc`]); see [`ttmc`] for the dispatch rules. Output rows shared
//! between workers are serialized through the striped row locks; root
//! traversals need no locks because distinct slices own distinct rows.

use anyhow::{bail, Result};
use scirs2_core::ndarray_ext::ArrayView2;
use scirs2_core::numeric::{Float, NumAssign};
use spindle_sparse::{csf, CsfTensor, SparsityPattern, TileScheme};

use crate::error::KernelError;
use crate::locks::row_locks;
use crate::options::{CsfAlloc, TtmcOptions};
use crate::outer::{batched_outer_add, kron_fold_add, outer_add_into, outer_into};
use crate::scratch::{max_level_span, out_ncols, TtmcScratch};

#[cfg(feature = "parallel")]
use scirs2_core::parallel_ops::*;
#[cfg(feature = "parallel")]
use scirs2_core::ThreadPoolBuilder;

/// Slices handed to a worker per scheduling step.
#[cfg(feature = "parallel")]
const SLICE_CHUNK: usize = 16;

/// Shared view of the output buffer inside a parallel region.
///
/// Rust cannot see that traversal workers touch disjoint rows, so row
/// access goes through a raw pointer. The `Sync` impl is sound because
/// every `row_mut` call site upholds the exclusivity contract below.
pub(crate) struct OutTensor<T> {
    ptr: *mut T,
    len: usize,
    ncols: usize,
}

// SAFETY: workers only touch rows they own exclusively, either because the
// traversal assigns distinct rows to distinct slices (root traversals:
// level-0 ids strictly increase) or because the row's stripe lock is held
// around the access.
unsafe impl<T: Send> Send for OutTensor<T> {}
unsafe impl<T: Send> Sync for OutTensor<T> {}

impl<T> OutTensor<T> {
    pub(crate) fn new(buf: &mut [T], ncols: usize) -> Self {
        Self {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
            ncols,
        }
    }

    /// Mutable view of output row `row`.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive access to the row: it is the only
    /// worker that can reach `row`, or it holds `row`'s stripe lock.
    #[inline]
    pub(crate) unsafe fn row_mut(&self, row: usize) -> &mut [T] {
        debug_assert!((row + 1) * self.ncols <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.add(row * self.ncols), self.ncols)
    }
}

/// Distribute `nslices` slice indices over the worker pool in dynamic
/// chunks, giving each worker its own scratch from `init`.
#[cfg(feature = "parallel")]
pub(crate) fn for_each_slice<S, INIT, BODY>(nslices: usize, init: INIT, body: BODY)
where
    S: Send,
    INIT: Fn() -> S + Send + Sync,
    BODY: Fn(&mut S, usize) + Send + Sync,
{
    (0..nslices)
        .into_par_iter()
        .with_min_len(SLICE_CHUNK)
        .for_each_init(&init, |scratch, s| body(scratch, s));
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn for_each_slice<S, INIT, BODY>(nslices: usize, init: INIT, body: BODY)
where
    INIT: Fn() -> S,
    BODY: Fn(&mut S, usize),
{
    let mut scratch = init();
    for s in 0..nslices {
        body(&mut scratch, s);
    }
}

/// Zero-fill the output buffer. Runs before the traversal, so it is the
/// one output write that needs no lock.
#[cfg(feature = "parallel")]
pub(crate) fn clear_tenout<T: Float + Send + Sync>(tenout: &mut [T]) {
    tenout
        .par_chunks_mut(4096)
        .for_each(|chunk| chunk.fill(T::zero()));
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn clear_tenout<T: Float + Send + Sync>(tenout: &mut [T]) {
    tenout.fill(T::zero());
}

/// Run `f` inside a worker pool of `nthreads` workers (0 = automatic).
/// The pool is scoped to the call: fork on entry, join on return.
#[cfg(feature = "parallel")]
pub(crate) fn run_region<R, F>(nthreads: usize, f: F) -> Result<R>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    let pool = ThreadPoolBuilder::new()
        .num_threads(nthreads)
        .build()
        .map_err(|e| KernelError::PoolBuild(e.to_string()))?;
    Ok(pool.install(f))
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn run_region<R, F>(_nthreads: usize, f: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    Ok(f())
}

/// Check the factor set against the tensor dimensions and expose each
/// matrix as a flat row-major slice plus its column count.
pub(crate) fn validate_factors<'a, T>(
    dims: &[usize],
    factors: &'a [ArrayView2<'a, T>],
) -> Result<(Vec<&'a [T]>, Vec<usize>)>
where
    T: Float,
{
    let nmodes = dims.len();

    if factors.len() != nmodes {
        bail!(KernelError::WrongTensorCount {
            scheme: "factor matrices",
            expected: nmodes,
            actual: factors.len(),
        });
    }

    let mut mats: Vec<&[T]> = Vec::with_capacity(nmodes);
    let mut ncolumns: Vec<usize> = Vec::with_capacity(nmodes);
    for (m, factor) in factors.iter().enumerate() {
        if factor.shape()[0] != dims[m] {
            bail!(KernelError::FactorRowMismatch {
                mode: m,
                expected: dims[m],
                actual: factor.shape()[0],
            });
        }
        let Some(slice) = factor.as_slice() else {
            bail!(KernelError::FactorLayout { mode: m });
        };
        mats.push(slice);
        ncolumns.push(factor.shape()[1]);
    }

    Ok((mats, ncolumns))
}

/// Reduce one fiber's non-zeros against a factor into `acc`:
/// `acc = Σ_jj vals[jj] · mat(inds[jj], :)`. The first entry initializes
/// the buffer, so no separate zero pass is needed.
#[inline]
fn reduce_fiber<T>(vals: &[T], inds: &[usize], start: usize, end: usize, mat: &[T], acc: &mut [T])
where
    T: Float + NumAssign,
{
    let rank = acc.len();
    debug_assert!(start < end);

    let v0 = vals[start];
    let bv = &mat[inds[start] * rank..(inds[start] + 1) * rank];
    for (o, &x) in acc.iter_mut().zip(bv.iter()) {
        *o = v0 * x;
    }

    for jj in start + 1..end {
        let v = vals[jj];
        let bv = &mat[inds[jj] * rank..(inds[jj] + 1) * rank];
        for (o, &x) in acc.iter_mut().zip(bv.iter()) {
            *o += v * x;
        }
    }
}

/// TTMc on the root mode of a 3-mode CSF tile. Each slice owns a distinct
/// output row, so no locks are taken; per-fiber accumulations batch into a
/// single rank-update per slice.
fn csf_ttmc_root3<T>(
    csf: &CsfTensor<T>,
    pt: &SparsityPattern<T>,
    mats: &[&[T]],
    ncolumns: &[usize],
    out: &OutTensor<T>,
) where
    T: Float + NumAssign + Send + Sync + 'static,
{
    debug_assert_eq!(csf.nmodes(), 3);

    if pt.is_empty() {
        return;
    }

    let ma = csf.dim_perm()[1];
    let mb = csf.dim_perm()[2];
    let (rank_a, rank_b) = (ncolumns[ma], ncolumns[mb]);
    // The output row is a matrix over (ma, mb) with the smaller mode major
    let swap = ma > mb;

    let avals = mats[ma];
    let bvals = mats[mb];

    let vals = pt.vals();
    let sptr = pt.fptr(0);
    let fptr = pt.fptr(1);
    let fids = pt.fids(1);
    let inds = pt.fids(2);

    let max_span = max_level_span(csf, 0);
    let nslices = pt.nfibs(0);

    for_each_slice(
        nslices,
        || TtmcScratch::for_root3(max_span, rank_a, rank_b),
        |scratch: &mut TtmcScratch<T>, s| {
            let row = pt.slice_id(s);
            // SAFETY: level-0 ids strictly increase, so this slice is the
            // only writer of `row`.
            let outv = unsafe { out.row_mut(row) };

            let mut naccum = 0;
            for f in sptr[s]..sptr[s + 1] {
                let acc = &mut scratch.accum[naccum * rank_b..(naccum + 1) * rank_b];
                reduce_fiber(vals, inds, fptr[f], fptr[f + 1], bvals, acc);
                scratch.fiber_ids[naccum] = fids[f];
                naccum += 1;
            }

            // Gather the level-1 factor rows for the batched update
            for r in 0..naccum {
                let fid = scratch.fiber_ids[r];
                scratch.gather[r * rank_a..(r + 1) * rank_a]
                    .copy_from_slice(&avals[fid * rank_a..(fid + 1) * rank_a]);
            }

            if swap {
                batched_outer_add(
                    &scratch.accum,
                    rank_b,
                    &scratch.gather,
                    rank_a,
                    naccum,
                    outv,
                );
            } else {
                batched_outer_add(
                    &scratch.gather,
                    rank_a,
                    &scratch.accum,
                    rank_b,
                    naccum,
                    outv,
                );
            }
        },
    );
}

/// TTMc on the internal mode of a 3-mode CSF tile. Multiple slices can
/// target the same output row, so each fiber's rank-1 update happens under
/// the row's stripe lock.
fn csf_ttmc_intl3<T>(
    csf: &CsfTensor<T>,
    pt: &SparsityPattern<T>,
    mats: &[&[T]],
    ncolumns: &[usize],
    out: &OutTensor<T>,
) where
    T: Float + NumAssign + Send + Sync + 'static,
{
    debug_assert_eq!(csf.nmodes(), 3);

    if pt.is_empty() {
        return;
    }

    let ma = csf.dim_perm()[0];
    let mb = csf.dim_perm()[2];
    let (rank_a, rank_b) = (ncolumns[ma], ncolumns[mb]);
    let swap = ma > mb;

    let avals = mats[ma];
    let bvals = mats[mb];

    let vals = pt.vals();
    let sptr = pt.fptr(0);
    let fptr = pt.fptr(1);
    let fids = pt.fids(1);
    let inds = pt.fids(2);

    let nslices = pt.nfibs(0);

    for_each_slice(
        nslices,
        || TtmcScratch::for_intl3(rank_b),
        |scratch: &mut TtmcScratch<T>, s| {
            let rid = pt.slice_id(s);
            let av = &avals[rid * rank_a..(rid + 1) * rank_a];

            for f in sptr[s]..sptr[s + 1] {
                reduce_fiber(vals, inds, fptr[f], fptr[f + 1], bvals, &mut scratch.accum);

                let orow = fids[f];
                let _guard = row_locks().lock(orow);
                // SAFETY: the stripe lock for `orow` is held.
                let outv = unsafe { out.row_mut(orow) };
                if swap {
                    outer_add_into(&scratch.accum, av, outv);
                } else {
                    outer_add_into(av, &scratch.accum, outv);
                }
            }
        },
    );
}

/// TTMc on the leaf mode of a 3-mode CSF tile. One dense outer product per
/// fiber, then a scaled copy per non-zero under the row's stripe lock. This
/// trades a larger per-non-zero cost for skipping the fiber reduction.
fn csf_ttmc_leaf3<T>(
    csf: &CsfTensor<T>,
    pt: &SparsityPattern<T>,
    mats: &[&[T]],
    ncolumns: &[usize],
    out: &OutTensor<T>,
) where
    T: Float + NumAssign + Send + Sync + 'static,
{
    debug_assert_eq!(csf.nmodes(), 3);

    if pt.is_empty() {
        return;
    }

    let ma = csf.dim_perm()[0];
    let mb = csf.dim_perm()[1];
    let (rank_a, rank_b) = (ncolumns[ma], ncolumns[mb]);
    let swap = ma > mb;

    let avals = mats[ma];
    let bvals = mats[mb];

    let vals = pt.vals();
    let sptr = pt.fptr(0);
    let fptr = pt.fptr(1);
    let fids = pt.fids(1);
    let inds = pt.fids(2);

    let nslices = pt.nfibs(0);

    for_each_slice(
        nslices,
        || TtmcScratch::for_leaf3(rank_a, rank_b),
        |scratch: &mut TtmcScratch<T>, s| {
            let rid = pt.slice_id(s);
            let av = &avals[rid * rank_a..(rid + 1) * rank_a];

            for f in sptr[s]..sptr[s + 1] {
                let bv = &bvals[fids[f] * rank_b..(fids[f] + 1) * rank_b];
                if swap {
                    outer_into(bv, av, &mut scratch.oprod);
                } else {
                    outer_into(av, bv, &mut scratch.oprod);
                }

                for jj in fptr[f]..fptr[f + 1] {
                    let v = vals[jj];
                    let c = inds[jj];
                    let _guard = row_locks().lock(c);
                    // SAFETY: the stripe lock for `c` is held.
                    let outv = unsafe { out.row_mut(c) };
                    for (o, &x) in outv.iter_mut().zip(scratch.oprod.iter()) {
                        *o += v * x;
                    }
                }
            }
        },
    );
}

/// Accumulate one subtree of the N-mode root traversal.
///
/// `bufs[0]` corresponds to tree level `level` and receives the node's
/// Kronecker accumulation (width `Π_{l > level} K_{perm[l]}`, laid out in
/// increasing mode order). Deeper buffers are scratch for the recursion;
/// ownership nests strictly with the walk.
#[allow(clippy::too_many_arguments)]
fn subtree_accum<T>(
    pt: &SparsityPattern<T>,
    mats: &[&[T]],
    ncolumns: &[usize],
    perm: &[usize],
    fold_post: &[usize],
    level: usize,
    node: usize,
    bufs: &mut [Vec<T>],
) where
    T: Float + NumAssign,
{
    let nmodes = perm.len();
    let (head, tail) = bufs.split_at_mut(1);
    let acc = &mut head[0];

    let start = pt.fptr(level)[node];
    let end = pt.fptr(level)[node + 1];

    if level == nmodes - 2 {
        // Deepest internal level: reduce the fiber's non-zeros
        reduce_fiber(
            pt.vals(),
            pt.fids(nmodes - 1),
            start,
            end,
            mats[perm[nmodes - 1]],
            acc,
        );
        return;
    }

    acc.fill(T::zero());
    let child_mode = perm[level + 1];
    let rank = ncolumns[child_mode];

    for c in start..end {
        subtree_accum(pt, mats, ncolumns, perm, fold_post, level + 1, c, tail);

        let fid = pt.fids(level + 1)[c];
        let u = &mats[child_mode][fid * rank..(fid + 1) * rank];
        kron_fold_add(u, &tail[0], fold_post[level + 1], acc);
    }
}

/// TTMc on the root mode of an N-mode CSF tile (any N ≥ 3). Partial
/// Kronecker accumulations climb the tree through per-level buffers; each
/// level-1 subtree folds straight into the slice's output row. No locks:
/// distinct slices own distinct rows.
fn csf_ttmc_root_nmode<T>(
    csf: &CsfTensor<T>,
    pt: &SparsityPattern<T>,
    mats: &[&[T]],
    ncolumns: &[usize],
    out: &OutTensor<T>,
) where
    T: Float + NumAssign + Send + Sync + 'static,
{
    if pt.is_empty() {
        return;
    }

    let perm = csf.dim_perm();
    let nmodes = csf.nmodes();

    // widths[d - 1]: accumulation width of a node at level d
    let mut widths = vec![1usize; nmodes - 2];
    let mut w = ncolumns[perm[nmodes - 1]];
    for d in (1..nmodes - 1).rev() {
        widths[d - 1] = w;
        w *= ncolumns[perm[d]];
    }

    // fold_post[d]: stride block below mode perm[d] when a level-d
    // accumulation folds into its parent, keeping the fixed layout
    let mut fold_post = vec![1usize; nmodes];
    for d in 1..nmodes {
        fold_post[d] = (d + 1..nmodes)
            .filter(|&l| perm[l] > perm[d])
            .map(|l| ncolumns[perm[l]])
            .product();
    }

    let sptr = pt.fptr(0);
    let fids1 = pt.fids(1);
    let child_mode = perm[1];
    let rank1 = ncolumns[child_mode];
    let nslices = pt.nfibs(0);

    for_each_slice(
        nslices,
        || TtmcScratch::for_root_nmode(&widths),
        |scratch: &mut TtmcScratch<T>, s| {
            let row = pt.slice_id(s);
            // SAFETY: level-0 ids strictly increase, so this slice is the
            // only writer of `row`.
            let outv = unsafe { out.row_mut(row) };

            for c in sptr[s]..sptr[s + 1] {
                subtree_accum(
                    pt,
                    mats,
                    ncolumns,
                    perm,
                    &fold_post,
                    1,
                    c,
                    &mut scratch.levels,
                );

                let fid = fids1[c];
                let u = &mats[child_mode][fid * rank1..(fid + 1) * rank1];
                kron_fold_add(u, &scratch.levels[0], fold_post[1], outv);
            }
        },
    );
}

fn root_decide<T>(
    csf: &CsfTensor<T>,
    mats: &[&[T]],
    ncolumns: &[usize],
    mode: usize,
    out: &OutTensor<T>,
) -> Result<()>
where
    T: Float + NumAssign + Send + Sync + 'static,
{
    if csf.dim_perm()[0] != mode {
        bail!(KernelError::ModeNotInPerm {
            mode,
            dim_perm: csf.dim_perm().to_vec(),
        });
    }

    for pt in csf.tiles() {
        if csf.nmodes() == 3 {
            csf_ttmc_root3(csf, pt, mats, ncolumns, out);
        } else {
            csf_ttmc_root_nmode(csf, pt, mats, ncolumns, out);
        }
    }
    Ok(())
}

fn intl_decide<T>(
    csf: &CsfTensor<T>,
    mats: &[&[T]],
    ncolumns: &[usize],
    mode: usize,
    depth: usize,
    out: &OutTensor<T>,
) -> Result<()>
where
    T: Float + NumAssign + Send + Sync + 'static,
{
    if csf.nmodes() != 3 {
        bail!(KernelError::UnsupportedDepth { mode, depth });
    }

    for pt in csf.tiles() {
        csf_ttmc_intl3(csf, pt, mats, ncolumns, out);
    }
    Ok(())
}

fn leaf_decide<T>(
    csf: &CsfTensor<T>,
    mats: &[&[T]],
    ncolumns: &[usize],
    mode: usize,
    depth: usize,
    out: &OutTensor<T>,
) -> Result<()>
where
    T: Float + NumAssign + Send + Sync + 'static,
{
    if csf.nmodes() != 3 {
        bail!(KernelError::UnsupportedDepth { mode, depth });
    }

    for pt in csf.tiles() {
        csf_ttmc_leaf3(csf, pt, mats, ncolumns, out);
    }
    Ok(())
}

/// Route the computation to a traversal based on the allocation scheme and
/// the output mode's depth in the CSF tree.
fn dispatch<T>(
    mode: usize,
    tensors: &[CsfTensor<T>],
    mats: &[&[T]],
    ncolumns: &[usize],
    out: &OutTensor<T>,
    opts: &TtmcOptions,
) -> Result<()>
where
    T: Float + NumAssign + Send + Sync + 'static,
{
    let nmodes = tensors[0].nmodes();

    match opts.alloc {
        CsfAlloc::OneMode => {
            let tensor = &tensors[0];
            let depth = csf::mode_depth(mode, tensor.dim_perm()).ok_or_else(|| {
                KernelError::ModeNotInPerm {
                    mode,
                    dim_perm: tensor.dim_perm().to_vec(),
                }
            })?;

            if depth == 0 {
                root_decide(tensor, mats, ncolumns, mode, out)
            } else if depth == nmodes - 1 {
                leaf_decide(tensor, mats, ncolumns, mode, depth, out)
            } else {
                intl_decide(tensor, mats, ncolumns, mode, depth, out)
            }
        }

        CsfAlloc::TwoMode => {
            // The first tensor's leaf mode runs as the second tensor's root
            if mode == tensors[0].dim_perm()[nmodes - 1] {
                root_decide(&tensors[1], mats, ncolumns, mode, out)
            } else {
                let tensor = &tensors[0];
                let depth = csf::mode_depth(mode, tensor.dim_perm()).ok_or_else(|| {
                    KernelError::ModeNotInPerm {
                        mode,
                        dim_perm: tensor.dim_perm().to_vec(),
                    }
                })?;

                if depth == 0 {
                    root_decide(tensor, mats, ncolumns, mode, out)
                } else {
                    intl_decide(tensor, mats, ncolumns, mode, depth, out)
                }
            }
        }

        CsfAlloc::AllMode => root_decide(&tensors[mode], mats, ncolumns, mode, out),
    }
}

/// Compute the mode-`mode` TTMc of a CSF tensor set into `tenout`.
///
/// # Arguments
///
/// * `mode` - Output mode n
/// * `tensors` - CSF set sized to the scheme: 1 for ONEMODE, 2 for TWOMODE,
///   N for ALLMODE (see [`crate::csf_for_scheme`])
/// * `factors` - Row-major factor matrices, `factors[m]` of shape
///   (dims\[m\], K_m)
/// * `tenout` - Output buffer of `dims[n] · Π_{m≠n} K_m` values; cleared on
///   entry, filled with Y on success, untouched past the zero fill on error
/// * `opts` - Thread count, allocation scheme, tiling
///
/// # Errors
///
/// Returns an error for mismatched shapes, a CSF set that does not match
/// the scheme, tiling schemes other than `NoTile`, or a non-root output
/// mode on a tensor with more than 3 modes outside ALLMODE.
///
/// # Examples
///
/// ```
/// use scirs2_core::ndarray_ext::array;
/// use spindle_kernels::{csf_for_scheme, ttmc, CsfAlloc, TtmcOptions};
/// use spindle_sparse::CooTensor;
///
/// // X[0,1,0] = 3 in a 2x2x2 tensor, rank-1 factors
/// let mut coo = CooTensor::zeros(vec![2, 2, 2]).unwrap();
/// coo.push(vec![0, 1, 0], 3.0).unwrap();
///
/// let u0 = array![[2.0], [5.0]];
/// let u1 = array![[7.0], [11.0]];
/// let u2 = array![[13.0], [17.0]];
///
/// let opts = TtmcOptions::default().csf_alloc(CsfAlloc::AllMode);
/// let tensors = csf_for_scheme(&coo, CsfAlloc::AllMode).unwrap();
///
/// let mut y = vec![0.0; 2];
/// ttmc(0, &tensors, &[u0.view(), u1.view(), u2.view()], &mut y, &opts).unwrap();
/// assert_eq!(y, vec![3.0 * 11.0 * 13.0, 0.0]);
/// ```
pub fn ttmc<T>(
    mode: usize,
    tensors: &[CsfTensor<T>],
    factors: &[ArrayView2<T>],
    tenout: &mut [T],
    opts: &TtmcOptions,
) -> Result<()>
where
    T: Float + NumAssign + Send + Sync + 'static,
{
    let Some(first) = tensors.first() else {
        bail!(KernelError::WrongTensorCount {
            scheme: opts.alloc.name(),
            expected: 1,
            actual: 0,
        });
    };
    let nmodes = first.nmodes();
    let dims = first.shape();

    if nmodes < 3 {
        bail!("TTMc requires a tensor with at least 3 modes, got {nmodes}");
    }
    if mode >= nmodes {
        bail!(KernelError::InvalidMode { mode, nmodes });
    }

    let expected = opts.alloc.tensor_count(nmodes);
    if tensors.len() != expected {
        bail!(KernelError::WrongTensorCount {
            scheme: opts.alloc.name(),
            expected,
            actual: tensors.len(),
        });
    }

    let (mats, ncolumns) = validate_factors(dims, factors)?;

    let ncols = out_ncols(&ncolumns, mode);
    if tenout.len() != dims[mode] * ncols {
        bail!(KernelError::OutputSizeMismatch {
            expected: dims[mode] * ncols,
            actual: tenout.len(),
        });
    }

    // Clear stale results before any scheme checks so that a failed call
    // still leaves a zeroed output
    clear_tenout(tenout);

    if opts.tile != TileScheme::NoTile {
        bail!(KernelError::UnsupportedTiling(opts.tile));
    }
    for tensor in tensors {
        if tensor.tile_scheme() != TileScheme::NoTile {
            bail!(KernelError::UnsupportedTiling(tensor.tile_scheme()));
        }
    }

    let out = OutTensor::new(tenout, ncols);

    run_region(opts.num_threads, || {
        dispatch(mode, tensors, &mats, &ncolumns, &out, opts)
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::csf_for_scheme;
    use crate::test_support::{assert_close, factors_for, sample_coo, ttmc_dense_ref};
    use spindle_sparse::CooTensor;

    #[test]
    fn test_root_traversal_matches_dense() {
        let coo = sample_coo();
        let factors = factors_for(coo.shape(), &[2, 3, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();

        // mode 0 at the root
        let csf = CsfTensor::from_coo(&coo, &[0, 1, 2]).unwrap();
        let opts = TtmcOptions::default().nthreads(1);

        let mut y = vec![0.0; 4 * 6];
        ttmc(0, &[csf], &views, &mut y, &opts).unwrap();
        assert_close(&y, &ttmc_dense_ref(&coo, &views, 0));
    }

    #[test]
    fn test_root_traversal_swapped_perm() {
        // Root mode 2 with descending trailing perm exercises the operand
        // swap that keeps the fixed output layout
        let coo = sample_coo();
        let factors = factors_for(coo.shape(), &[2, 2, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();

        let csf = CsfTensor::from_coo(&coo, &[2, 1, 0]).unwrap();
        let opts = TtmcOptions::default().nthreads(1);

        let mut y = vec![0.0; 5 * 4];
        ttmc(2, &[csf], &views, &mut y, &opts).unwrap();
        assert_close(&y, &ttmc_dense_ref(&coo, &views, 2));
    }

    #[test]
    fn test_internal_traversal_matches_dense() {
        let coo = sample_coo();
        let factors = factors_for(coo.shape(), &[2, 3, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();

        for perm in [[0, 1, 2], [2, 1, 0]] {
            let csf = CsfTensor::from_coo(&coo, &perm).unwrap();
            let opts = TtmcOptions::default().nthreads(2);

            let mut y = vec![0.0; 3 * 4];
            ttmc(1, &[csf], &views, &mut y, &opts).unwrap();
            assert_close(&y, &ttmc_dense_ref(&coo, &views, 1));
        }
    }

    #[test]
    fn test_leaf_traversal_matches_dense() {
        let coo = sample_coo();
        let factors = factors_for(coo.shape(), &[3, 2, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();

        for perm in [[0, 1, 2], [1, 0, 2]] {
            let csf = CsfTensor::from_coo(&coo, &perm).unwrap();
            let opts = TtmcOptions::default().nthreads(2);

            let mut y = vec![0.0; 5 * 6];
            ttmc(2, &[csf], &views, &mut y, &opts).unwrap();
            assert_close(&y, &ttmc_dense_ref(&coo, &views, 2));
        }
    }

    #[test]
    fn test_nmode_root_matches_dense() {
        let mut coo = CooTensor::zeros(vec![3, 3, 3, 3]).unwrap();
        coo.push(vec![0, 1, 2, 0], 1.0).unwrap();
        coo.push(vec![0, 1, 0, 1], -1.5).unwrap();
        coo.push(vec![1, 2, 2, 2], 2.0).unwrap();
        coo.push(vec![2, 0, 1, 2], 0.5).unwrap();
        coo.push(vec![2, 2, 2, 2], 3.0).unwrap();

        let factors = factors_for(coo.shape(), &[2, 2, 2, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();

        for mode in 0..4 {
            // root the CSF at the output mode with a scrambled tail
            let mut perm = vec![mode];
            perm.extend((0..4).rev().filter(|&m| m != mode));
            let csf = CsfTensor::from_coo(&coo, &perm).unwrap();
            let opts = TtmcOptions::default().nthreads(1);

            let mut y = vec![0.0; 3 * 8];
            ttmc(mode, &[csf], &views, &mut y, &opts).unwrap();
            assert_close(&y, &ttmc_dense_ref(&coo, &views, mode));
        }
    }

    #[test]
    fn test_scheme_dispatch_equivalence() {
        let coo = sample_coo();
        let factors = factors_for(coo.shape(), &[2, 2, 3]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();

        for mode in 0..3 {
            let reference = ttmc_dense_ref(&coo, &views, mode);
            let ncols = reference.len();

            for alloc in [CsfAlloc::OneMode, CsfAlloc::TwoMode, CsfAlloc::AllMode] {
                let tensors = csf_for_scheme(&coo, alloc).unwrap();
                let opts = TtmcOptions::default().csf_alloc(alloc).nthreads(2);

                let mut y = vec![0.0; ncols];
                ttmc(mode, &tensors, &views, &mut y, &opts).unwrap();
                assert_close(&y, &reference);
            }
        }
    }

    #[test]
    fn test_implicit_slice_ids_match_explicit() {
        let mut coo = CooTensor::zeros(vec![2, 2, 2]).unwrap();
        coo.push(vec![0, 0, 1], 1.0).unwrap();
        coo.push(vec![1, 1, 0], 2.0).unwrap();
        let explicit = CsfTensor::from_coo(&coo, &[0, 1, 2]).unwrap();

        // The same tree with level-0 ids left implicit
        let implicit = CsfTensor::from_raw_parts(
            vec![2, 2, 2],
            &[0, 1, 2],
            TileScheme::NoTile,
            vec![SparsityPattern::from_raw(
                vec![2, 2, 2],
                vec![vec![0, 1, 2], vec![0, 1, 2]],
                vec![Vec::new(), vec![0, 1], vec![1, 0]],
                vec![1.0, 2.0],
            )],
        )
        .unwrap();

        let factors = factors_for(&[2, 2, 2], &[2, 2, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();
        let opts = TtmcOptions::default();

        for mode in 0..3 {
            let mut y_explicit = vec![0.0; 2 * 4];
            ttmc(
                mode,
                std::slice::from_ref(&explicit),
                &views,
                &mut y_explicit,
                &opts,
            )
            .unwrap();

            let mut y_implicit = vec![0.0; 2 * 4];
            ttmc(
                mode,
                std::slice::from_ref(&implicit),
                &views,
                &mut y_implicit,
                &opts,
            )
            .unwrap();

            assert_close(&y_explicit, &y_implicit);
        }
    }

    #[test]
    fn test_empty_tensor_gives_zero() {
        let coo = CooTensor::<f64>::zeros(vec![3, 3, 3]).unwrap();
        let factors = factors_for(coo.shape(), &[2, 2, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();

        let csf = CsfTensor::from_coo(&coo, &[0, 1, 2]).unwrap();
        let mut y = vec![7.0; 3 * 4];
        ttmc(1, &[csf], &views, &mut y, &TtmcOptions::default()).unwrap();
        assert!(y.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let coo = sample_coo();
        let factors = factors_for(coo.shape(), &[2, 2, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();
        let csf = CsfTensor::from_coo(&coo, &[0, 1, 2]).unwrap();
        let opts = TtmcOptions::default();

        // mode out of range
        let mut y = vec![0.0; 16];
        assert!(ttmc(3, std::slice::from_ref(&csf), &views, &mut y, &opts).is_err());

        // wrong output size
        let mut y = vec![0.0; 3];
        assert!(ttmc(0, std::slice::from_ref(&csf), &views, &mut y, &opts).is_err());

        // wrong tensor count for scheme
        let mut y = vec![0.0; 16];
        let opts_all = TtmcOptions::default().csf_alloc(CsfAlloc::AllMode);
        assert!(ttmc(0, std::slice::from_ref(&csf), &views, &mut y, &opts_all).is_err());
    }

    #[test]
    fn test_rejects_tiling() {
        let coo = sample_coo();
        let factors = factors_for(coo.shape(), &[2, 2, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();
        let csf = CsfTensor::from_coo(&coo, &[0, 1, 2]).unwrap();

        let opts = TtmcOptions::default().tile(TileScheme::SyncTile);
        let mut y = vec![1.0; 4 * 4];
        assert!(ttmc(0, std::slice::from_ref(&csf), &views, &mut y, &opts).is_err());
        // failed call leaves the zero fill in place
        assert!(y.iter().all(|&v| v == 0.0));
    }
}
