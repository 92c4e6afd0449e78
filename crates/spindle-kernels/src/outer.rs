//! Outer-product micro-kernels
//!
//! These are the innermost building blocks of the TTMc traversals: dense
//! rank-1 updates of a flattened output row, and the batched rank-update
//! that turns a slice's accumulated fiber vectors into a single
//! matrix-matrix product.
//!
//! All kernels write only their designated output buffer and may run
//! concurrently on disjoint outputs.

use scirs2_core::numeric::{Float, NumAssign};

/// Compute `out[i*nB + j] = row_a[i] * row_b[j]`, overwriting `out`.
#[inline]
pub fn outer_into<T>(row_a: &[T], row_b: &[T], out: &mut [T])
where
    T: Float + NumAssign,
{
    debug_assert_eq!(out.len(), row_a.len() * row_b.len());

    let nb = row_b.len();
    for (i, &a) in row_a.iter().enumerate() {
        let orow = &mut out[i * nb..(i + 1) * nb];
        for (o, &b) in orow.iter_mut().zip(row_b.iter()) {
            *o = a * b;
        }
    }
}

/// Compute `out[i*nB + j] += row_a[i] * row_b[j]`.
#[inline]
pub fn outer_add_into<T>(row_a: &[T], row_b: &[T], out: &mut [T])
where
    T: Float + NumAssign,
{
    debug_assert_eq!(out.len(), row_a.len() * row_b.len());

    let nb = row_b.len();
    for (i, &a) in row_a.iter().enumerate() {
        let orow = &mut out[i * nb..(i + 1) * nb];
        for (o, &b) in orow.iter_mut().zip(row_b.iter()) {
            *o += a * b;
        }
    }
}

/// Fold a factor row into an accumulated Kronecker partial at a fixed
/// stride position.
///
/// `acc` is a flattened `(p_pre, p_post)` block; `out` is the flattened
/// `(p_pre, u.len(), p_post)` block it grows into:
///
/// ```text
/// out[(a * K + j) * p_post + b] += u[j] * acc[a * p_post + b]
/// ```
///
/// With `acc.len() == p_post` (a single pre-block) this degenerates to
/// [`outer_add_into`]. The split is what lets the N-mode traversal insert
/// each factor at its mode's position in the fixed output layout no matter
/// where the mode sits in the CSF permutation.
#[inline]
pub fn kron_fold_add<T>(u: &[T], acc: &[T], p_post: usize, out: &mut [T])
where
    T: Float + NumAssign,
{
    debug_assert!(p_post > 0);
    debug_assert_eq!(acc.len() % p_post, 0);
    debug_assert_eq!(out.len(), acc.len() * u.len());

    let p_pre = acc.len() / p_post;
    let k = u.len();

    for a in 0..p_pre {
        let arow = &acc[a * p_post..(a + 1) * p_post];
        let obase = a * k * p_post;
        for (j, &uj) in u.iter().enumerate() {
            let orow = &mut out[obase + j * p_post..obase + (j + 1) * p_post];
            for (o, &acv) in orow.iter_mut().zip(arow.iter()) {
                *o += uj * acv;
            }
        }
    }
}

/// Batched outer-product accumulation: `out += Aᵀ·B` over the first `nfib`
/// rows of the row-major arenas `a` (rows of width `ka`) and `b` (rows of
/// width `kb`), with `out` a flattened (K_A × K_B) row-major matrix.
///
/// The naive build runs a row-at-a-time accumulation; with the `gemm`
/// feature the sum collapses into a single rank-update through the dense
/// matmul backend. Both produce identical results up to floating-point
/// associativity.
///
/// # Examples
///
/// ```
/// use spindle_kernels::batched_outer_add;
///
/// // two fibers: A rows [1, 2], [3, 4]; B rows [5], [6]
/// let a = [1.0, 2.0, 3.0, 4.0];
/// let b = [5.0, 6.0];
/// let mut out = vec![0.0; 2];
///
/// batched_outer_add(&a, 2, &b, 1, 2, &mut out);
/// // out = A^T B = [1*5 + 3*6, 2*5 + 4*6]
/// assert_eq!(out, vec![23.0, 34.0]);
/// ```
#[cfg(not(feature = "gemm"))]
pub fn batched_outer_add<T>(a: &[T], ka: usize, b: &[T], kb: usize, nfib: usize, out: &mut [T])
where
    T: Float + NumAssign + 'static,
{
    debug_assert!(nfib * ka <= a.len() && nfib * kb <= b.len());
    debug_assert_eq!(out.len(), ka * kb);

    for f in 0..nfib {
        outer_add_into(&a[f * ka..(f + 1) * ka], &b[f * kb..(f + 1) * kb], out);
    }
}

/// Batched outer-product accumulation delegated to a dense rank-update
/// (`gemm` feature build).
#[cfg(feature = "gemm")]
pub fn batched_outer_add<T>(a: &[T], ka: usize, b: &[T], kb: usize, nfib: usize, out: &mut [T])
where
    T: Float + NumAssign + 'static,
{
    use scirs2_core::ndarray_ext::ArrayView2;

    debug_assert!(nfib * ka <= a.len() && nfib * kb <= b.len());
    debug_assert_eq!(out.len(), ka * kb);

    // Safe to unwrap: the arena slices match the view shapes by construction
    let av = ArrayView2::from_shape((nfib, ka), &a[..nfib * ka]).unwrap();
    let bv = ArrayView2::from_shape((nfib, kb), &b[..nfib * kb]).unwrap();

    let update = av.t().dot(&bv);
    for (o, &u) in out.iter_mut().zip(update.iter()) {
        *o += u;
    }
}
