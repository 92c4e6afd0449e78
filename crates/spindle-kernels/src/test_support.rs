//! Shared helpers for the unit and property tests

use scirs2_core::ndarray_ext::{Array2, ArrayView2};
use spindle_sparse::CooTensor;

use crate::scratch::out_ncols;

/// Dense TTMc reference: nested loops over every non-zero and every output
/// column tuple, Kronecker order fixed to increasing mode index.
pub(crate) fn ttmc_dense_ref(
    coo: &CooTensor<f64>,
    factors: &[ArrayView2<f64>],
    mode: usize,
) -> Vec<f64> {
    let nmodes = coo.nmodes();
    let ncolumns: Vec<usize> = factors.iter().map(|f| f.shape()[1]).collect();
    let ncols = out_ncols(&ncolumns, mode);
    let mut y = vec![0.0; coo.shape()[mode] * ncols];

    let others: Vec<usize> = (0..nmodes).filter(|&m| m != mode).collect();

    for (idx, &v) in coo.indices().iter().zip(coo.values().iter()) {
        let mut cols = vec![0usize; others.len()];
        loop {
            let mut col = 0;
            let mut prod = v;
            for (pos, &m) in others.iter().enumerate() {
                col = col * ncolumns[m] + cols[pos];
                prod *= factors[m][[idx[m], cols[pos]]];
            }
            y[idx[mode] * ncols + col] += prod;

            // Odometer over the column tuple
            let mut pos = others.len();
            loop {
                if pos == 0 {
                    break;
                }
                pos -= 1;
                cols[pos] += 1;
                if cols[pos] < ncolumns[others[pos]] {
                    break;
                }
                cols[pos] = 0;
            }
            if cols.iter().all(|&c| c == 0) {
                break;
            }
        }
    }

    y
}

/// Deterministic dense factor matrices with distinct, non-degenerate rows.
pub(crate) fn factors_for(shape: &[usize], ncols: &[usize]) -> Vec<Array2<f64>> {
    shape
        .iter()
        .zip(ncols.iter())
        .enumerate()
        .map(|(m, (&rows, &cols))| {
            Array2::from_shape_fn((rows, cols), |(i, j)| {
                ((m + 1) * (i + 1)) as f64 + 0.1 * (j + 1) as f64
            })
        })
        .collect()
}

/// A small 4x3x5 tensor with 6 scattered non-zeros.
pub(crate) fn sample_coo() -> CooTensor<f64> {
    let mut coo = CooTensor::zeros(vec![4, 3, 5]).unwrap();
    coo.push(vec![0, 1, 2], 1.5).unwrap();
    coo.push(vec![0, 2, 2], -2.0).unwrap();
    coo.push(vec![1, 0, 0], 3.0).unwrap();
    coo.push(vec![3, 1, 4], 0.5).unwrap();
    coo.push(vec![3, 2, 4], 1.0).unwrap();
    coo.push(vec![2, 2, 1], -1.0).unwrap();
    coo
}

pub(crate) fn assert_close(a: &[f64], b: &[f64]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() < 1e-10, "{x} != {y}");
    }
}
