//! Flop cost model for TTMc execution
//!
//! Counts the arithmetic a traversal performs for a given CSF and output
//! mode, and compares whole allocation schemes. The recurrence mirrors the
//! traversals exactly: a downward sweep grows partial Kronecker widths from
//! the root to the output level, an upward sweep grows them from the leaf,
//! and a final join charges the full output width once per node at the
//! output level.
//!
//! [`ttmc_fill_flop_tbl`] aggregates the per-(CSF, mode) counts into the
//! scheme summaries used to pick an allocation: CSF-1 (one smallest-first
//! CSF), CSF-2 (plus a leaf-specialized one), CSF-A (one per mode), a
//! handpicked best-per-mode set, and the coordinate-streaming cost.

use anyhow::Result;
use scirs2_core::ndarray_ext::Array2;
use scirs2_core::numeric::Float;
use spindle_sparse::{csf, CooTensor, CsfTensor};

use crate::error::KernelError;
use crate::scratch::out_ncols;

/// Flops of a mode-`mode` TTMc over `csf`, given factor column counts
/// `nfactors`.
pub fn ttmc_csf_count_flops<T>(
    csf: &CsfTensor<T>,
    mode: usize,
    nfactors: &[usize],
) -> Result<usize> {
    let perm = csf.dim_perm();
    let nmodes = csf.nmodes();
    let depth = csf::mode_depth(mode, perm).ok_or_else(|| KernelError::ModeNotInPerm {
        mode,
        dim_perm: perm.to_vec(),
    })?;

    let mut flops = 0;

    for pt in csf.tiles() {
        // Move down the tree toward the output level
        let mut out_size = nfactors[perm[0]];
        for d in 1..depth {
            out_size *= nfactors[perm[d]];
            flops += pt.nfibs(d) * out_size;
        }

        // Move up the tree from the leaf
        out_size = 1;
        for d in (depth + 1..nmodes).rev() {
            out_size *= nfactors[perm[d]];
            flops += pt.nfibs(d) * out_size;
        }

        // Final join for internal and leaf output modes
        if depth > 0 {
            flops += pt.nfibs(depth) * out_ncols(nfactors, mode);
        }
    }

    Ok(flops)
}

/// Flops of a mode-`mode` TTMc in coordinate form: every non-zero pays the
/// nested Kronecker ladder over the non-output modes.
pub fn ttmc_coord_count_flops<T: Clone>(coo: &CooTensor<T>, mode: usize, nfactors: &[usize]) -> usize {
    let mut nnzflops = 0;
    let mut accum = 1;

    for m in (0..coo.nmodes()).rev() {
        if m != mode {
            accum *= nfactors[m];
            nnzflops += accum;
        }
    }

    coo.nnz() * nnzflops
}

fn argmin(values: &[usize]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v < values[best] {
            best = i;
        }
    }
    best
}

fn argmax(values: &[usize]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

fn summary_line(label: &str, row: &[usize]) {
    let mut line = format!("{label}:  ");
    for &flops in row {
        line += &format!("{:.3e}  ", flops as f64);
    }
    let total: usize = row.iter().sum();
    eprintln!("{line} = {:.3e}", total as f64);
}

/// Fill the N×N flop table: entry (i, j) is the cost of a mode-j TTMc over
/// the CSF sorted smallest-first with mode i forced to the leaf.
///
/// Emits per-CSF rows plus CSF-1 / CSF-2 / CSF-A / handpicked-custom /
/// coordinate summaries to stderr, and returns the table.
///
/// # Examples
///
/// ```
/// use spindle_kernels::ttmc_fill_flop_tbl;
/// use spindle_sparse::CooTensor;
///
/// let mut coo = CooTensor::zeros(vec![3, 4, 5]).unwrap();
/// coo.push(vec![0, 1, 2], 1.0).unwrap();
/// coo.push(vec![2, 3, 4], 2.0).unwrap();
///
/// let table = ttmc_fill_flop_tbl(&coo, &[2, 2, 2]).unwrap();
/// assert_eq!(table.shape(), &[3, 3]);
/// ```
pub fn ttmc_fill_flop_tbl<T: Float>(
    coo: &CooTensor<T>,
    nfactors: &[usize],
) -> Result<Array2<usize>> {
    let nmodes = coo.nmodes();
    let dims = coo.shape();

    let smallest_mode = argmin(dims);
    let largest_mode = argmax(dims);

    let mut table = Array2::zeros((nmodes, nmodes));
    let mut csf1 = vec![0; nmodes];
    let mut csf2 = vec![0; nmodes];
    let mut csfa = vec![0; nmodes];

    for i in 0..nmodes {
        let tensor = CsfTensor::from_coo(coo, &csf::smallest_first_with_leaf(dims, i))?;

        let mut line = format!("MODE-{i}:  ");
        for j in 0..nmodes {
            let flops = ttmc_csf_count_flops(&tensor, j, nfactors)?;
            table[[i, j]] = flops;
            line += &format!("{:.3e}  ", flops as f64);

            if i == smallest_mode {
                csf1[j] = flops;
                if j != largest_mode {
                    csf2[j] = flops;
                }
            }
            if i == j {
                csfa[i] = flops;
                // CSF-2 serves the largest mode from its leaf-specialized tensor
                if i == largest_mode {
                    csf2[j] = flops;
                }
            }
        }

        let total: usize = (0..nmodes).map(|m| table[[i, m]]).sum();
        eprintln!("{line} = {:.3e}", total as f64);
    }
    eprintln!();

    summary_line("CSF-1", &csf1);
    summary_line("CSF-2", &csf2);
    summary_line("CSF-A", &csfa);

    // Handpick the cheapest CSF per output mode
    let mut mode_used = vec![false; nmodes];
    let mut custom = vec![0; nmodes];
    for j in 0..nmodes {
        let mut best = 0;
        for i in 0..nmodes {
            if table[[i, j]] <= table[[best, j]] {
                best = i;
            }
        }
        mode_used[best] = true;
        custom[j] = table[[best, j]];
    }
    summary_line("CUSTM", &custom);

    let coord: Vec<usize> = (0..nmodes)
        .map(|m| ttmc_coord_count_flops(coo, m, nfactors))
        .collect();
    summary_line("COORD", &coord);

    let used: Vec<String> = (0..nmodes)
        .filter(|&m| mode_used[m])
        .map(|m| m.to_string())
        .collect();
    eprintln!("CUSTOM MODES: {}", used.join(" "));

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_coo;

    #[test]
    fn test_csf_count_flops_root() {
        // sample_coo has nfibs (4, 6, 6) under the identity permutation
        let coo = sample_coo();
        let tensor = CsfTensor::from_coo(&coo, &[0, 1, 2]).unwrap();
        let nfactors = [2, 3, 4];

        // Root output: upward sweep only.
        // d=2: 6 leaves * 4, then d=1: 6 fibers * (4*3)
        let flops = ttmc_csf_count_flops(&tensor, 0, &nfactors).unwrap();
        assert_eq!(flops, 6 * 4 + 6 * 12);
    }

    #[test]
    fn test_csf_count_flops_internal_and_leaf() {
        let coo = sample_coo();
        let tensor = CsfTensor::from_coo(&coo, &[0, 1, 2]).unwrap();
        let nfactors = [2, 3, 4];

        // Internal output (depth 1): up d=2 (6*4), join 6 * (2*4)
        let flops = ttmc_csf_count_flops(&tensor, 1, &nfactors).unwrap();
        assert_eq!(flops, 6 * 4 + 6 * 8);

        // Leaf output (depth 2): down d=1 (6 * 2*3), join 6 * (2*3)
        let flops = ttmc_csf_count_flops(&tensor, 2, &nfactors).unwrap();
        assert_eq!(flops, 6 * 6 + 6 * 6);
    }

    #[test]
    fn test_coord_count_flops() {
        let coo = sample_coo();
        let nfactors = [2, 3, 4];

        // mode 0: per non-zero, K2 then K2*K1
        assert_eq!(
            ttmc_coord_count_flops(&coo, 0, &nfactors),
            coo.nnz() * (4 + 12)
        );
        // mode 2: K1 then K1*K0
        assert_eq!(
            ttmc_coord_count_flops(&coo, 2, &nfactors),
            coo.nnz() * (3 + 6)
        );
    }

    #[test]
    fn test_flop_table_shape_and_custom_row() {
        let coo = sample_coo();
        let nfactors = [2, 2, 2];

        let table = ttmc_fill_flop_tbl(&coo, &nfactors).unwrap();
        assert_eq!(table.shape(), &[3, 3]);

        // The handpicked cost for mode j is the column minimum
        for j in 0..3 {
            let col_min = (0..3).map(|i| table[[i, j]]).min().unwrap();
            let mut best = 0;
            for i in 0..3 {
                if table[[i, j]] <= table[[best, j]] {
                    best = i;
                }
            }
            assert_eq!(table[[best, j]], col_min);
        }
    }

    #[test]
    fn test_mode_not_in_perm_errors() {
        let coo = sample_coo();
        let tensor = CsfTensor::from_coo(&coo, &[0, 1, 2]).unwrap();
        assert!(ttmc_csf_count_flops(&tensor, 7, &[2, 2, 2]).is_err());
    }
}
