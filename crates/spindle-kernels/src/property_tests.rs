//! Property-based tests for the TTMc kernels
//!
//! These verify algebraic laws that must hold for every conforming input:
//! agreement with a dense reference, equivalence across execution paths,
//! linearity in the factors, and annihilation by zero operands.

use proptest::prelude::*;
use scirs2_core::ndarray_ext::Array2;
use spindle_sparse::CooTensor;

use crate::options::{csf_for_scheme, CsfAlloc};
use crate::stream::ttmc_stream;
use crate::test_support::{factors_for, ttmc_dense_ref};
use crate::ttmc::ttmc;
use crate::TtmcOptions;

/// Strategy: a small random 3-mode sparse tensor.
fn arb_coo() -> impl Strategy<Value = CooTensor<f64>> {
    (2usize..5, 2usize..5, 2usize..5).prop_flat_map(|(d0, d1, d2)| {
        proptest::collection::vec(
            (0..d0, 0..d1, 0..d2, -10.0..10.0f64),
            1..12,
        )
        .prop_map(move |entries| {
            let mut coo = CooTensor::zeros(vec![d0, d1, d2]).unwrap();
            for (i, j, k, v) in entries {
                coo.push(vec![i, j, k], v).unwrap();
            }
            coo.deduplicate();
            coo
        })
    })
}

fn close(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-8)
}

proptest! {
    /// Every allocation scheme reproduces the dense reference
    #[test]
    fn prop_schemes_match_dense(coo in arb_coo(), mode in 0usize..3) {
        let factors = factors_for(coo.shape(), &[2, 2, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();
        let reference = ttmc_dense_ref(&coo, &views, mode);

        for alloc in [CsfAlloc::OneMode, CsfAlloc::TwoMode, CsfAlloc::AllMode] {
            let tensors = csf_for_scheme(&coo, alloc).unwrap();
            let opts = TtmcOptions::default().csf_alloc(alloc).nthreads(2);

            let mut y = vec![0.0; reference.len()];
            ttmc(mode, &tensors, &views, &mut y, &opts).unwrap();
            prop_assert!(close(&y, &reference));
        }
    }

    /// The coordinate-streaming path agrees with the CSF path
    #[test]
    fn prop_stream_matches_csf(coo in arb_coo(), mode in 0usize..3) {
        let factors = factors_for(coo.shape(), &[2, 3, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();

        let tensors = csf_for_scheme(&coo, CsfAlloc::AllMode).unwrap();
        let opts = TtmcOptions::default().csf_alloc(CsfAlloc::AllMode);

        let reference = ttmc_dense_ref(&coo, &views, mode);
        let mut y_csf = vec![0.0; reference.len()];
        ttmc(mode, &tensors, &views, &mut y_csf, &opts).unwrap();

        let mut y_stream = vec![0.0; reference.len()];
        ttmc_stream(&coo, &views, &mut y_stream, mode, &TtmcOptions::default()).unwrap();

        prop_assert!(close(&y_csf, &y_stream));
    }

    /// Scaling one non-output factor by α scales Y by α
    #[test]
    fn prop_linearity_in_factors(coo in arb_coo(), alpha in -4.0..4.0f64) {
        let factors = factors_for(coo.shape(), &[2, 2, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();

        let tensors = csf_for_scheme(&coo, CsfAlloc::OneMode).unwrap();
        let opts = TtmcOptions::default();

        let mut y = vec![0.0; coo.shape()[0] * 4];
        ttmc(0, &tensors, &views, &mut y, &opts).unwrap();

        let mut scaled_factors = factors.clone();
        scaled_factors[2].mapv_inplace(|x| alpha * x);
        let scaled_views: Vec<_> = scaled_factors.iter().map(|f| f.view()).collect();

        let mut y_scaled = vec![0.0; y.len()];
        ttmc(0, &tensors, &scaled_views, &mut y_scaled, &opts).unwrap();

        let expected: Vec<f64> = y.iter().map(|&v| alpha * v).collect();
        prop_assert!(close(&y_scaled, &expected));
    }

    /// A zero factor on a non-output mode annihilates Y
    #[test]
    fn prop_zero_factor_annihilates(coo in arb_coo()) {
        let mut factors = factors_for(coo.shape(), &[2, 2, 2]);
        factors[1] = Array2::zeros((coo.shape()[1], 2));
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();

        let tensors = csf_for_scheme(&coo, CsfAlloc::OneMode).unwrap();
        let mut y = vec![1.0; coo.shape()[0] * 4];
        ttmc(0, &tensors, &views, &mut y, &TtmcOptions::default()).unwrap();

        prop_assert!(y.iter().all(|&v| v == 0.0));
    }

    /// The zero tensor yields the zero output
    #[test]
    fn prop_zero_tensor_annihilates(dims in (2usize..5, 2usize..5, 2usize..5)) {
        let coo = CooTensor::<f64>::zeros(vec![dims.0, dims.1, dims.2]).unwrap();
        let factors = factors_for(coo.shape(), &[2, 2, 2]);
        let views: Vec<_> = factors.iter().map(|f| f.view()).collect();

        let tensors = csf_for_scheme(&coo, CsfAlloc::OneMode).unwrap();
        let mut y = vec![1.0; dims.1 * 4];
        ttmc(1, &tensors, &views, &mut y, &TtmcOptions::default()).unwrap();

        prop_assert!(y.iter().all(|&v| v == 0.0));
    }
}
