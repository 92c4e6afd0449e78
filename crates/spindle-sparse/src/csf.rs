//! CSF (compressed sparse fiber) format for N-dimensional sparse tensors
//!
//! CSF generalizes CSR/CSC to N dimensions: the tensor is stored as a tree
//! of compressed fibers, one tree level per mode. Level `d` of the tree
//! indexes tensor mode `dim_perm[d]`; level 0 is the root (its nodes are
//! *slices*), level N-1 the leaf (its nodes are single non-zeros).
//!
//! # Structure
//!
//! Each tile of the tensor holds one [`SparsityPattern`]:
//! - `fptr[d]`: CSR-style pointers from level `d` nodes into level `d+1`
//!   (present for `d = 0..N-2`, with `fptr[d].len() == nfibs[d] + 1`)
//! - `fids[d]`: the tensor index (in mode `dim_perm[d]`) of each node
//! - `vals`: non-zero values, one per leaf
//!
//! `fids[0]` may be empty while `nfibs[0] > 0`; level-0 node `s` then
//! implicitly represents index `s` of mode `dim_perm[0]`.
//!
//! # Example
//!
//! For a 3D tensor with non-zeros at (0,1,2)=5, (0,1,3)=6, (1,2,3)=7 and
//! `dim_perm = [0,1,2]`:
//!
//! - Level 0: `fptr[0] = [0, 1, 2]`, `fids[0] = [0, 1]`
//! - Level 1: `fptr[1] = [0, 2, 3]`, `fids[1] = [1, 2]`
//! - Level 2: `fids[2] = [2, 3, 3]`, `vals = [5.0, 6.0, 7.0]`
//!
//! # Complexity
//!
//! - **Construction from COO**: O(nnz × log(nnz)) sorting + O(nnz) tree build
//! - **Non-zero iteration**: O(nnz)
//! - **Memory**: O(nnz) + O(number of fibers at each level)

use anyhow::{bail, Result};
use scirs2_core::ndarray_ext::ArrayD;
use scirs2_core::numeric::Float;
use thiserror::Error;

use crate::coo::CooTensor;

#[derive(Error, Debug)]
pub enum CsfError {
    #[error("Invalid mode order: {0}")]
    InvalidModeOrder(String),

    #[error("Mode {mode} out of bounds for tensor with {nmodes} modes")]
    InvalidMode { mode: usize, nmodes: usize },
}

/// Output-tensor tiling scheme tag.
///
/// Only [`TileScheme::NoTile`] is produced by the constructors in this crate
/// and only it is accepted by the TTMc kernels; the remaining tags are
/// rejected with a typed error by the kernel dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileScheme {
    NoTile,
    DenseTile,
    SyncTile,
    CoopTile,
}

/// Per-tile sparsity block of a CSF tensor.
#[derive(Debug, Clone)]
pub struct SparsityPattern<T> {
    /// Node count at each tree level
    nfibs: Vec<usize>,
    /// Fiber pointers, levels 0..N-2
    fptr: Vec<Vec<usize>>,
    /// Fiber indices per level; `fids[0]` may be empty (implicit slice ids)
    fids: Vec<Vec<usize>>,
    /// Non-zero values at the leaf level; empty for an empty tile
    vals: Vec<T>,
}

impl<T> SparsityPattern<T> {
    /// Node count at `level`
    #[inline]
    pub fn nfibs(&self, level: usize) -> usize {
        self.nfibs[level]
    }

    /// Fiber pointers at `level` (valid for `level < nmodes - 1`)
    #[inline]
    pub fn fptr(&self, level: usize) -> &[usize] {
        &self.fptr[level]
    }

    /// Fiber indices at `level`; empty at level 0 means node `s` indexes `s`
    #[inline]
    pub fn fids(&self, level: usize) -> &[usize] {
        &self.fids[level]
    }

    /// Non-zero values
    #[inline]
    pub fn vals(&self) -> &[T] {
        &self.vals
    }

    /// Whether the tile holds no non-zeros
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vals.is_empty()
    }

    /// Tensor index of the level-0 node `s`, resolving implicit ids
    #[inline]
    pub fn slice_id(&self, s: usize) -> usize {
        if self.fids[0].is_empty() {
            s
        } else {
            self.fids[0][s]
        }
    }

    /// Assemble a pattern from raw arrays.
    ///
    /// Intended for callers that build CSF structure themselves (tests,
    /// converters); the array invariants are the module-level ones and are
    /// checked only in debug builds.
    pub fn from_raw(
        nfibs: Vec<usize>,
        fptr: Vec<Vec<usize>>,
        fids: Vec<Vec<usize>>,
        vals: Vec<T>,
    ) -> Self {
        debug_assert_eq!(nfibs.len(), fids.len());
        debug_assert_eq!(fptr.len() + 1, fids.len());
        Self {
            nfibs,
            fptr,
            fids,
            vals,
        }
    }
}

/// CSF (compressed sparse fiber) tensor
///
/// # Type Parameters
///
/// - `T`: element type (must implement `Float` from scirs2_core)
///
/// # Examples
///
/// ```
/// use spindle_sparse::{CooTensor, CsfTensor};
///
/// let mut coo = CooTensor::zeros(vec![3, 4, 5]).unwrap();
/// coo.push(vec![0, 1, 2], 5.0).unwrap();
/// coo.push(vec![0, 1, 3], 6.0).unwrap();
/// coo.push(vec![1, 2, 3], 7.0).unwrap();
///
/// let csf = CsfTensor::from_coo(&coo, &[0, 1, 2]).unwrap();
/// assert_eq!(csf.nnz(), 3);
/// assert_eq!(csf.shape(), &[3, 4, 5]);
/// ```
#[derive(Debug, Clone)]
pub struct CsfTensor<T> {
    /// Shape of the tensor
    shape: Vec<usize>,
    /// Mode permutation: tree level `d` stores mode `dim_perm[d]`
    dim_perm: Vec<usize>,
    /// Number of non-zeros
    nnz: usize,
    /// Output tiling scheme
    tile: TileScheme,
    /// Per-tile sparsity blocks
    tiles: Vec<SparsityPattern<T>>,
}

/// The identity mode order `[0, 1, ..., n-1]`.
pub fn natural_order(nmodes: usize) -> Vec<usize> {
    (0..nmodes).collect()
}

/// Modes sorted by dimension, smallest first (ties by mode index).
///
/// This is the default TTMc ordering: small dimensions near the root keep
/// slice counts low and fibers long.
pub fn smallest_first(dims: &[usize]) -> Vec<usize> {
    let mut order = natural_order(dims.len());
    order.sort_by_key(|&m| (dims[m], m));
    order
}

/// Smallest-first order with `mode` forced to the root (level 0).
pub fn smallest_first_with_root(dims: &[usize], mode: usize) -> Vec<usize> {
    let mut order = vec![mode];
    order.extend(smallest_first(dims).into_iter().filter(|&m| m != mode));
    order
}

/// Smallest-first order with `mode` forced to the leaf (level N-1).
pub fn smallest_first_with_leaf(dims: &[usize], mode: usize) -> Vec<usize> {
    let mut order: Vec<usize> = smallest_first(dims)
        .into_iter()
        .filter(|&m| m != mode)
        .collect();
    order.push(mode);
    order
}

/// Tree depth at which `mode` is stored, or `None` if `mode` is not in the
/// permutation.
pub fn mode_depth(mode: usize, dim_perm: &[usize]) -> Option<usize> {
    dim_perm.iter().position(|&m| m == mode)
}

fn check_perm(dim_perm: &[usize], nmodes: usize) -> Result<()> {
    if dim_perm.len() != nmodes {
        bail!(CsfError::InvalidModeOrder(format!(
            "dim_perm length {} != nmodes {}",
            dim_perm.len(),
            nmodes
        )));
    }

    let mut sorted_modes = dim_perm.to_vec();
    sorted_modes.sort_unstable();
    if sorted_modes != natural_order(nmodes) {
        bail!(CsfError::InvalidModeOrder(format!(
            "dim_perm {:?} is not a permutation of 0..{}",
            dim_perm, nmodes
        )));
    }

    Ok(())
}

impl<T: Float> CsfTensor<T> {
    /// Build a CSF tensor from COO with the given mode ordering.
    ///
    /// The result is a single untiled sparsity block.
    ///
    /// # Complexity
    ///
    /// O(nnz × log(nnz)) for sorting + O(nnz) for tree construction
    ///
    /// # Examples
    ///
    /// ```
    /// use spindle_sparse::{CooTensor, CsfTensor};
    ///
    /// let mut coo = CooTensor::zeros(vec![3, 3, 3]).unwrap();
    /// coo.push(vec![0, 1, 2], 1.0).unwrap();
    /// coo.push(vec![1, 2, 0], 2.0).unwrap();
    ///
    /// let csf = CsfTensor::from_coo(&coo, &[2, 1, 0]).unwrap();
    /// assert_eq!(csf.nnz(), 2);
    /// assert_eq!(csf.dim_perm(), &[2, 1, 0]);
    /// ```
    pub fn from_coo(coo: &CooTensor<T>, dim_perm: &[usize]) -> Result<Self> {
        let nmodes = coo.shape().len();
        check_perm(dim_perm, nmodes)?;

        if coo.nnz() == 0 {
            return Ok(Self {
                shape: coo.shape().to_vec(),
                dim_perm: dim_perm.to_vec(),
                nnz: 0,
                tile: TileScheme::NoTile,
                tiles: vec![SparsityPattern {
                    nfibs: vec![0; nmodes],
                    fptr: vec![vec![0]; nmodes - 1],
                    fids: vec![Vec::new(); nmodes],
                    vals: Vec::new(),
                }],
            });
        }

        // Sort non-zeros lexicographically by the permuted mode order
        let mut sorted: Vec<(Vec<usize>, T)> = coo
            .indices()
            .iter()
            .zip(coo.values().iter())
            .map(|(idx, &val)| (idx.clone(), val))
            .collect();

        sorted.sort_by(|a, b| {
            for &mode in dim_perm {
                match a.0[mode].cmp(&b.0[mode]) {
                    std::cmp::Ordering::Equal => continue,
                    other => return other,
                }
            }
            std::cmp::Ordering::Equal
        });

        // A node at level d is a run of non-zeros sharing the index prefix
        // over levels 0..=d. starts[d] holds each run's first non-zero.
        let nnz = sorted.len();
        let mut starts: Vec<Vec<usize>> = Vec::with_capacity(nmodes);

        let root_mode = dim_perm[0];
        let mut root_starts = vec![0];
        for i in 1..nnz {
            if sorted[i].0[root_mode] != sorted[i - 1].0[root_mode] {
                root_starts.push(i);
            }
        }
        starts.push(root_starts);

        for level in 1..nmodes {
            if level == nmodes - 1 {
                // Leaf level: one node per non-zero
                starts.push((0..nnz).collect());
                break;
            }

            let mode = dim_perm[level];
            let parents = &starts[level - 1];
            let mut level_starts = Vec::new();

            let mut p = 0;
            for i in 0..nnz {
                let parent_boundary = p < parents.len() && parents[p] == i;
                if parent_boundary {
                    p += 1;
                }
                if i == 0 || parent_boundary || sorted[i].0[mode] != sorted[i - 1].0[mode] {
                    level_starts.push(i);
                }
            }
            starts.push(level_starts);
        }

        // fptr[d][k]: index of the first level-(d+1) node under node k.
        // starts[d] is a subset of starts[d+1], so one monotone walk finds
        // every boundary.
        let mut fptr: Vec<Vec<usize>> = Vec::with_capacity(nmodes - 1);
        for level in 0..nmodes - 1 {
            let parents = &starts[level];
            let children = &starts[level + 1];

            let mut ptrs = Vec::with_capacity(parents.len() + 1);
            let mut c = 0;
            for &pstart in parents {
                while children[c] < pstart {
                    c += 1;
                }
                debug_assert_eq!(children[c], pstart);
                ptrs.push(c);
            }
            ptrs.push(children.len());
            fptr.push(ptrs);
        }

        let fids: Vec<Vec<usize>> = starts
            .iter()
            .enumerate()
            .map(|(level, level_starts)| {
                let mode = dim_perm[level];
                level_starts.iter().map(|&i| sorted[i].0[mode]).collect()
            })
            .collect();

        let vals: Vec<T> = sorted.iter().map(|(_, value)| *value).collect();
        let nfibs: Vec<usize> = fids.iter().map(|ids| ids.len()).collect();

        Ok(Self {
            shape: coo.shape().to_vec(),
            dim_perm: dim_perm.to_vec(),
            nnz: sorted.len(),
            tile: TileScheme::NoTile,
            tiles: vec![SparsityPattern {
                nfibs,
                fptr,
                fids,
                vals,
            }],
        })
    }

    /// Convert back to COO format.
    pub fn to_coo(&self) -> Result<CooTensor<T>> {
        let mut coo = CooTensor::zeros(self.shape.to_vec())?;

        for (indices, value) in self.iter() {
            coo.push(indices, value)?;
        }

        Ok(coo)
    }

    /// Convert to a dense tensor.
    pub fn to_dense(&self) -> Result<ArrayD<T>> {
        let mut dense = ArrayD::zeros(self.shape.to_vec());

        for (indices, value) in self.iter() {
            dense[indices.as_slice()] = dense[indices.as_slice()] + value;
        }

        Ok(dense)
    }

    /// Iterate over all non-zeros as (indices, value) tuples, in tree order.
    pub fn iter(&self) -> CsfIter<'_, T> {
        CsfIter::new(self)
    }
}

impl<T> CsfTensor<T> {
    /// Assemble a CSF tensor from externally built tiles.
    ///
    /// `dim_perm` is validated; the structural invariants of each pattern
    /// (monotone `fptr` covering every child once, in-range and per-fiber
    /// increasing `fids`) are the caller's responsibility.
    pub fn from_raw_parts(
        shape: Vec<usize>,
        dim_perm: &[usize],
        tile: TileScheme,
        tiles: Vec<SparsityPattern<T>>,
    ) -> Result<Self> {
        check_perm(dim_perm, shape.len())?;

        let nnz = tiles.iter().map(|pt| pt.vals.len()).sum();
        Ok(Self {
            shape,
            dim_perm: dim_perm.to_vec(),
            nnz,
            tile,
            tiles,
        })
    }

    /// Shape of the tensor
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of modes
    #[inline]
    pub fn nmodes(&self) -> usize {
        self.shape.len()
    }

    /// Number of non-zeros
    #[inline]
    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// The mode permutation, root (level 0) to leaf (level N-1)
    #[inline]
    pub fn dim_perm(&self) -> &[usize] {
        &self.dim_perm
    }

    /// Output tiling scheme tag
    #[inline]
    pub fn tile_scheme(&self) -> TileScheme {
        self.tile
    }

    /// Per-tile sparsity blocks
    #[inline]
    pub fn tiles(&self) -> &[SparsityPattern<T>] {
        &self.tiles
    }

    /// Density (nnz / total elements)
    pub fn density(&self) -> f64 {
        let total: usize = self.shape.iter().product();
        if total == 0 {
            return 0.0;
        }
        self.nnz as f64 / total as f64
    }
}

/// Iterator over CSF non-zeros, yielding (indices, value) in leaf order.
pub struct CsfIter<'a, T> {
    csf: &'a CsfTensor<T>,
    tile: usize,
    /// Current node at each level of the current tile
    cursor: Vec<usize>,
    /// Leaf position within the current tile
    leaf: usize,
}

impl<'a, T: Float> CsfIter<'a, T> {
    fn new(csf: &'a CsfTensor<T>) -> Self {
        Self {
            csf,
            tile: 0,
            cursor: vec![0; csf.nmodes()],
            leaf: 0,
        }
    }
}

impl<'a, T: Float> Iterator for CsfIter<'a, T> {
    type Item = (Vec<usize>, T);

    fn next(&mut self) -> Option<Self::Item> {
        let nmodes = self.csf.nmodes();

        // Skip exhausted or empty tiles
        while self.tile < self.csf.tiles.len() && self.leaf >= self.csf.tiles[self.tile].vals.len()
        {
            self.tile += 1;
            self.cursor.iter_mut().for_each(|c| *c = 0);
            self.leaf = 0;
        }
        if self.tile >= self.csf.tiles.len() {
            return None;
        }

        let pt = &self.csf.tiles[self.tile];

        // Advance internal cursors past fibers the current leaf has left.
        // Leaves arrive in fptr order, so each cursor moves monotonically.
        self.cursor[nmodes - 1] = self.leaf;
        for level in (0..nmodes - 1).rev() {
            while pt.fptr[level][self.cursor[level] + 1] <= self.cursor[level + 1] {
                self.cursor[level] += 1;
            }
        }

        let mut indices = vec![0; nmodes];
        for level in 0..nmodes {
            let id = if level == 0 {
                pt.slice_id(self.cursor[0])
            } else {
                pt.fids[level][self.cursor[level]]
            };
            indices[self.csf.dim_perm[level]] = id;
        }
        let value = pt.vals[self.leaf];

        self.leaf += 1;
        Some((indices, value))
    }
}
