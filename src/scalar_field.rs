// src/scalar_field.rs
//
// Scalar quantity on a structured 3D grid with per-cell boundary-condition
// flags. This is the workhorse container for the transport solver: V and elC
// live in one of these.
//
// Flag semantics:
//  - EMPTY: cell is outside the material footprint; never read or written by
//    sweeps, contributes zero flux.
//  - DIRICHLET: fixed-potential (electrode) cell; holds its value in `data`
//    and is skipped by the SOR sweep but read as a normal neighbour.
//  - CMBND: boundary cell owned by the inter-mesh contact update; skipped by
//    the SOR sweep, rewritten after every sweep from flux continuity.
//
// Invariant: `data` and `flags` always have grid.n_cells() entries; resizes
// are all-or-nothing (allocation failure leaves the field untouched).

use crate::error::SolverError;
use crate::grid::Grid3;
use crate::rect::Rect;

pub const CELL_EMPTY: u8 = 1 << 0;
pub const CELL_DIRICHLET: u8 = 1 << 1;
pub const CELL_CMBND: u8 = 1 << 2;

#[derive(Debug, Clone)]
pub struct ScalarField {
    pub grid: Grid3,
    pub data: Vec<f64>,
    pub flags: Vec<u8>,
}

fn alloc_vec<T: Clone>(value: T, n: usize) -> Result<Vec<T>, SolverError> {
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|_| SolverError::Allocation { cells: n })?;
    v.resize(n, value);
    Ok(v)
}

impl ScalarField {
    pub fn new(grid: Grid3, value: f64) -> Result<Self, SolverError> {
        let n = grid.n_cells();
        Ok(Self {
            grid,
            data: alloc_vec(value, n)?,
            flags: alloc_vec(0u8, n)?,
        })
    }

    /// Resize onto a new grid, remapping values by nearest-cell sampling.
    /// On allocation failure the field is left unchanged.
    pub fn resize(&mut self, new_grid: Grid3) -> Result<(), SolverError> {
        let n = new_grid.n_cells();
        let mut data = Vec::new();
        data.try_reserve_exact(n)
            .map_err(|_| SolverError::Allocation { cells: n })?;
        let mut flags = Vec::new();
        flags
            .try_reserve_exact(n)
            .map_err(|_| SolverError::Allocation { cells: n })?;

        for idx in 0..n {
            let pos = new_grid.cell_center(new_grid.ijk(idx));
            match self.grid.position_to_cell(pos) {
                Some(ijk) => {
                    let old = self.grid.idx(ijk[0], ijk[1], ijk[2]);
                    data.push(self.data[old]);
                    // only the geometry mask survives a resize; electrode and
                    // contact flags are re-marked by update_configuration
                    flags.push(self.flags[old] & CELL_EMPTY);
                }
                None => {
                    data.push(0.0);
                    flags.push(0);
                }
            }
        }

        self.grid = new_grid;
        self.data = data;
        self.flags = flags;
        Ok(())
    }

    #[inline]
    pub fn is_empty_cell(&self, idx: usize) -> bool {
        self.flags[idx] & CELL_EMPTY != 0
    }

    #[inline]
    pub fn is_dirichlet(&self, idx: usize) -> bool {
        self.flags[idx] & CELL_DIRICHLET != 0
    }

    #[inline]
    pub fn is_cmbnd(&self, idx: usize) -> bool {
        self.flags[idx] & CELL_CMBND != 0
    }

    /// True if the SOR sweep updates this cell.
    #[inline]
    pub fn is_free(&self, idx: usize) -> bool {
        self.flags[idx] & (CELL_EMPTY | CELL_DIRICHLET | CELL_CMBND) == 0
    }

    pub fn set_uniform(&mut self, value: f64) {
        for (v, f) in self.data.iter_mut().zip(self.flags.iter()) {
            if f & CELL_EMPTY == 0 {
                *v = value;
            }
        }
    }

    pub fn scale_values(&mut self, scaling: f64) {
        for v in &mut self.data {
            *v *= scaling;
        }
    }

    /// Linear profile between two anchor points (used for the electrode-slope
    /// initial guess): each cell takes the value interpolated by its projected
    /// position on the p1 -> p2 segment.
    pub fn set_linear(&mut self, p1: [f64; 3], v1: f64, p2: [f64; 3], v2: f64) {
        let d = [p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2]];
        let len2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
        if len2 == 0.0 {
            return;
        }
        for idx in 0..self.data.len() {
            if self.is_empty_cell(idx) {
                continue;
            }
            let c = self.grid.cell_center(self.grid.ijk(idx));
            let t = ((c[0] - p1[0]) * d[0] + (c[1] - p1[1]) * d[1] + (c[2] - p1[2]) * d[2]) / len2;
            let t = t.clamp(0.0, 1.0);
            self.data[idx] = v1 + t * (v2 - v1);
        }
    }

    /// Average over non-empty cells. Zero for an all-empty field.
    pub fn average_nonempty(&self) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for idx in 0..self.data.len() {
            if !self.is_empty_cell(idx) {
                sum += self.data[idx];
                count += 1;
            }
        }
        if count > 0 {
            sum / count as f64
        } else {
            0.0
        }
    }

    /// Mark all cells intersecting `rect` (absolute coordinates) as fixed
    /// Dirichlet cells holding `value`.
    pub fn set_dirichlet(&mut self, rect: &Rect, value: f64) {
        if let Some(b) = self.grid.box_from_rect(rect) {
            for k in b[2].0..b[2].1 {
                for j in b[1].0..b[1].1 {
                    for i in b[0].0..b[0].1 {
                        let idx = self.grid.idx(i, j, k);
                        if !self.is_empty_cell(idx) {
                            self.flags[idx] |= CELL_DIRICHLET;
                            self.data[idx] = value;
                        }
                    }
                }
            }
        }
    }

    pub fn clear_flags(&mut self, mask: u8) {
        for f in &mut self.flags {
            *f &= !mask;
        }
    }

    pub fn mark_empty(&mut self, rect: &Rect) {
        if let Some(b) = self.grid.box_from_rect(rect) {
            for k in b[2].0..b[2].1 {
                for j in b[1].0..b[1].1 {
                    for i in b[0].0..b[0].1 {
                        let idx = self.grid.idx(i, j, k);
                        self.flags[idx] |= CELL_EMPTY;
                        self.data[idx] = 0.0;
                    }
                }
            }
        }
    }

    /// Neighbour cell index along `axis` in direction `dir` (+1/-1), or None
    /// at the grid boundary or if the neighbour is an empty cell.
    #[inline]
    pub fn neighbour(&self, ijk: [usize; 3], axis: usize, dir: isize) -> Option<usize> {
        let v = ijk[axis] as isize + dir;
        if v < 0 || v >= self.grid.n[axis] as isize {
            return None;
        }
        let mut nb = ijk;
        nb[axis] = v as usize;
        let idx = self.grid.idx(nb[0], nb[1], nb[2]);
        if self.is_empty_cell(idx) {
            None
        } else {
            Some(idx)
        }
    }

    /// Sided gradient: central difference where both neighbours exist, one
    /// sided at boundaries, zero where isolated.
    pub fn grad_sided(&self, idx: usize) -> [f64; 3] {
        let ijk = self.grid.ijk(idx);
        let mut g = [0.0; 3];
        for axis in 0..3 {
            let h = self.grid.h[axis];
            let m = self.neighbour(ijk, axis, -1);
            let p = self.neighbour(ijk, axis, 1);
            g[axis] = match (m, p) {
                (Some(m), Some(p)) => (self.data[p] - self.data[m]) / (2.0 * h),
                (None, Some(p)) => (self.data[p] - self.data[idx]) / h,
                (Some(m), None) => (self.data[idx] - self.data[m]) / h,
                (None, None) => 0.0,
            };
        }
        g
    }

    /// Overlap-volume-weighted average over cells intersecting the stencil box
    /// centred at `pos` (absolute coordinates). Used to sample a neighbouring
    /// mesh of different cell size across a CMBND contact. Empty cells are
    /// excluded; an all-empty stencil returns zero.
    pub fn weighted_average(&self, pos: [f64; 3], stencil: [f64; 3]) -> f64 {
        let r = Rect::new(
            [
                pos[0] - 0.5 * stencil[0],
                pos[1] - 0.5 * stencil[1],
                pos[2] - 0.5 * stencil[2],
            ],
            [
                pos[0] + 0.5 * stencil[0],
                pos[1] + 0.5 * stencil[1],
                pos[2] + 0.5 * stencil[2],
            ],
        );
        let Some(b) = self.grid.box_from_rect(&r) else {
            return 0.0;
        };
        let mut sum = 0.0;
        let mut wsum = 0.0;
        for k in b[2].0..b[2].1 {
            for j in b[1].0..b[1].1 {
                for i in b[0].0..b[0].1 {
                    let idx = self.grid.idx(i, j, k);
                    if self.is_empty_cell(idx) {
                        continue;
                    }
                    let cs = self.grid.rect.s;
                    let h = self.grid.h;
                    let cell = Rect::new(
                        [
                            cs[0] + i as f64 * h[0],
                            cs[1] + j as f64 * h[1],
                            cs[2] + k as f64 * h[2],
                        ],
                        [
                            cs[0] + (i + 1) as f64 * h[0],
                            cs[1] + (j + 1) as f64 * h[1],
                            cs[2] + (k + 1) as f64 * h[2],
                        ],
                    );
                    if let Some(o) = cell.intersection(&r) {
                        let w = o.volume();
                        if w > 0.0 {
                            sum += w * self.data[idx];
                            wsum += w;
                        }
                    }
                }
            }
        }
        if wsum > 0.0 {
            sum / wsum
        } else {
            // degenerate stencil (e.g. zero thickness): fall back to the
            // containing cell
            self.grid
                .position_to_cell(pos)
                .map(|ijk| self.data[self.grid.idx(ijk[0], ijk[1], ijk[2])])
                .unwrap_or(0.0)
        }
    }
}
