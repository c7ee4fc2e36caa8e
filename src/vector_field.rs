// src/vector_field.rs
//
// Vector quantity on a structured 3D grid. Same flag/ownership model as
// ScalarField; M, Heff, S and Jc live in one of these.

use crate::error::SolverError;
use crate::grid::Grid3;
use crate::rect::Rect;
use crate::scalar_field::{CELL_CMBND, CELL_DIRICHLET, CELL_EMPTY};

#[derive(Debug, Clone)]
pub struct VecField {
    pub grid: Grid3,
    pub data: Vec<[f64; 3]>,
    pub flags: Vec<u8>,
}

impl VecField {
    pub fn new(grid: Grid3, value: [f64; 3]) -> Result<Self, SolverError> {
        let n = grid.n_cells();
        let mut data = Vec::new();
        data.try_reserve_exact(n)
            .map_err(|_| SolverError::Allocation { cells: n })?;
        data.resize(n, value);
        let mut flags = Vec::new();
        flags
            .try_reserve_exact(n)
            .map_err(|_| SolverError::Allocation { cells: n })?;
        flags.resize(n, 0u8);
        Ok(Self { grid, data, flags })
    }

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
                    flags.push(self.flags[old] & CELL_EMPTY);
                }
                None => {
                    data.push([0.0; 3]);
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
    pub fn is_free(&self, idx: usize) -> bool {
        self.flags[idx] & (CELL_EMPTY | CELL_DIRICHLET | CELL_CMBND) == 0
    }

    pub fn set_uniform(&mut self, value: [f64; 3]) {
        for (v, f) in self.data.iter_mut().zip(self.flags.iter()) {
            if f & CELL_EMPTY == 0 {
                *v = value;
            }
        }
    }

    pub fn set_zero(&mut self) {
        for v in &mut self.data {
            *v = [0.0; 3];
        }
    }

    pub fn clear_flags(&mut self, mask: u8) {
        for f in &mut self.flags {
            *f &= !mask;
        }
    }

    pub fn average_nonempty(&self) -> [f64; 3] {
        let mut sum = [0.0; 3];
        let mut count = 0usize;
        for idx in 0..self.data.len() {
            if !self.is_empty_cell(idx) {
                for d in 0..3 {
                    sum[d] += self.data[idx][d];
                }
                count += 1;
            }
        }
        if count > 0 {
            for d in 0..3 {
                sum[d] /= count as f64;
            }
        }
        sum
    }

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

    /// Gradient tensor with sided differences: `grad33(idx)[axis][comp]` is
    /// d(S_comp)/d(x_axis).
    pub fn grad33(&self, idx: usize) -> [[f64; 3]; 3] {
        let ijk = self.grid.ijk(idx);
        let mut g = [[0.0; 3]; 3];
        for axis in 0..3 {
            let h = self.grid.h[axis];
            let m = self.neighbour(ijk, axis, -1);
            let p = self.neighbour(ijk, axis, 1);
            for comp in 0..3 {
                g[axis][comp] = match (m, p) {
                    (Some(m), Some(p)) => (self.data[p][comp] - self.data[m][comp]) / (2.0 * h),
                    (None, Some(p)) => (self.data[p][comp] - self.data[idx][comp]) / h,
                    (Some(m), None) => (self.data[idx][comp] - self.data[m][comp]) / h,
                    (None, None) => 0.0,
                };
            }
        }
        g
    }

    /// Curl with sided differences.
    pub fn curl(&self, idx: usize) -> [f64; 3] {
        let g = self.grad33(idx);
        [
            g[1][2] - g[2][1],
            g[2][0] - g[0][2],
            g[0][1] - g[1][0],
        ]
    }

    /// Divergence with sided differences.
    pub fn div(&self, idx: usize) -> f64 {
        let g = self.grad33(idx);
        g[0][0] + g[1][1] + g[2][2]
    }

    /// Overlap-volume-weighted average sample; see ScalarField::weighted_average.
    pub fn weighted_average(&self, pos: [f64; 3], stencil: [f64; 3]) -> [f64; 3] {
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
            return [0.0; 3];
        };
        let mut sum = [0.0; 3];
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
                            for d in 0..3 {
                                sum[d] += w * self.data[idx][d];
                            }
                            wsum += w;
                        }
                    }
                }
            }
        }
        if wsum > 0.0 {
            [sum[0] / wsum, sum[1] / wsum, sum[2] / wsum]
        } else {
            self.grid
                .position_to_cell(pos)
                .map(|ijk| self.data[self.grid.idx(ijk[0], ijk[1], ijk[2])])
                .unwrap_or([0.0; 3])
        }
    }
}
