// src/grid.rs

use crate::rect::{Rect, GEOM_EPS};

/// Structured 3D finite-difference grid: n cells of size h filling `rect`.
/// Invariant: n[d] * h[d] == rect extent along d.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid3 {
    pub n: [usize; 3],
    pub h: [f64; 3],
    pub rect: Rect,
}

impl Grid3 {
    /// Build a grid from cell counts, cell size and the start corner.
    pub fn new(n: [usize; 3], h: [f64; 3], origin: [f64; 3]) -> Self {
        let e = [
            origin[0] + n[0] as f64 * h[0],
            origin[1] + n[1] as f64 * h[1],
            origin[2] + n[2] as f64 * h[2],
        ];
        Self {
            n,
            h,
            rect: Rect::new(origin, e),
        }
    }

    /// Build a grid covering `rect` with the given cell size; n is rounded
    /// and h re-adjusted so n * h matches the rect extent exactly.
    pub fn from_rect(rect: Rect, h: [f64; 3]) -> Self {
        let d = rect.size();
        let mut n = [0usize; 3];
        let mut h_adj = [0.0; 3];
        for dim in 0..3 {
            n[dim] = ((d[dim] / h[dim]).round() as usize).max(1);
            h_adj[dim] = d[dim] / n[dim] as f64;
        }
        Self { n, h: h_adj, rect }
    }

    pub fn n_cells(&self) -> usize {
        self.n[0] * self.n[1] * self.n[2]
    }

    pub fn cell_volume(&self) -> f64 {
        self.h[0] * self.h[1] * self.h[2]
    }

    /// Area of the cell face normal to `axis`.
    pub fn face_area(&self, axis: usize) -> f64 {
        self.h[(axis + 1) % 3] * self.h[(axis + 2) % 3]
    }

    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.n[0] && j < self.n[1] && k < self.n[2]);
        i + j * self.n[0] + k * self.n[0] * self.n[1]
    }

    #[inline]
    pub fn ijk(&self, idx: usize) -> [usize; 3] {
        let nx = self.n[0];
        let nxy = self.n[0] * self.n[1];
        [idx % nx, (idx / nx) % self.n[1], idx / nxy]
    }

    /// Cell centre in absolute coordinates.
    pub fn cell_center(&self, ijk: [usize; 3]) -> [f64; 3] {
        [
            self.rect.s[0] + (ijk[0] as f64 + 0.5) * self.h[0],
            self.rect.s[1] + (ijk[1] as f64 + 0.5) * self.h[1],
            self.rect.s[2] + (ijk[2] as f64 + 0.5) * self.h[2],
        ]
    }

    /// Cell containing the absolute position, or None if outside the grid.
    pub fn position_to_cell(&self, p: [f64; 3]) -> Option<[usize; 3]> {
        if !self.rect.contains(p) {
            return None;
        }
        let mut ijk = [0usize; 3];
        for d in 0..3 {
            let f = (p[d] - self.rect.s[d]) / self.h[d];
            // cap to the last cell so positions on the end face resolve
            ijk[d] = (f.floor() as isize).clamp(0, self.n[d] as isize - 1) as usize;
        }
        Some(ijk)
    }

    /// Range of cell indices along each axis whose cells intersect `r`
    /// (absolute coordinates), clipped to the grid. Start inclusive, end
    /// exclusive. A zero-thickness rect lying on a cell face selects the cell
    /// layer on its interior side.
    pub fn box_from_rect(&self, r: &Rect) -> Option<[(usize, usize); 3]> {
        let mut out = [(0usize, 0usize); 3];
        for d in 0..3 {
            let lo = (r.s[d] - self.rect.s[d]) / self.h[d];
            let hi = (r.e[d] - self.rect.s[d]) / self.h[d];
            let mut start = (lo + GEOM_EPS).floor() as isize;
            let mut end = (hi - GEOM_EPS).ceil() as isize;
            if end <= start {
                // zero-thickness along this axis: pick the adjacent cell
                // layer, rejecting planes that do not lie on this grid
                let mid = 0.5 * (lo + hi);
                if mid < -0.5 || mid > self.n[d] as f64 + 0.5 {
                    return None;
                }
                start = if mid >= self.n[d] as f64 - 0.5 {
                    self.n[d] as isize - 1
                } else {
                    mid.floor() as isize
                };
                end = start + 1;
            }
            start = start.clamp(0, self.n[d] as isize);
            end = end.clamp(0, self.n[d] as isize);
            if end <= start {
                return None;
            }
            out[d] = (start as usize, end as usize);
        }
        Some(out)
    }
}
