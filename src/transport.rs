// src/transport.rs
//
// Per-mesh charge/spin transport solver.
//
// The charge channel relaxes div(sigma grad V) = f with a single-sweep SOR
// contract: one call = one sweep over all free cells, returning the largest
// update and largest value seen so the orchestrator can form a relative
// convergence criterion across meshes. The discretisation is finite-volume
// with harmonic face conductances, so conductivity jumps keep flux continuity
// without an explicit grad-sigma term. Missing or empty neighbours are
// natural zero-flux (homogeneous Neumann) faces.
//
// The spin channel relaxes
//   laplace S = S/l_sf^2 + (S x m)/l_ex^2 + (m x (S x m))/l_ph^2 + fixed
// with the spin-flip term folded into the stencil diagonal and the precession
// terms evaluated from the sweep snapshot.
//
// The physics right-hand-side terms that depend only on M (not on V or S as
// they relax) are primed once per outer solve into delsq_v_fixed /
// delsq_s_fixed; re-evaluating them every sweep would dominate the cost of
// the cheap stencil update.
//
// Sweeps are parallelised with rayon in red-black order: two half-sweeps per
// call, each updating one parity from a consistent snapshot of the other.
// This keeps over-relaxation stable up to damping 2.0 and makes the sweep
// independent of traversal order; only the convergence path (not the fixed
// point) differs from a serial lexicographic Gauss-Seidel sweep.

use rayon::prelude::*;

use crate::mesh::Mesh;
use crate::params::{Material, MUB_E};
use crate::scalar_field::ScalarField;
use crate::vec3::{cross, dot, normalize, scale};
use crate::vector_field::VecField;

/// Spin-transport solve mode for one mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StSolve {
    /// Charge only.
    None,
    /// Non-magnetic mesh: S relaxes with spin-flip scattering, SHE/ISHE terms.
    Normal,
    /// Magnetic mesh: S couples to m (exchange rotation, dephasing, CPP-GMR,
    /// charge pumping, topological Hall).
    Ferromagnetic,
}

impl StSolve {
    pub fn from_material(mat: &Material, solve_spin: bool) -> Self {
        if !solve_spin {
            StSolve::None
        } else if mat.is_magnetic() {
            StSolve::Ferromagnetic
        } else {
            StSolve::Normal
        }
    }
}

pub struct Transport {
    pub stsolve: StSolve,

    /// Primed charge-equation RHS (V-independent physics terms).
    pub delsq_v_fixed: Vec<f64>,
    /// Primed spin-equation RHS (S-independent physics terms).
    pub delsq_s_fixed: Vec<[f64; 3]>,

    // per-sweep snapshot buffers
    scratch_v: Vec<f64>,
    scratch_s: Vec<[f64; 3]>,
    // extra (non-ohmic) current density accumulated while priming
    j_extra: Vec<[f64; 3]>,
}

impl Transport {
    pub fn new(stsolve: StSolve) -> Self {
        Self {
            stsolve,
            delsq_v_fixed: Vec::new(),
            delsq_s_fixed: Vec::new(),
            scratch_v: Vec::new(),
            scratch_s: Vec::new(),
            j_extra: Vec::new(),
        }
    }

    /// Invalidate and resize the primed caches after a mesh reconfiguration.
    pub fn update_configuration(&mut self, mesh: &Mesh) {
        let n = mesh.n_cells();
        self.delsq_v_fixed.clear();
        self.delsq_v_fixed.resize(n, 0.0);
        self.delsq_s_fixed.clear();
        self.delsq_s_fixed.resize(n, [0.0; 3]);
        self.scratch_v.resize(n, 0.0);
        self.scratch_s.resize(n, [0.0; 3]);
        self.j_extra.resize(n, [0.0; 3]);
    }

    /// Non-ohmic current density at one cell, as accumulated by the last
    /// priming pass.
    #[inline]
    pub fn j_extra_at(&self, idx: usize) -> [f64; 3] {
        self.j_extra.get(idx).copied().unwrap_or([0.0; 3])
    }

    // ---------------- conductivity ----------------

    /// Update elC from the base conductivity, temperature dependence and (if
    /// the AMR percentage is nonzero on a magnetic mesh) the angle between the
    /// local magnetisation and current direction.
    pub fn calculate_electrical_conductivity(&self, mesh: &mut Mesh) {
        let mat = &mesh.material;
        let use_amr = mat.amr != 0.0 && mat.is_magnetic();
        for idx in 0..mesh.elc.data.len() {
            if mesh.elc.is_empty_cell(idx) {
                continue;
            }
            let mut sigma = mat.elc0;
            if mat.temp_coeff != 0.0 {
                sigma /= 1.0 + mat.temp_coeff * (mesh.temp.data[idx] - 293.0);
            }
            if use_amr {
                let j = mesh.jc.data[idx];
                let j2 = dot(j, j);
                if j2 > 0.0 {
                    let c = dot(mesh.m.data[idx], normalize(j));
                    sigma /= 1.0 + (mat.amr / 100.0) * c * c;
                }
            }
            mesh.elc.data[idx] = sigma;
        }
    }

    /// Jc = -sigma grad V plus the primed non-ohmic contribution.
    pub fn calculate_current_density(&self, mesh: &mut Mesh) {
        for idx in 0..mesh.jc.data.len() {
            if mesh.v.is_empty_cell(idx) {
                mesh.jc.data[idx] = [0.0; 3];
                continue;
            }
            let g = mesh.v.grad_sided(idx);
            let sigma = mesh.elc.data[idx];
            let je = self.j_extra.get(idx).copied().unwrap_or([0.0; 3]);
            mesh.jc.data[idx] = [
                -sigma * g[0] + je[0],
                -sigma * g[1] + je[1],
                -sigma * g[2] + je[2],
            ];
        }
    }

    // ---------------- charge channel ----------------

    /// One SOR sweep of the pure charge solver. Returns (max_error, max_value)
    /// over updated cells.
    pub fn iterate_charge_sor(&mut self, mesh: &mut Mesh, damping: f64) -> (f64, f64) {
        let Mesh {
            ref mut v, ref elc, ..
        } = *mesh;
        charge_sweep(v, elc, None, damping, &mut self.scratch_v)
    }

    /// One SOR sweep of the charge equation inside the spin solver: same
    /// stencil, plus the primed physics RHS.
    pub fn iterate_spin_charge_sor(&mut self, mesh: &mut Mesh, damping: f64) -> (f64, f64) {
        let Mesh {
            ref mut v, ref elc, ..
        } = *mesh;
        charge_sweep(
            v,
            elc,
            Some(&self.delsq_v_fixed),
            damping,
            &mut self.scratch_v,
        )
    }

    /// Pre-compute the V-independent charge RHS terms. Called once per outer
    /// transport solve, before the charge sweeps.
    pub fn prime_spin_solver_charge(&mut self, mesh: &Mesh, dm_dt: Option<&VecField>) {
        let n = mesh.n_cells();
        for q in self.j_extra.iter_mut() {
            *q = [0.0; 3];
        }
        let mat = &mesh.material;

        if self.stsolve == StSolve::Ferromagnetic {
            let cppgmr = mat.beta_d != 0.0;
            let cpump = mat.cpump_eff != 0.0 && dm_dt.is_some();
            let the = mat.the_eff != 0.0;

            if cppgmr || cpump || the {
                for idx in 0..n {
                    if mesh.v.is_empty_cell(idx) {
                        continue;
                    }
                    let m = mesh.m.data[idx];
                    let grad_m = mesh.m.grad33(idx);
                    let sigma = mesh.elc.data[idx];
                    let mut j = [0.0; 3];

                    // CPP-GMR: diffusion-polarisation current betaD De/muB_e (grad S) m
                    if cppgmr {
                        let gs = mesh.s.grad33(idx);
                        let c = mat.beta_d * mat.de / MUB_E * sigma / mat.elc0.max(1.0);
                        for axis in 0..3 {
                            j[axis] += c * dot(gs[axis], m);
                        }
                    }

                    // charge pumping: P sigma hbar/2e (dm/dt x d_i m) . m, in-plane
                    if cpump {
                        let dmdt = dm_dt.unwrap().data[idx];
                        let c = mat.cpump_eff * mat.p * sigma * crate::params::HBAR
                            / (2.0 * crate::params::ECHARGE);
                        j[0] += c * dot(cross(dmdt, grad_m[0]), m);
                        j[1] += c * dot(cross(dmdt, grad_m[1]), m);
                    }

                    // topological Hall: emergent field Bz = (d_x m x d_y m) . m
                    // deflecting the previously relaxed E. Lags V by one outer
                    // solve; converges over successive solves.
                    if the {
                        let bz = dot(cross(grad_m[0], grad_m[1]), m);
                        let e = scale(mesh.v.grad_sided(idx), -1.0);
                        let c = mat.the_eff
                            * (-mat.p * sigma * sigma * crate::params::HBAR
                                / (crate::params::ECHARGE
                                    * crate::params::ECHARGE
                                    * mat.n_density));
                        j[0] += c * e[1] * bz;
                        j[1] -= c * e[0] * bz;
                    }

                    self.j_extra[idx] = j;
                }
            }
        } else if self.stsolve == StSolve::Normal && mat.sha != 0.0 {
            // inverse spin Hall: J_ishe = SHA De/muB_e curl S
            let c = mat.sha * mat.de / MUB_E;
            for idx in 0..n {
                if mesh.v.is_empty_cell(idx) {
                    continue;
                }
                self.j_extra[idx] = scale(mesh.s.curl(idx), c);
            }
        }

        // f = -div J_extra, so div(sigma grad V) = f closes charge continuity
        for idx in 0..n {
            self.delsq_v_fixed[idx] = if mesh.v.is_empty_cell(idx) {
                0.0
            } else {
                -div_of(&self.j_extra, &mesh.v, idx)
            };
        }
    }

    // ---------------- spin channel ----------------

    /// Pre-compute the S-independent spin RHS terms (spin injection from the
    /// polarised charge current, spin Hall source).
    pub fn prime_spin_solver_spin(&mut self, mesh: &Mesh, _dm_dt: Option<&VecField>) {
        let n = mesh.n_cells();
        let mat = &mesh.material;
        for f in self.delsq_s_fixed.iter_mut() {
            *f = [0.0; 3];
        }

        match self.stsolve {
            StSolve::Ferromagnetic => {
                if mat.p != 0.0 {
                    let c = -mat.p * MUB_E / (mat.de * mat.de);
                    for idx in 0..n {
                        if mesh.s.is_empty_cell(idx) {
                            continue;
                        }
                        let gm = mesh.m.grad33(idx);
                        let jc = mesh.jc.data[idx];
                        // (Jc . grad) m
                        let mut src = [0.0; 3];
                        for comp in 0..3 {
                            src[comp] = jc[0] * gm[0][comp]
                                + jc[1] * gm[1][comp]
                                + jc[2] * gm[2][comp];
                        }
                        self.delsq_s_fixed[idx] = scale(src, c * mat.de);
                    }
                }
            }
            StSolve::Normal => {
                if mat.sha != 0.0 {
                    let c = mat.sha * MUB_E / mat.de;
                    for idx in 0..n {
                        if mesh.s.is_empty_cell(idx) {
                            continue;
                        }
                        self.delsq_s_fixed[idx] = scale(mesh.jc.curl(idx), c);
                    }
                }
            }
            StSolve::None => {}
        }
    }

    /// One SOR sweep of the spin accumulation equation.
    pub fn iterate_spin_spin_sor(&mut self, mesh: &mut Mesh, damping: f64) -> (f64, f64) {
        if self.stsolve == StSolve::None {
            return (0.0, 0.0);
        }
        let Mesh {
            ref mut s,
            ref m,
            ref material,
            ..
        } = *mesh;

        let n = s.data.len();
        self.scratch_s.resize(n, [0.0; 3]);
        let scratch = &mut self.scratch_s;
        let fixed = &self.delsq_s_fixed;
        let grid = s.grid;
        let ferro = self.stsolve == StSolve::Ferromagnetic;
        let vol = grid.cell_volume();
        let inv_lsf2 = 1.0 / (material.l_sf * material.l_sf);
        let inv_lex2 = 1.0 / (material.l_ex * material.l_ex);
        let inv_lph2 = 1.0 / (material.l_ph * material.l_ph);

        let mut max_err = 0.0f64;
        let mut max_val = 0.0f64;
        for color in 0..2usize {
            let s_ref: &VecField = s;
            let (err, val) = scratch
                .par_iter_mut()
                .enumerate()
                .map(|(idx, out)| {
                    let old = s_ref.data[idx];
                    let ijk = grid.ijk(idx);
                    if (ijk[0] + ijk[1] + ijk[2]) % 2 != color || !s_ref.is_free(idx) {
                        *out = old;
                        return (0.0f64, 0.0f64);
                    }
                    let mut wsum = 0.0;
                    let mut acc = [0.0; 3];
                    for axis in 0..3 {
                        let w = grid.face_area(axis) / grid.h[axis];
                        for dir in [-1isize, 1] {
                            if let Some(nb) = s_ref.neighbour(ijk, axis, dir) {
                                let sv = s_ref.data[nb];
                                acc[0] += w * sv[0];
                                acc[1] += w * sv[1];
                                acc[2] += w * sv[2];
                                wsum += w;
                            }
                        }
                    }
                    if wsum == 0.0 {
                        *out = old;
                        return (0.0, 0.0);
                    }

                    // snapshot-lagged precession/dephasing terms (magnetic meshes)
                    let mut rhs = fixed[idx];
                    if ferro {
                        let mv = m.data[idx];
                        let sxm = cross(old, mv);
                        let mxsxm = cross(mv, sxm);
                        for d in 0..3 {
                            rhs[d] += sxm[d] * inv_lex2 + mxsxm[d] * inv_lph2;
                        }
                    }

                    let diag = wsum + vol * inv_lsf2;
                    let mut err: f64 = 0.0;
                    let mut val: f64 = 0.0;
                    let mut new = [0.0; 3];
                    for d in 0..3 {
                        let target = (acc[d] - vol * rhs[d]) / diag;
                        new[d] = old[d] + damping * (target - old[d]);
                        err = err.max((new[d] - old[d]).abs());
                        val = val.max(new[d].abs());
                    }
                    *out = new;
                    (err, val)
                })
                .reduce(|| (0.0, 0.0), |a, b| (a.0.max(b.0), a.1.max(b.1)));

            for idx in 0..n {
                let ijk = grid.ijk(idx);
                if (ijk[0] + ijk[1] + ijk[2]) % 2 == color && s.is_free(idx) {
                    s.data[idx] = scratch[idx];
                }
            }
            max_err = max_err.max(err);
            max_val = max_val.max(val);
        }
        (max_err, max_val)
    }

    // ---------------- spin torque fields ----------------

    /// Add the bulk spin-accumulation torque field into Heff (magnetic meshes
    /// only). Contribution in Tesla:
    ///   B_sa = ts_eff De/(gamma Ms) [ (S x m)/l_ex^2 + (m x (S x m))/l_ph^2 ]
    pub fn calculate_sa_field(&self, mesh: &mut Mesh) {
        if self.stsolve != StSolve::Ferromagnetic {
            return;
        }
        let mat = &mesh.material;
        if mat.ms == 0.0 {
            return;
        }
        let c = mat.ts_eff * mat.de / (mat.gamma() * mat.ms);
        let inv_lex2 = 1.0 / (mat.l_ex * mat.l_ex);
        let inv_lph2 = 1.0 / (mat.l_ph * mat.l_ph);
        for idx in 0..mesh.heff.data.len() {
            if mesh.heff.is_empty_cell(idx) {
                continue;
            }
            let m = mesh.m.data[idx];
            let s = mesh.s.data[idx];
            let sxm = cross(s, m);
            let mxsxm = cross(m, sxm);
            for d in 0..3 {
                mesh.heff.data[idx][d] += c * (sxm[d] * inv_lex2 + mxsxm[d] * inv_lph2);
            }
        }
    }
}

/// Shared charge-sweep kernel: finite-volume red-black SOR.
fn charge_sweep(
    v: &mut ScalarField,
    elc: &ScalarField,
    rhs: Option<&[f64]>,
    damping: f64,
    scratch: &mut Vec<f64>,
) -> (f64, f64) {
    let n = v.data.len();
    scratch.resize(n, 0.0);
    let grid = v.grid;
    let vol = grid.cell_volume();

    let mut max_err = 0.0f64;
    let mut max_val = 0.0f64;
    for color in 0..2usize {
        let v_ref: &ScalarField = v;
        let (err, val) = scratch
            .par_iter_mut()
            .enumerate()
            .map(|(idx, out)| {
                let old = v_ref.data[idx];
                let ijk = grid.ijk(idx);
                if (ijk[0] + ijk[1] + ijk[2]) % 2 != color || !v_ref.is_free(idx) {
                    *out = old;
                    return (0.0f64, 0.0f64);
                }
                let sigma_c = elc.data[idx];
                let mut wsum = 0.0;
                let mut acc = 0.0;
                for axis in 0..3 {
                    let geom = grid.face_area(axis) / grid.h[axis];
                    for dir in [-1isize, 1] {
                        if let Some(nb) = v_ref.neighbour(ijk, axis, dir) {
                            let sigma_n = elc.data[nb];
                            let sigma_f = if sigma_c + sigma_n > 0.0 {
                                2.0 * sigma_c * sigma_n / (sigma_c + sigma_n)
                            } else {
                                0.0
                            };
                            let w = sigma_f * geom;
                            acc += w * v_ref.data[nb];
                            wsum += w;
                        }
                    }
                }
                if wsum == 0.0 {
                    *out = old;
                    return (0.0, 0.0);
                }
                let f = rhs.map(|r| r[idx]).unwrap_or(0.0);
                let target = (acc - f * vol) / wsum;
                let new = old + damping * (target - old);
                *out = new;
                ((new - old).abs(), new.abs())
            })
            .reduce(|| (0.0, 0.0), |a, b| (a.0.max(b.0), a.1.max(b.1)));

        for idx in 0..n {
            let ijk = grid.ijk(idx);
            if (ijk[0] + ijk[1] + ijk[2]) % 2 == color && v.is_free(idx) {
                v.data[idx] = scratch[idx];
            }
        }
        max_err = max_err.max(err);
        max_val = max_val.max(val);
    }
    (max_err, max_val)
}

/// Discrete residual of div(sigma grad V) = f at one cell, normalised like the
/// SOR increment (volts). Converged fields have this below the solver
/// threshold on every free cell.
pub fn charge_residual(v: &ScalarField, elc: &ScalarField, rhs: Option<&[f64]>, idx: usize) -> f64 {
    if !v.is_free(idx) {
        return 0.0;
    }
    let grid = v.grid;
    let ijk = grid.ijk(idx);
    let sigma_c = elc.data[idx];
    let mut wsum = 0.0;
    let mut acc = 0.0;
    for axis in 0..3 {
        let geom = grid.face_area(axis) / grid.h[axis];
        for dir in [-1isize, 1] {
            if let Some(nb) = v.neighbour(ijk, axis, dir) {
                let sigma_n = elc.data[nb];
                let sigma_f = if sigma_c + sigma_n > 0.0 {
                    2.0 * sigma_c * sigma_n / (sigma_c + sigma_n)
                } else {
                    0.0
                };
                let w = sigma_f * geom;
                acc += w * (v.data[nb] - v.data[idx]);
                wsum += w;
            }
        }
    }
    if wsum == 0.0 {
        return 0.0;
    }
    let f = rhs.map(|r| r[idx]).unwrap_or(0.0);
    (acc - f * grid.cell_volume()) / wsum
}

/// Sided divergence of a cell-vector array, using the flag layout of `like`.
fn div_of(field: &[[f64; 3]], like: &ScalarField, idx: usize) -> f64 {
    let grid = like.grid;
    let ijk = grid.ijk(idx);
    let mut div = 0.0;
    for axis in 0..3 {
        let h = grid.h[axis];
        let m = like.neighbour(ijk, axis, -1);
        let p = like.neighbour(ijk, axis, 1);
        div += match (m, p) {
            (Some(m), Some(p)) => (field[p][axis] - field[m][axis]) / (2.0 * h),
            (None, Some(p)) => (field[p][axis] - field[idx][axis]) / h,
            (Some(m), None) => (field[idx][axis] - field[m][axis]) / h,
            (None, None) => 0.0,
        };
    }
    div
}
