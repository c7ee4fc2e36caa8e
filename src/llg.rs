// src/llg.rs
//
// Magnetisation dynamics integrator. One Integrator drives all magnetic
// meshes with a shared time base; each call to `advance` performs one
// evaluation sub-stage, and `time_step_solved` reports whether the last call
// completed a full step. The transport solver keys off that flag: it only
// re-solves when the magnetisation has actually moved by a whole step.
//
// Equations (m is the unit magnetisation direction for the LLG family, the
// reduced magnetisation for LLB; B is the effective induction in Tesla):
//   LLG     dm/dt = -gamma/(1+a^2) [ m x B + a m x (m x B) ]
//   LLG-STT adds the Zhang-Li terms driven by the charge current density
//   LLB     dm/dt = -gamma m x B + gamma a_par (m.B) m / |m|^2
//                   - gamma a (m x (m x B)) / |m|^2
// Stochastic variants add a thermal field regenerated once per full step
// (never per sub-stage): 3 i.i.d. N(0,1) draws per cell scaled by
// sqrt(2 kB T / (gamma V mu0 Ms dt)). The noise enters the damping term only,
// rescaled by 1/sqrt(a) (LLB: sqrt(a - a_par)/a); the precession term uses
// Heff alone. Stochastic LLB additionally draws a longitudinal thermal torque
// of magnitude sqrt(2 kB T gamma Ms / (mu0 V dt)) per component, added as
// sqrt(a_par) times the realisation.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::SolverError;
use crate::mesh::Mesh;
use crate::params::{KB, MU0, MUB_E};
use crate::vec3::{add, cross, dot, normalize, scale, sub};
use crate::vector_field::VecField;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalScheme {
    Euler,
    /// Heun predictor-corrector.
    Trapezoidal,
    Rk4,
    /// Fehlberg 4(5) embedded pair with adaptive dt.
    Rkf45,
    /// Two-step Adams-Bashforth-Moulton (Euler startup).
    Abm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Equation {
    Llg,
    LlgStt,
    /// Stochastic LLG (thermal field).
    SLlg,
    Llb,
    /// Stochastic LLB.
    SLlb,
}

impl Equation {
    pub fn is_stochastic(self) -> bool {
        matches!(self, Equation::SLlg | Equation::SLlb)
    }

    pub fn is_llb(self) -> bool {
        matches!(self, Equation::Llb | Equation::SLlb)
    }
}

// RKF45 Butcher tableau
const RKF_C: [f64; 6] = [0.0, 0.25, 0.375, 12.0 / 13.0, 1.0, 0.5];
const RKF_A: [[f64; 5]; 5] = [
    [0.25, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 32.0, 9.0 / 32.0, 0.0, 0.0, 0.0],
    [1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0, 0.0, 0.0],
    [439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0, 0.0],
    [-8.0 / 27.0, 2.0, -3544.0 / 2565.0, 1859.0 / 4104.0, -11.0 / 40.0],
];
const RKF_B5: [f64; 6] = [
    16.0 / 135.0,
    0.0,
    6656.0 / 12825.0,
    28561.0 / 56430.0,
    -9.0 / 50.0,
    2.0 / 55.0,
];
const RKF_B4: [f64; 6] = [25.0 / 216.0, 0.0, 1408.0 / 2565.0, 2197.0 / 4104.0, -0.2, 0.0];

struct MeshOde {
    /// Magnetisation at the start of the step.
    m0: Vec<[f64; 3]>,
    /// Stage slopes.
    k: [Vec<[f64; 3]>; 6],
    /// Candidate solution held between the error estimate and the
    /// accept/reject decision (RKF45).
    m_new: Vec<[f64; 3]>,
    /// dm/dt at the start of the current step, exposed for charge pumping.
    dm_dt: VecField,
    /// Thermal field for the current step (empty when deterministic).
    h_th: Vec<[f64; 3]>,
    /// Longitudinal thermal torque for the current step (stochastic LLB only).
    t_th: Vec<[f64; 3]>,
    /// Previous step's start slope (ABM history).
    prev_f: Vec<[f64; 3]>,
}

pub struct Integrator {
    pub scheme: EvalScheme,
    pub equation: Equation,
    pub dt: f64,
    pub time: f64,

    // RKF45 step-size controller
    pub max_err: f64,
    pub headroom: f64,
    pub dt_min: f64,
    pub dt_max: f64,
    /// Error estimate of the last completed RKF45 stage pass.
    pub last_error: f64,

    stage: usize,
    time_step_solved: bool,
    step_start_time: f64,
    new_step: bool,
    has_prev: bool,
    rng: StdRng,
    states: Vec<MeshOde>,
}

impl Integrator {
    pub fn new(scheme: EvalScheme, equation: Equation, dt: f64) -> Self {
        Self {
            scheme,
            equation,
            dt,
            time: 0.0,
            max_err: 1e-5,
            headroom: 0.9,
            dt_min: 1e-16,
            dt_max: 1e-12,
            last_error: 0.0,
            stage: 0,
            time_step_solved: true,
            step_start_time: 0.0,
            new_step: true,
            has_prev: false,
            rng: StdRng::seed_from_u64(0x5eed),
            states: Vec::new(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// True after the sub-stage that completed a full accepted step.
    pub fn time_step_solved(&self) -> bool {
        self.time_step_solved
    }

    /// Start-of-step dm/dt fields, parallel to the mesh list.
    pub fn dm_dt(&self) -> Vec<&VecField> {
        self.states.iter().map(|s| &s.dm_dt).collect()
    }

    /// Rebuild per-mesh stage buffers. Must be called after meshes are added
    /// or resized.
    pub fn update_configuration(&mut self, meshes: &[Mesh]) -> Result<(), SolverError> {
        self.states.clear();
        for mesh in meshes {
            let n = mesh.n_cells();
            self.states.push(MeshOde {
                m0: vec![[0.0; 3]; n],
                k: std::array::from_fn(|_| vec![[0.0; 3]; n]),
                m_new: vec![[0.0; 3]; n],
                dm_dt: VecField::new(mesh.grid, [0.0; 3])?,
                h_th: Vec::new(),
                t_th: Vec::new(),
                prev_f: vec![[0.0; 3]; n],
            });
        }
        self.stage = 0;
        self.new_step = true;
        self.has_prev = false;
        Ok(())
    }

    // ---------------- thermal field ----------------

    /// Draw the thermal field for the step ahead. Regenerated only at step
    /// start so every sub-stage of one step sees the same realisation.
    fn generate_thermal_field(&mut self, meshes: &[Mesh]) {
        let normal = Normal::new(0.0, 1.0).expect("unit normal");
        let llb = self.equation.is_llb();
        for (mesh, state) in meshes.iter().zip(self.states.iter_mut()) {
            let mat = &mesh.material;
            if !mat.is_magnetic() {
                state.h_th.clear();
                state.t_th.clear();
                continue;
            }
            let n = mesh.n_cells();
            state.h_th.resize(n, [0.0; 3]);
            if llb {
                state.t_th.resize(n, [0.0; 3]);
            }
            let vol = mesh.grid.cell_volume();
            for idx in 0..n {
                if mesh.m.is_empty_cell(idx) || mesh.temp.data[idx] <= 0.0 {
                    state.h_th[idx] = [0.0; 3];
                    if llb {
                        state.t_th[idx] = [0.0; 3];
                    }
                    continue;
                }
                let temp = mesh.temp.data[idx];
                let mag =
                    (2.0 * KB * temp / (mat.gamma() * vol * MU0 * mat.ms * self.dt)).sqrt();
                state.h_th[idx] = [
                    mag * normal.sample(&mut self.rng),
                    mag * normal.sample(&mut self.rng),
                    mag * normal.sample(&mut self.rng),
                ];
                if llb {
                    // longitudinal torque realisation, applied with the
                    // sqrt(alpha_par) weight in the LLB right-hand side
                    let mag_t =
                        (2.0 * KB * temp * mat.gamma() * mat.ms / (MU0 * vol * self.dt)).sqrt();
                    state.t_th[idx] = [
                        mag_t * normal.sample(&mut self.rng),
                        mag_t * normal.sample(&mut self.rng),
                        mag_t * normal.sample(&mut self.rng),
                    ];
                }
            }
        }
    }

    // ---------------- equation right-hand sides ----------------

    fn rhs_cell(&self, mesh: &Mesh, state: &MeshOde, idx: usize) -> [f64; 3] {
        let mat = &mesh.material;
        let m = mesh.m.data[idx];
        let b = mesh.heff.data[idx];
        let gamma = mat.gamma();
        let alpha = mat.alpha;
        let h_th = state.h_th.get(idx).copied().unwrap_or([0.0; 3]);

        if self.equation.is_llb() {
            let m2 = dot(m, m);
            if m2 == 0.0 {
                return [0.0; 3];
            }
            let noise_scale = if alpha > 0.0 {
                ((alpha - mat.alpha_par).max(0.0)).sqrt() / alpha
            } else {
                0.0
            };
            // noise in the damping term only; precession from Heff alone
            let b_d = add(b, scale(h_th, noise_scale));
            let t_th = state.t_th.get(idx).copied().unwrap_or([0.0; 3]);
            let t_sc = mat.alpha_par.max(0.0).sqrt();
            let mxb = cross(m, b);
            let mxmxb = cross(m, cross(m, b_d));
            let long = scale(m, gamma * mat.alpha_par * dot(m, b) / m2);
            return [
                -gamma * mxb[0] + long[0] - gamma * alpha * mxmxb[0] / m2 + t_sc * t_th[0],
                -gamma * mxb[1] + long[1] - gamma * alpha * mxmxb[1] / m2 + t_sc * t_th[1],
                -gamma * mxb[2] + long[2] - gamma * alpha * mxmxb[2] / m2 + t_sc * t_th[2],
            ];
        }

        // LLG family: thermal noise acts through the damping term only
        let c = gamma / (1.0 + alpha * alpha);
        let b_d = if self.equation.is_stochastic() && alpha > 0.0 {
            add(b, scale(h_th, alpha.sqrt().recip()))
        } else {
            b
        };
        let mxb = cross(m, b);
        let mxmxb = cross(m, cross(m, b_d));
        let mut dmdt = [
            -c * (mxb[0] + alpha * mxmxb[0]),
            -c * (mxb[1] + alpha * mxmxb[1]),
            -c * (mxb[2] + alpha * mxmxb[2]),
        ];

        if self.equation == Equation::LlgStt && mat.p != 0.0 && mat.ms > 0.0 {
            // Zhang-Li in-plane spin transfer from the charge current
            let beta = mat.beta;
            let u = scale(
                mesh.jc.data[idx],
                mat.p * MUB_E / (mat.ms * (1.0 + beta * beta)),
            );
            let gm = mesh.m.grad33(idx);
            let mut udm = [0.0; 3];
            for comp in 0..3 {
                udm[comp] = u[0] * gm[0][comp] + u[1] * gm[1][comp] + u[2] * gm[2][comp];
            }
            let mxudm = cross(m, udm);
            let mxmxudm = cross(m, mxudm);
            let c1 = -(1.0 + alpha * beta) / (1.0 + alpha * alpha);
            let c2 = -(beta - alpha) / (1.0 + alpha * alpha);
            for d in 0..3 {
                dmdt[d] += c1 * mxmxudm[d] + c2 * mxudm[d];
            }
        }

        dmdt
    }

    fn eval_slopes(&mut self, meshes: &[Mesh], stage: usize) {
        for mi in 0..meshes.len() {
            let mesh = &meshes[mi];
            if !mesh.material.is_magnetic() {
                continue;
            }
            for idx in 0..mesh.n_cells() {
                let f = if mesh.m.is_empty_cell(idx) {
                    [0.0; 3]
                } else {
                    self.rhs_cell(mesh, &self.states[mi], idx)
                };
                self.states[mi].k[stage][idx] = f;
            }
        }
    }

    fn finalise_cell(&self, m: [f64; 3]) -> [f64; 3] {
        if self.equation.is_llb() {
            m
        } else {
            normalize(m)
        }
    }

    // ---------------- stepping ----------------

    /// One evaluation sub-stage across all meshes. The caller rebuilds the
    /// effective field before every call. Returns `time_step_solved`.
    pub fn advance(&mut self, meshes: &mut [Mesh]) -> bool {
        debug_assert_eq!(self.states.len(), meshes.len());
        if self.stage == 0 {
            if self.equation.is_stochastic() && self.new_step {
                self.generate_thermal_field(meshes);
            }
            self.step_start_time = self.time;
        }
        self.time_step_solved = false;

        match self.scheme {
            EvalScheme::Euler => self.step_euler(meshes),
            EvalScheme::Trapezoidal => self.step_trapezoidal(meshes),
            EvalScheme::Rk4 => self.step_rk4(meshes),
            EvalScheme::Rkf45 => self.step_rkf45(meshes),
            EvalScheme::Abm => self.step_abm(meshes),
        }
        self.time_step_solved
    }

    fn save_m0_and_dmdt(&mut self, meshes: &[Mesh]) {
        self.eval_slopes(meshes, 0);
        for (mesh, state) in meshes.iter().zip(self.states.iter_mut()) {
            state.m0.copy_from_slice(&mesh.m.data);
            state.dm_dt.data.copy_from_slice(&state.k[0]);
        }
    }

    fn apply_combination(&mut self, meshes: &mut [Mesh], coeffs: &[f64], dt: f64, finalise: bool) {
        for (mesh, state) in meshes.iter_mut().zip(self.states.iter()) {
            if !mesh.material.is_magnetic() {
                continue;
            }
            for idx in 0..mesh.m.data.len() {
                if mesh.m.is_empty_cell(idx) {
                    continue;
                }
                let mut m = state.m0[idx];
                for (s, &c) in coeffs.iter().enumerate() {
                    if c != 0.0 {
                        let k = state.k[s][idx];
                        m = add(m, scale(k, c * dt));
                    }
                }
                mesh.m.data[idx] = if finalise { self.finalise_cell(m) } else { m };
            }
        }
    }

    fn complete_step(&mut self) {
        self.stage = 0;
        self.new_step = true;
        self.time = self.step_start_time + self.dt;
        self.time_step_solved = true;
    }

    fn step_euler(&mut self, meshes: &mut [Mesh]) {
        self.save_m0_and_dmdt(meshes);
        self.apply_combination(meshes, &[1.0], self.dt, true);
        self.complete_step();
    }

    fn step_trapezoidal(&mut self, meshes: &mut [Mesh]) {
        match self.stage {
            0 => {
                self.save_m0_and_dmdt(meshes);
                self.apply_combination(meshes, &[1.0], self.dt, false);
                self.stage = 1;
                self.new_step = false;
            }
            _ => {
                self.eval_slopes(meshes, 1);
                self.apply_combination(meshes, &[0.5, 0.5], self.dt, true);
                self.complete_step();
            }
        }
    }

    fn step_rk4(&mut self, meshes: &mut [Mesh]) {
        match self.stage {
            0 => {
                self.save_m0_and_dmdt(meshes);
                self.apply_combination(meshes, &[0.5], self.dt, false);
                self.time = self.step_start_time + 0.5 * self.dt;
                self.stage = 1;
                self.new_step = false;
            }
            1 => {
                self.eval_slopes(meshes, 1);
                self.apply_combination(meshes, &[0.0, 0.5], self.dt, false);
                self.stage = 2;
            }
            2 => {
                self.eval_slopes(meshes, 2);
                self.apply_combination(meshes, &[0.0, 0.0, 1.0], self.dt, false);
                self.time = self.step_start_time + self.dt;
                self.stage = 3;
            }
            _ => {
                self.eval_slopes(meshes, 3);
                self.apply_combination(
                    meshes,
                    &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
                    self.dt,
                    true,
                );
                self.complete_step();
            }
        }
    }

    fn step_rkf45(&mut self, meshes: &mut [Mesh]) {
        let stage = self.stage;
        if stage == 0 {
            self.save_m0_and_dmdt(meshes);
        } else {
            self.eval_slopes(meshes, stage);
        }

        if stage < 5 {
            self.apply_combination(meshes, &RKF_A[stage], self.dt, false);
            self.time = self.step_start_time + RKF_C[stage + 1] * self.dt;
            self.stage = stage + 1;
            self.new_step = false;
            return;
        }

        // all six slopes known: embedded error estimate, then accept or reject
        let mut max_err = 0.0f64;
        for (mesh, state) in meshes.iter().zip(self.states.iter_mut()) {
            if !mesh.material.is_magnetic() {
                continue;
            }
            for idx in 0..mesh.m.data.len() {
                if mesh.m.is_empty_cell(idx) {
                    state.m_new[idx] = mesh.m.data[idx];
                    continue;
                }
                let mut m5 = state.m0[idx];
                let mut lte = [0.0; 3];
                for s in 0..6 {
                    let k = state.k[s][idx];
                    m5 = add(m5, scale(k, RKF_B5[s] * self.dt));
                    let d = RKF_B5[s] - RKF_B4[s];
                    lte = add(lte, scale(k, d * self.dt));
                }
                state.m_new[idx] = m5;
                let e = lte[0].abs().max(lte[1].abs()).max(lte[2].abs());
                max_err = max_err.max(e);
            }
        }
        self.last_error = max_err;

        if max_err <= self.max_err || self.dt <= self.dt_min {
            for (mesh, state) in meshes.iter_mut().zip(self.states.iter()) {
                if !mesh.material.is_magnetic() {
                    continue;
                }
                for idx in 0..mesh.m.data.len() {
                    if !mesh.m.is_empty_cell(idx) {
                        mesh.m.data[idx] = self.finalise_cell(state.m_new[idx]);
                    }
                }
            }
            self.complete_step();
        } else {
            // reject: restore the step start state and retry with a smaller dt
            for (mesh, state) in meshes.iter_mut().zip(self.states.iter()) {
                if mesh.material.is_magnetic() {
                    mesh.m.data.copy_from_slice(&state.m0);
                }
            }
            self.time = self.step_start_time;
            self.stage = 0;
            self.new_step = false;
        }

        // controller: grow gently on acceptance, cut hard on rejection
        let factor = if max_err > 0.0 {
            self.headroom * (self.max_err / max_err).powf(0.2)
        } else {
            2.0
        };
        self.dt = (self.dt * factor.clamp(0.1, 2.0)).clamp(self.dt_min, self.dt_max);
    }

    fn step_abm(&mut self, meshes: &mut [Mesh]) {
        match self.stage {
            0 => {
                self.save_m0_and_dmdt(meshes);
                if self.has_prev {
                    // predictor m0 + dt/2 (3 f_n - f_{n-1})
                    for (mesh, state) in meshes.iter_mut().zip(self.states.iter()) {
                        if !mesh.material.is_magnetic() {
                            continue;
                        }
                        for idx in 0..mesh.m.data.len() {
                            if mesh.m.is_empty_cell(idx) {
                                continue;
                            }
                            let f = state.k[0][idx];
                            let fp = state.prev_f[idx];
                            let d = sub(scale(f, 1.5), scale(fp, 0.5));
                            mesh.m.data[idx] = add(state.m0[idx], scale(d, self.dt));
                        }
                    }
                } else {
                    self.apply_combination(meshes, &[1.0], self.dt, false);
                }
                self.time = self.step_start_time + self.dt;
                self.stage = 1;
                self.new_step = false;
            }
            _ => {
                // corrector m0 + dt/2 (f_{n+1} + f_n)
                self.eval_slopes(meshes, 1);
                self.apply_combination(meshes, &[0.5, 0.5], self.dt, true);
                for state in self.states.iter_mut() {
                    let (k0, prev) = (&state.k[0], &mut state.prev_f);
                    prev.copy_from_slice(k0);
                }
                self.has_prev = true;
                self.complete_step();
            }
        }
    }
}
