// src/stransport.rs
//
// Multi-mesh transport orchestrator. Owns the electrodes, the per-mesh
// Transport solvers and the inter-mesh contacts, and drives the global SOR
// relaxation: one sweep per mesh, then the contact updates, then a global
// relative convergence test, repeated until the error drops below the
// configured threshold or the iteration timeout fires. Non-convergence is a
// diagnostic (logged), never an error: the field is still usable and the next
// call continues from it.
//
// SOR damping is either a fixed user-set value or adapted between sweeps
// inside [1.0, 2.0]: nudged up when the error shrinks, cut back when it
// grows. Charge and spin channels keep separate damping values and separate
// error tracking.

use log::{debug, warn};

use crate::cmbnd::{
    discover_contacts, is_nf_interface, mark_contact_flags, update_cmbnd_charge,
    update_cmbnd_spin, CmbndContact,
};
use crate::error::SolverError;
use crate::mesh::Mesh;
use crate::params::MUB_E;
use crate::rect::Rect;
use crate::scalar_field::{CELL_CMBND, CELL_DIRICHLET};
use crate::transport::{StSolve, Transport};
use crate::vec3::{cross, scale};
use crate::vector_field::VecField;

#[derive(Debug, Clone)]
pub struct Electrode {
    /// Zero-thickness face rectangle on a mesh surface (absolute coordinates).
    pub rect: Rect,
    pub potential: f64,
    pub ground: bool,
}

pub struct STransport {
    pub electrodes: Vec<Electrode>,
    pub transports: Vec<Transport>,
    pub contacts: Vec<CmbndContact>,
    pub solve_spin: bool,

    /// Relative convergence threshold for the charge channel.
    pub v_convergence_error: f64,
    /// Relative convergence threshold for the spin channel.
    pub s_convergence_error: f64,
    /// Sweep cap per solve for each channel.
    pub iters_timeout: usize,

    /// Constant-current setpoint; when set, electrode potentials are rescaled
    /// after every solve so the measured ground current matches it.
    pub constant_current: Option<f64>,

    /// Fixed SOR damping for both channels; None selects adaptation.
    pub fixed_sor_damping: Option<f64>,

    // SOR damping, one per channel
    v_damping: f64,
    s_damping: f64,
    v_last_error: f64,
    s_last_error: f64,

    // diagnostics from the last solve
    pub v_iterations: usize,
    pub v_error: f64,
    pub s_iterations: usize,
    pub s_error: f64,
}

impl STransport {
    pub fn new(solve_spin: bool) -> Self {
        Self {
            electrodes: Vec::new(),
            transports: Vec::new(),
            contacts: Vec::new(),
            solve_spin,
            v_convergence_error: 1e-6,
            s_convergence_error: 1e-7,
            iters_timeout: 500,
            constant_current: None,
            fixed_sor_damping: None,
            v_damping: 1.4,
            s_damping: 1.4,
            v_last_error: f64::MAX,
            s_last_error: f64::MAX,
            v_iterations: 0,
            v_error: 0.0,
            s_iterations: 0,
            s_error: 0.0,
        }
    }

    // ---------------- electrodes ----------------

    /// Add an electrode; the first one added becomes ground.
    pub fn add_electrode(&mut self, rect: Rect, potential: f64) -> usize {
        let ground = self.electrodes.is_empty();
        self.electrodes.push(Electrode {
            rect,
            potential,
            ground,
        });
        self.electrodes.len() - 1
    }

    pub fn set_ground_electrode(&mut self, index: usize) -> Result<(), SolverError> {
        if index >= self.electrodes.len() {
            return Err(SolverError::BadElectrode(index));
        }
        for (i, el) in self.electrodes.iter_mut().enumerate() {
            el.ground = i == index;
        }
        Ok(())
    }

    pub fn ground_electrode(&self) -> Option<usize> {
        self.electrodes.iter().position(|el| el.ground)
    }

    /// Split `potential` symmetrically: ground at -V/2, every other electrode
    /// at +V/2.
    pub fn set_potential(&mut self, meshes: &mut [Mesh], potential: f64) {
        for el in &mut self.electrodes {
            el.potential = if el.ground {
                -0.5 * potential
            } else {
                0.5 * potential
            };
        }
        self.refresh_electrode_cells(meshes);
    }

    pub fn set_current(&mut self, current: f64) {
        self.constant_current = Some(current);
    }

    /// Multiply every electrode potential and the whole V (and S) state by
    /// `scaling`. For an ohmic system this rescales the current by the same
    /// factor, which is how the constant-current control closes its loop.
    pub fn scale_potential_values(&mut self, meshes: &mut [Mesh], scaling: f64) {
        for el in &mut self.electrodes {
            el.potential *= scaling;
        }
        for mesh in meshes.iter_mut() {
            mesh.v.scale_values(scaling);
            for s in &mut mesh.s.data {
                *s = scale(*s, scaling);
            }
        }
        self.refresh_electrode_cells(meshes);
    }

    /// Net charge current through the ground electrode (A), summed over the
    /// electrode cells' faces into the adjacent free cells.
    pub fn get_current(&self, meshes: &[Mesh]) -> f64 {
        let Some(g) = self.ground_electrode() else {
            return 0.0;
        };
        let rect = self.electrodes[g].rect;
        let mut current = 0.0;
        for mesh in meshes {
            let Some(b) = mesh.grid.box_from_rect(&rect) else {
                continue;
            };
            for k in b[2].0..b[2].1 {
                for j in b[1].0..b[1].1 {
                    for i in b[0].0..b[0].1 {
                        let ijk = [i, j, k];
                        let idx = mesh.grid.idx(i, j, k);
                        if !mesh.v.is_dirichlet(idx) {
                            continue;
                        }
                        let sigma_c = mesh.elc.data[idx];
                        for axis in 0..3 {
                            let geom = mesh.grid.face_area(axis) / mesh.grid.h[axis];
                            for dir in [-1isize, 1] {
                                let Some(nb) = mesh.v.neighbour(ijk, axis, dir) else {
                                    continue;
                                };
                                if mesh.v.is_dirichlet(nb) {
                                    continue;
                                }
                                let sigma_n = mesh.elc.data[nb];
                                let sigma_f = if sigma_c + sigma_n > 0.0 {
                                    2.0 * sigma_c * sigma_n / (sigma_c + sigma_n)
                                } else {
                                    0.0
                                };
                                current +=
                                    sigma_f * geom * (mesh.v.data[nb] - mesh.v.data[idx]);
                            }
                        }
                    }
                }
            }
        }
        current
    }

    // ---------------- configuration ----------------

    /// Rebuild everything derived from mesh geometry: per-mesh solvers,
    /// contacts, boundary flags and electrode cells. Must be called after any
    /// mesh is added, removed or resized.
    pub fn update_configuration(&mut self, meshes: &mut [Mesh]) -> Result<(), SolverError> {
        self.transports.clear();
        for mesh in meshes.iter_mut() {
            let mut tr = Transport::new(StSolve::from_material(&mesh.material, self.solve_spin));
            tr.update_configuration(mesh);
            tr.calculate_electrical_conductivity(mesh);
            self.transports.push(tr);
        }

        for mesh in meshes.iter_mut() {
            mesh.v.clear_flags(CELL_DIRICHLET | CELL_CMBND);
            mesh.s.clear_flags(CELL_DIRICHLET | CELL_CMBND);
        }
        self.contacts = discover_contacts(meshes)?;
        for contact in &self.contacts {
            mark_contact_flags(&mut meshes[contact.primary], contact);
        }
        self.refresh_electrode_cells(meshes);

        self.v_last_error = f64::MAX;
        self.s_last_error = f64::MAX;
        if let Some(d) = self.fixed_sor_damping {
            self.v_damping = d;
            self.s_damping = d;
        }
        Ok(())
    }

    /// Current charge-channel SOR damping.
    pub fn v_damping(&self) -> f64 {
        self.v_damping
    }

    /// Current spin-channel SOR damping.
    pub fn s_damping(&self) -> f64 {
        self.s_damping
    }

    fn refresh_electrode_cells(&self, meshes: &mut [Mesh]) {
        for mesh in meshes.iter_mut() {
            for el in &self.electrodes {
                mesh.v.set_dirichlet(&el.rect, el.potential);
            }
        }
    }

    /// Seed V with the linear electrode-to-electrode slope, but only when the
    /// potential is still exactly zero everywhere: a nonzero state is a
    /// previous solution and a far better starting guess than the slope.
    pub fn initialize(&mut self, meshes: &mut [Mesh]) -> Result<(), SolverError> {
        let ground = self
            .ground_electrode()
            .ok_or(SolverError::NoGroundElectrode)?;
        let untouched = meshes
            .iter()
            .all(|mesh| mesh.v.average_nonempty() == 0.0);
        if untouched {
            if let Some(other) = self.electrodes.iter().position(|el| !el.ground) {
                let p1 = self.electrodes[ground].rect.center();
                let v1 = self.electrodes[ground].potential;
                let p2 = self.electrodes[other].rect.center();
                let v2 = self.electrodes[other].potential;
                for mesh in meshes.iter_mut() {
                    mesh.v.set_linear(p1, v1, p2, v2);
                }
            }
        }
        self.refresh_electrode_cells(meshes);
        Ok(())
    }

    // ---------------- solvers ----------------

    fn adapt_damping(fixed: Option<f64>, damping: &mut f64, last_error: &mut f64, error: f64) {
        if let Some(d) = fixed {
            *damping = d;
        } else if error < *last_error {
            *damping = (*damping * 1.01).min(2.0);
        } else if error > *last_error {
            *damping = (*damping * 0.9).max(1.0);
        }
        *last_error = error;
    }

    fn charge_contact_updates(&self, meshes: &mut [Mesh]) {
        for contact in &self.contacts {
            let (pri, sec) = pair_mut(meshes, contact.primary, contact.secondary);
            update_cmbnd_charge(
                pri,
                sec,
                &self.transports[contact.primary],
                &self.transports[contact.secondary],
                contact,
            );
        }
    }

    fn spin_contact_updates(&self, meshes: &mut [Mesh]) {
        for contact in &self.contacts {
            let (pri, sec) = pair_mut(meshes, contact.primary, contact.secondary);
            update_cmbnd_spin(
                pri,
                sec,
                &self.transports[contact.primary],
                &self.transports[contact.secondary],
                contact,
            );
        }
    }

    /// Relax the charge-only problem to convergence.
    pub fn solve_charge_transport_sor(&mut self, meshes: &mut [Mesh]) {
        self.v_iterations = 0;
        loop {
            let mut max_err = 0.0f64;
            let mut max_val = 0.0f64;
            for (i, mesh) in meshes.iter_mut().enumerate() {
                let (e, v) = self.transports[i].iterate_charge_sor(mesh, self.v_damping);
                max_err = max_err.max(e);
                max_val = max_val.max(v);
            }
            self.charge_contact_updates(meshes);
            self.v_iterations += 1;

            let rel = if max_val > 0.0 { max_err / max_val } else { 0.0 };
            self.v_error = rel;
            Self::adapt_damping(self.fixed_sor_damping, &mut self.v_damping, &mut self.v_last_error, rel);

            if rel < self.v_convergence_error {
                debug!(
                    "charge solve converged: {} iterations, error {:.3e}",
                    self.v_iterations, rel
                );
                break;
            }
            if self.v_iterations >= self.iters_timeout {
                warn!(
                    "charge solve hit iteration timeout ({}), error {:.3e}",
                    self.iters_timeout, rel
                );
                break;
            }
        }
    }

    /// Relax the coupled charge + spin accumulation problem: primed source
    /// terms are computed once from the current magnetisation, then V and S
    /// sweeps alternate until both channels converge.
    pub fn solve_spin_transport_sor(&mut self, meshes: &mut [Mesh], dm_dt: Option<&[&VecField]>) {
        for (i, mesh) in meshes.iter_mut().enumerate() {
            self.transports[i].calculate_current_density(mesh);
        }
        for (i, mesh) in meshes.iter().enumerate() {
            let dmdt = dm_dt.map(|d| d[i]);
            self.transports[i].prime_spin_solver_charge(mesh, dmdt);
            self.transports[i].prime_spin_solver_spin(mesh, dmdt);
        }

        self.v_iterations = 0;
        self.s_iterations = 0;
        let mut v_done = false;
        let mut s_done = false;
        loop {
            if !v_done {
                let mut max_err = 0.0f64;
                let mut max_val = 0.0f64;
                for (i, mesh) in meshes.iter_mut().enumerate() {
                    let (e, v) = self.transports[i].iterate_spin_charge_sor(mesh, self.v_damping);
                    max_err = max_err.max(e);
                    max_val = max_val.max(v);
                }
                self.charge_contact_updates(meshes);
                self.v_iterations += 1;
                let rel = if max_val > 0.0 { max_err / max_val } else { 0.0 };
                self.v_error = rel;
                Self::adapt_damping(self.fixed_sor_damping, &mut self.v_damping, &mut self.v_last_error, rel);
                v_done = rel < self.v_convergence_error;
            }

            if !s_done {
                let mut max_err = 0.0f64;
                let mut max_val = 0.0f64;
                for (i, mesh) in meshes.iter_mut().enumerate() {
                    let (e, v) = self.transports[i].iterate_spin_spin_sor(mesh, self.s_damping);
                    max_err = max_err.max(e);
                    max_val = max_val.max(v);
                }
                self.spin_contact_updates(meshes);
                self.s_iterations += 1;
                let rel = if max_val > 0.0 { max_err / max_val } else { 0.0 };
                self.s_error = rel;
                Self::adapt_damping(self.fixed_sor_damping, &mut self.s_damping, &mut self.s_last_error, rel);
                s_done = rel < self.s_convergence_error;
            }

            if v_done && s_done {
                debug!(
                    "spin transport converged: V {} its ({:.3e}), S {} its ({:.3e})",
                    self.v_iterations, self.v_error, self.s_iterations, self.s_error
                );
                break;
            }
            if self.v_iterations >= self.iters_timeout || self.s_iterations >= self.iters_timeout
            {
                warn!(
                    "spin transport hit iteration timeout ({}): V error {:.3e}, S error {:.3e}",
                    self.iters_timeout, self.v_error, self.s_error
                );
                break;
            }
        }
    }

    /// Full transport update, called once per magnetic time step. Skipped
    /// entirely on sub-stages (`time_step_solved` false): the transport state
    /// then lags within the step, which is the intended trade.
    pub fn update_field(
        &mut self,
        meshes: &mut [Mesh],
        dm_dt: Option<&[&VecField]>,
        time_step_solved: bool,
    ) {
        if !time_step_solved {
            return;
        }
        for (i, mesh) in meshes.iter_mut().enumerate() {
            self.transports[i].calculate_electrical_conductivity(mesh);
        }

        if self.solve_spin {
            self.solve_spin_transport_sor(meshes, dm_dt);
        } else {
            self.solve_charge_transport_sor(meshes);
        }

        for (i, mesh) in meshes.iter_mut().enumerate() {
            self.transports[i].calculate_current_density(mesh);
        }

        if let Some(target) = self.constant_current {
            let measured = self.get_current(meshes);
            if measured.abs() > 0.0 {
                let ratio = target / measured;
                if (ratio - 1.0).abs() > 1e-9 {
                    self.scale_potential_values(meshes, ratio);
                    for (i, mesh) in meshes.iter_mut().enumerate() {
                        self.transports[i].calculate_current_density(mesh);
                    }
                }
            }
        }
    }

    /// Add spin torque fields into Heff on magnetic meshes: the bulk
    /// spin-accumulation torque plus the interface torque at N|F contacts.
    pub fn calculate_spin_torque_fields(&self, meshes: &mut [Mesh]) {
        if !self.solve_spin {
            return;
        }
        for (i, mesh) in meshes.iter_mut().enumerate() {
            self.transports[i].calculate_sa_field(mesh);
        }
        self.calculate_sa_interface_field(meshes);
    }

    /// Interface spin torque at N|F contacts with a spin-mixing conductance
    /// set. The normal-metal spin chemical potential mu_s = De S/(sigma muB/e)
    /// (volts) sampled at the contact drives, on the ferromagnet boundary
    /// cells,
    ///   B = tsi_eff muB/e / (gamma Ms h) [ g_mix_re m x (m x mu) + g_mix_im m x mu ]
    fn calculate_sa_interface_field(&self, meshes: &mut [Mesh]) {
        for contact in &self.contacts {
            let (pri, sec) = pair_mut(meshes, contact.primary, contact.secondary);
            if !pri.material.is_magnetic() || !is_nf_interface(pri, sec) {
                continue;
            }
            if pri.material.tsi_eff == 0.0 {
                continue;
            }
            let mat = &pri.material;
            let h_p = pri.grid.h[contact.axis];
            let c = mat.tsi_eff * MUB_E / (mat.gamma() * mat.ms * h_p);
            let mu_coeff = sec.material.de / MUB_E;
            for cell in &contact.cells {
                if pri.heff.is_empty_cell(cell.idx1) {
                    continue;
                }
                let s_n = sec.s.weighted_average(cell.pos_sec, cell.stencil);
                let sigma_n = sec.elc.weighted_average(cell.pos_sec, cell.stencil);
                if sigma_n <= 0.0 {
                    continue;
                }
                let mu = scale(s_n, mu_coeff / sigma_n);
                let m = pri.m.data[cell.idx1];
                let mxmu = cross(m, mu);
                let mxmxmu = cross(m, mxmu);
                for d in 0..3 {
                    pri.heff.data[cell.idx1][d] +=
                        c * (mat.g_mix_re * mxmxmu[d] + mat.g_mix_im * mxmu[d]);
                }
            }
        }
    }
}

/// Disjoint (&mut primary, &secondary) borrow of two distinct meshes.
fn pair_mut(meshes: &mut [Mesh], p: usize, s: usize) -> (&mut Mesh, &Mesh) {
    debug_assert_ne!(p, s);
    if p < s {
        let (a, b) = meshes.split_at_mut(s);
        (&mut a[p], &b[0])
    } else {
        let (a, b) = meshes.split_at_mut(p);
        (&mut b[0], &a[s])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid3;
    use crate::params::Material;

    fn slab_system(n: [usize; 3]) -> (Vec<Mesh>, STransport) {
        let h = [1e-9; 3];
        let grid = Grid3::new(n, h, [0.0; 3]);
        let mut mat = Material::normal_metal();
        mat.elc0 = 1e6;
        let mesh = Mesh::new("slab", grid, mat).unwrap();
        let l = [n[0] as f64 * h[0], n[1] as f64 * h[1], n[2] as f64 * h[2]];

        let mut st = STransport::new(false);
        st.add_electrode(Rect::new([0.0; 3], [0.0, l[1], l[2]]), 0.0);
        st.add_electrode(Rect::new([l[0], 0.0, 0.0], l), 0.0);
        (vec![mesh], st)
    }

    #[test]
    fn slab_current_matches_ohms_law() {
        let (mut meshes, mut st) = slab_system([16, 4, 4]);
        st.update_configuration(&mut meshes).unwrap();
        st.set_potential(&mut meshes, 1.0);
        st.initialize(&mut meshes).unwrap();
        st.v_convergence_error = 1e-9;
        st.iters_timeout = 4000;
        st.update_field(&mut meshes, None, true);

        assert!(st.v_error < st.v_convergence_error);
        // fixed layers sit at the outer cell centres: R = (L - h)/(sigma A)
        let sigma = 1e6;
        let area = 16e-18;
        let expected = sigma * area * 1.0 / 15e-9;
        let measured = st.get_current(&meshes);
        assert!(
            (measured - expected).abs() / expected < 1e-4,
            "I = {measured}, expected {expected}"
        );
    }

    #[test]
    fn constant_current_control_reaches_setpoint() {
        let (mut meshes, mut st) = slab_system([16, 4, 4]);
        st.update_configuration(&mut meshes).unwrap();
        st.set_potential(&mut meshes, 0.1);
        st.initialize(&mut meshes).unwrap();
        st.v_convergence_error = 1e-9;
        st.iters_timeout = 4000;
        let target = 2e-3;
        st.set_current(target);
        st.update_field(&mut meshes, None, true);
        let measured = st.get_current(&meshes);
        assert!(
            (measured - target).abs() / target < 1e-3,
            "I = {measured}, target {target}"
        );
    }

    #[test]
    fn damping_stays_within_bounds() {
        let (mut meshes, mut st) = slab_system([8, 2, 2]);
        st.update_configuration(&mut meshes).unwrap();
        st.set_potential(&mut meshes, 1.0);
        st.initialize(&mut meshes).unwrap();
        for _ in 0..5 {
            st.solve_charge_transport_sor(&mut meshes);
            assert!(st.v_damping >= 1.0 && st.v_damping <= 2.0);
        }
    }

    #[test]
    fn fixed_sor_damping_overrides_adaptation() {
        let (mut meshes, mut st) = slab_system([8, 2, 2]);
        st.fixed_sor_damping = Some(1.2);
        st.update_configuration(&mut meshes).unwrap();
        st.set_potential(&mut meshes, 1.0);
        st.initialize(&mut meshes).unwrap();
        for _ in 0..3 {
            st.solve_charge_transport_sor(&mut meshes);
            assert_eq!(st.v_damping(), 1.2);
            assert_eq!(st.s_damping(), 1.2);
        }
    }

    #[test]
    fn initialize_preserves_a_previous_solution() {
        let (mut meshes, mut st) = slab_system([8, 2, 2]);
        st.update_configuration(&mut meshes).unwrap();
        st.set_potential(&mut meshes, 1.0);
        st.initialize(&mut meshes).unwrap();
        st.solve_charge_transport_sor(&mut meshes);
        let before = meshes[0].v.data.clone();
        // second initialize must not overwrite the converged state
        st.initialize(&mut meshes).unwrap();
        for (a, b) in before.iter().zip(meshes[0].v.data.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn missing_ground_is_an_error() {
        let grid = Grid3::new([4, 4, 4], [1e-9; 3], [0.0; 3]);
        let mesh = Mesh::new("m", grid, Material::normal_metal()).unwrap();
        let mut meshes = vec![mesh];
        let mut st = STransport::new(false);
        st.update_configuration(&mut meshes).unwrap();
        assert!(matches!(
            st.initialize(&mut meshes),
            Err(SolverError::NoGroundElectrode)
        ));
    }

    #[test]
    fn two_mesh_contact_keeps_potential_linear() {
        // two abutting slabs with different cell sizes, same conductivity:
        // converged V must be a single linear ramp across both
        let h1 = [1e-9; 3];
        let h2 = [0.5e-9; 3];
        let mut mat = Material::normal_metal();
        mat.elc0 = 1e6;
        let a = Mesh::new("a", Grid3::new([8, 4, 4], h1, [0.0; 3]), mat.clone()).unwrap();
        let b = Mesh::new(
            "b",
            Grid3::new([16, 8, 8], h2, [8e-9, 0.0, 0.0]),
            mat,
        )
        .unwrap();
        let mut meshes = vec![a, b];

        let mut st = STransport::new(false);
        st.add_electrode(Rect::new([0.0; 3], [0.0, 4e-9, 4e-9]), 0.0);
        st.add_electrode(
            Rect::new([16e-9, 0.0, 0.0], [16e-9, 4e-9, 4e-9]),
            0.0,
        );
        st.update_configuration(&mut meshes).unwrap();
        st.set_potential(&mut meshes, 1.0);
        st.initialize(&mut meshes).unwrap();
        st.v_convergence_error = 1e-8;
        st.iters_timeout = 4000;
        st.solve_charge_transport_sor(&mut meshes);

        // V(x) = -0.5 + x/L away from the electrode layers
        let l = 16e-9;
        for (mi, mesh) in meshes.iter().enumerate() {
            let g = mesh.grid;
            for i in 1..g.n[0] - 1 {
                let idx = g.idx(i, 1, 1);
                let x = g.cell_center(g.ijk(idx))[0];
                let expect = -0.5 + x / l;
                let got = mesh.v.data[idx];
                assert!(
                    (got - expect).abs() < 2e-3,
                    "mesh {mi} cell {i}: V = {got}, expected {expect}"
                );
            }
        }
    }
}
