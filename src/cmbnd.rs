// src/cmbnd.rs
//
// Composite-media boundary (CMBND) coupling between abutting meshes with
// possibly different cell sizes.
//
// Cells in the boundary layer of each mesh facing a contact are flagged
// CMBND and excluded from the SOR sweep; after every global sweep their
// values are recomputed here from value + flux continuity at the interface.
//
// Scheme, per boundary cell, with xi the coordinate along the contact normal
// (secondary -> primary), interface at xi = 0:
//   primary cells at  xi = h_p/2 (cell1, the value being set), 3h_p/2 (cell2)
//   secondary samples at xi = -h_s/2, -3h_s/2 (weighted averages, so the
//   secondary grid never needs to conform to the primary)
// Fit a quadratic on each side using the curvature estimate delta (the local
// Poisson RHS, the diff2 functions), then impose
//   W0 continuous:      W0 = (3 w_s1 - w_s2)/2 + (3/8) delta_s h_s^2
//   flux continuous:    a_p + b_p g_p = a_s + b_s g_s
// with g_s = (w_s1 - w_s2)/h_s + delta_s h_s, and place the boundary cell at
//   W1 = W0 + g_p h_p/2 + delta_p h_p^2/8.
// Exact for linear profiles across dissimilar grids; second order otherwise.
// For the charge channel b = -sigma (1.5/-0.5 extrapolated toward the
// interface) and a carries the gated non-ohmic current terms; for the spin
// channel b = -De per component.

use crate::error::SolverError;
use crate::mesh::Mesh;
use crate::rect::Rect;
use crate::scalar_field::CELL_CMBND;
use crate::transport::{StSolve, Transport};
use crate::vec3::{cross, dot};

#[derive(Debug, Clone)]
pub struct ContactCell {
    /// Boundary cell of the primary mesh (value set by the contact update).
    pub idx1: usize,
    /// Next cell inward along the contact normal.
    pub idx2: usize,
    /// Secondary sample position at depth h_s/2 (absolute coordinates).
    pub pos_sec: [f64; 3],
    /// Sampling stencil: primary cell cross-section, secondary depth.
    pub stencil: [f64; 3],
}

#[derive(Debug, Clone)]
pub struct CmbndContact {
    pub primary: usize,
    pub secondary: usize,
    /// Contact normal axis.
    pub axis: usize,
    /// +1.0 when the secondary lies on the low side of the primary along
    /// `axis` (the normal, secondary -> primary, points along +axis).
    pub normal: f64,
    /// Shared face rectangle.
    pub rect: Rect,
    pub cells: Vec<ContactCell>,
}

/// Scan all mesh pairs for shared faces and build both contact orientations
/// for each touching pair. Positive-volume overlap is a configuration error.
pub fn discover_contacts(meshes: &[Mesh]) -> Result<Vec<CmbndContact>, SolverError> {
    let mut contacts = Vec::new();
    for p in 0..meshes.len() {
        for s in 0..meshes.len() {
            if p == s {
                continue;
            }
            let rp = meshes[p].grid.rect;
            let rs = meshes[s].grid.rect;
            if p < s {
                if let Some(inter) = rp.intersection(&rs) {
                    if inter.volume() > 0.0 {
                        return Err(SolverError::OverlappingMeshes {
                            a: meshes[p].name.clone(),
                            b: meshes[s].name.clone(),
                        });
                    }
                }
            }
            if let Some(contact) = build_contact(meshes, p, s) {
                contacts.push(contact);
            }
        }
    }
    Ok(contacts)
}

fn build_contact(meshes: &[Mesh], p: usize, s: usize) -> Option<CmbndContact> {
    let pri = &meshes[p];
    let sec = &meshes[s];
    let (axis, face) = pri.grid.rect.touching_face(&sec.grid.rect)?;
    // which side of the primary is the secondary on?
    let normal = if sec.grid.rect.center()[axis] < pri.grid.rect.center()[axis] {
        1.0
    } else {
        -1.0
    };
    let face_coord = face.s[axis];
    let hp = pri.grid.h;
    let hs = sec.grid.h;

    let b = pri.grid.box_from_rect(&face)?;
    let mut cells = Vec::new();
    for k in b[2].0..b[2].1 {
        for j in b[1].0..b[1].1 {
            for i in b[0].0..b[0].1 {
                let ijk = [i, j, k];
                let idx1 = pri.grid.idx(i, j, k);
                if pri.v.is_empty_cell(idx1) {
                    continue;
                }
                // next cell inward along the normal
                let dir = if normal > 0.0 { 1 } else { -1 };
                let Some(idx2) = pri.v.neighbour(ijk, axis, dir) else {
                    continue;
                };
                // face centre of cell1 on the contact plane
                let mut pos = pri.grid.cell_center(ijk);
                pos[axis] = face_coord;
                // mirror into the secondary at depth h_s/2
                let mut pos_sec = pos;
                pos_sec[axis] = face_coord - normal * 0.5 * hs[axis];
                if !sec.grid.rect.contains(pos_sec) || !sec.v.grid.position_to_cell(pos_sec)
                    .map(|c| !sec.v.is_empty_cell(sec.grid.idx(c[0], c[1], c[2])))
                    .unwrap_or(false)
                {
                    continue;
                }
                let mut stencil = hp;
                stencil[axis] = hs[axis];
                cells.push(ContactCell {
                    idx1,
                    idx2,
                    pos_sec,
                    stencil,
                });
            }
        }
    }
    if cells.is_empty() {
        return None;
    }
    Some(CmbndContact {
        primary: p,
        secondary: s,
        axis,
        normal,
        rect: face,
        cells,
    })
}

/// Flag the primary-side boundary cells of `contact` so the SOR sweep skips
/// them (the contact update owns their values).
pub fn mark_contact_flags(mesh: &mut Mesh, contact: &CmbndContact) {
    for cell in &contact.cells {
        mesh.v.flags[cell.idx1] |= CELL_CMBND;
        mesh.s.flags[cell.idx1] |= CELL_CMBND;
    }
}

/// Shared continuity solve; returns the primary boundary value W1.
#[inline]
fn continuity_value(
    w_s1: f64,
    w_s2: f64,
    h_p: f64,
    h_s: f64,
    a_p: f64,
    a_s: f64,
    b_p: f64,
    b_s: f64,
    delta_p: f64,
    delta_s: f64,
) -> Option<f64> {
    if b_p == 0.0 {
        return None;
    }
    let w0 = 0.5 * (3.0 * w_s1 - w_s2) + 0.375 * delta_s * h_s * h_s;
    let g_s = (w_s1 - w_s2) / h_s + delta_s * h_s;
    let g_p = (a_s - a_p + b_s * g_s) / b_p;
    Some(w0 + g_p * 0.5 * h_p + 0.125 * delta_p * h_p * h_p)
}

/// Recompute the primary-side boundary cells of a contact for the charge
/// channel (V continuity and sigma dV/dn continuity, plus the gated
/// non-ohmic flux offsets).
pub fn update_cmbnd_charge(
    pri: &mut Mesh,
    sec: &Mesh,
    pri_tr: &Transport,
    sec_tr: &Transport,
    contact: &CmbndContact,
) {
    let axis = contact.axis;
    let h_p = pri.grid.h[axis];
    let h_s = sec.grid.h[axis];
    // unit vector along xi (secondary -> primary)
    let mut u = [0.0; 3];
    u[axis] = contact.normal;

    for cell in &contact.cells {
        let w_s1 = sec.v.weighted_average(cell.pos_sec, cell.stencil);
        let mut pos2 = cell.pos_sec;
        pos2[axis] -= contact.normal * h_s;
        let w_s2 = sec.v.weighted_average(pos2, cell.stencil);

        // b = -sigma, one-sided extrapolated toward the interface
        let b_p = -(1.5 * pri.elc.data[cell.idx1] - 0.5 * pri.elc.data[cell.idx2]);
        let s1 = sec.elc.weighted_average(cell.pos_sec, cell.stencil);
        let s2 = sec.elc.weighted_average(pos2, cell.stencil);
        let b_s = -(1.5 * s1 - 0.5 * s2);

        // a = extra (non-ohmic) current along the normal, same extrapolation
        let a_p = 1.5 * dot(pri_tr.j_extra_at(cell.idx1), u)
            - 0.5 * dot(pri_tr.j_extra_at(cell.idx2), u);
        let a_s = sec
            .grid
            .position_to_cell(cell.pos_sec)
            .map(|c| {
                let i1 = sec.grid.idx(c[0], c[1], c[2]);
                let j1 = dot(sec_tr.j_extra_at(i1), u);
                let j2 = sec
                    .grid
                    .position_to_cell(pos2)
                    .map(|c2| dot(sec_tr.j_extra_at(sec.grid.idx(c2[0], c2[1], c2[2])), u))
                    .unwrap_or(j1);
                1.5 * j1 - 0.5 * j2
            })
            .unwrap_or(0.0);

        // curvature from the primed RHS: delsq V = f / sigma
        let delta_p = if pri.elc.data[cell.idx1] > 0.0 {
            pri_tr.delsq_v_fixed[cell.idx1] / pri.elc.data[cell.idx1]
        } else {
            0.0
        };
        let delta_s = sec
            .grid
            .position_to_cell(cell.pos_sec)
            .map(|c| {
                let i = sec.grid.idx(c[0], c[1], c[2]);
                if sec.elc.data[i] > 0.0 {
                    sec_tr.delsq_v_fixed[i] / sec.elc.data[i]
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);

        if let Some(v1) = continuity_value(
            w_s1, w_s2, h_p, h_s, a_p, a_s, b_p, b_s, delta_p, delta_s,
        ) {
            pri.v.data[cell.idx1] = v1;
        }
    }
}

/// True when this contact is a ferromagnet/normal-metal interface with an
/// interface conductance set: S is then discontinuous across it and handled
/// by the interface torque instead of the continuous update.
pub fn is_nf_interface(pri: &Mesh, sec: &Mesh) -> bool {
    let magnetic_differs = pri.material.is_magnetic() != sec.material.is_magnetic();
    magnetic_differs && (pri.material.g_i != 0.0 || sec.material.g_i != 0.0)
}

/// Recompute the primary-side boundary cells for the spin channel, per
/// component, with b = -De and curvature from the full spin RHS.
pub fn update_cmbnd_spin(
    pri: &mut Mesh,
    sec: &Mesh,
    pri_tr: &Transport,
    sec_tr: &Transport,
    contact: &CmbndContact,
) {
    if pri_tr.stsolve == StSolve::None || sec_tr.stsolve == StSolve::None {
        return;
    }
    if is_nf_interface(pri, sec) {
        return;
    }
    let axis = contact.axis;
    let h_p = pri.grid.h[axis];
    let h_s = sec.grid.h[axis];
    let b_p = -pri.material.de;
    let b_s = -sec.material.de;

    for cell in &contact.cells {
        let s_s1 = sec.s.weighted_average(cell.pos_sec, cell.stencil);
        let mut pos2 = cell.pos_sec;
        pos2[axis] -= contact.normal * h_s;
        let s_s2 = sec.s.weighted_average(pos2, cell.stencil);

        let delta_p = spin_rhs(pri, pri_tr, cell.idx1);
        let delta_s = sec
            .grid
            .position_to_cell(cell.pos_sec)
            .map(|c| spin_rhs(sec, sec_tr, sec.grid.idx(c[0], c[1], c[2])))
            .unwrap_or([0.0; 3]);

        let mut new = pri.s.data[cell.idx1];
        for d in 0..3 {
            if let Some(w1) = continuity_value(
                s_s1[d], s_s2[d], h_p, h_s, 0.0, 0.0, b_p, b_s, delta_p[d], delta_s[d],
            ) {
                new[d] = w1;
            }
        }
        pri.s.data[cell.idx1] = new;
    }
}

/// Full spin RHS (delsq S) at a cell: spin-flip decay, precession/dephasing
/// for magnetic meshes, plus the primed source terms.
fn spin_rhs(mesh: &Mesh, tr: &Transport, idx: usize) -> [f64; 3] {
    let mat = &mesh.material;
    let s = mesh.s.data[idx];
    let mut rhs = tr.delsq_s_fixed.get(idx).copied().unwrap_or([0.0; 3]);
    let inv_lsf2 = 1.0 / (mat.l_sf * mat.l_sf);
    for d in 0..3 {
        rhs[d] += s[d] * inv_lsf2;
    }
    if tr.stsolve == StSolve::Ferromagnetic {
        let m = mesh.m.data[idx];
        let sxm = cross(s, m);
        let mxsxm = cross(m, sxm);
        let inv_lex2 = 1.0 / (mat.l_ex * mat.l_ex);
        let inv_lph2 = 1.0 / (mat.l_ph * mat.l_ph);
        for d in 0..3 {
            rhs[d] += sxm[d] * inv_lex2 + mxsxm[d] * inv_lph2;
        }
    }
    rhs
}
