// src/heff.rs
//
// Deterministic effective-field terms. build_effective_field zeroes Heff and
// accumulates Zeeman, exchange and uniaxial anisotropy; the transport layer
// adds its spin-torque contributions afterwards through the same accumulate
// convention. All terms are effective induction B_eff in Tesla.

use crate::mesh::Mesh;
use crate::params::MU0;
use crate::vec3::dot;

/// Uniform external induction B_ext (Tesla) on every non-empty cell.
pub fn add_zeeman_field(mesh: &mut Mesh, b_ext: [f64; 3]) {
    for idx in 0..mesh.heff.data.len() {
        if mesh.heff.is_empty_cell(idx) {
            continue;
        }
        for d in 0..3 {
            mesh.heff.data[idx][d] += b_ext[d];
        }
    }
}

/// 6-neighbour exchange field B_ex = 2 A / (mu0 Ms) laplace m. Missing
/// neighbours mirror the centre cell (free boundary, zero torque).
pub fn add_exchange_field(mesh: &mut Mesh) {
    let mat = &mesh.material;
    if mat.a_ex == 0.0 || mat.ms == 0.0 {
        return;
    }
    let coeff = 2.0 * mat.a_ex / (MU0 * mat.ms);
    let grid = mesh.grid;
    let m = &mesh.m;
    for idx in 0..mesh.heff.data.len() {
        if mesh.heff.is_empty_cell(idx) {
            continue;
        }
        let ijk = grid.ijk(idx);
        let mc = m.data[idx];
        let mut lap = [0.0; 3];
        for axis in 0..3 {
            let inv_h2 = 1.0 / (grid.h[axis] * grid.h[axis]);
            for dir in [-1isize, 1] {
                let nbv = m.neighbour(ijk, axis, dir).map(|nb| m.data[nb]).unwrap_or(mc);
                for d in 0..3 {
                    lap[d] += (nbv[d] - mc[d]) * inv_h2;
                }
            }
        }
        for d in 0..3 {
            mesh.heff.data[idx][d] += coeff * lap[d];
        }
    }
}

/// Uniaxial anisotropy B_ani = (2 K_u / Ms) (m.u) u.
pub fn add_anisotropy_field(mesh: &mut Mesh) {
    let mat = &mesh.material;
    if mat.k_u == 0.0 || mat.ms == 0.0 {
        return;
    }
    let coeff = 2.0 * mat.k_u / mat.ms;
    let u = mat.easy_axis;
    for idx in 0..mesh.heff.data.len() {
        if mesh.heff.is_empty_cell(idx) {
            continue;
        }
        let mdotu = dot(mesh.m.data[idx], u);
        for d in 0..3 {
            mesh.heff.data[idx][d] += coeff * mdotu * u[d];
        }
    }
}

/// Rebuild the deterministic part of Heff on one mesh.
pub fn build_effective_field(mesh: &mut Mesh, b_ext: [f64; 3]) {
    mesh.heff.set_zero();
    if !mesh.material.is_magnetic() {
        return;
    }
    add_zeeman_field(mesh, b_ext);
    add_exchange_field(mesh);
    add_anisotropy_field(mesh);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid3;
    use crate::params::Material;

    #[test]
    fn uniform_magnetisation_has_zero_exchange_field() {
        let grid = Grid3::new([4, 4, 4], [2e-9; 3], [0.0; 3]);
        let mut mesh = Mesh::new("fm", grid, Material::ferromagnet()).unwrap();
        mesh.m.set_uniform([0.0, 0.0, 1.0]);
        build_effective_field(&mut mesh, [0.0; 3]);
        for b in &mesh.heff.data {
            assert!(b[0].abs() < 1e-9 && b[1].abs() < 1e-9 && b[2].abs() < 1e-9);
        }
    }

    #[test]
    fn exchange_field_pulls_towards_neighbours() {
        let grid = Grid3::new([3, 1, 1], [2e-9; 3], [0.0; 3]);
        let mut mesh = Mesh::new("fm", grid, Material::ferromagnet()).unwrap();
        mesh.m.set_uniform([0.0, 0.0, 1.0]);
        // tilt the centre cell
        mesh.m.data[1] = [0.5f64.sqrt(), 0.0, 0.5f64.sqrt()];
        add_exchange_field(&mut mesh);
        let b = mesh.heff.data[1];
        // neighbours point along +z, so the field on the tilted cell has a
        // positive z component and negative x component relative to its tilt
        assert!(b[2] > 0.0);
        assert!(b[0] < 0.0);
    }

    #[test]
    fn anisotropy_field_along_easy_axis() {
        let grid = Grid3::new([2, 2, 2], [2e-9; 3], [0.0; 3]);
        let mut mat = Material::ferromagnet();
        mat.k_u = 5e5;
        mat.easy_axis = [0.0, 0.0, 1.0];
        let mut mesh = Mesh::new("fm", grid, mat).unwrap();
        mesh.m.set_uniform([0.0, 0.0, 1.0]);
        add_anisotropy_field(&mut mesh);
        let expect = 2.0 * 5e5 / 8e5;
        for b in &mesh.heff.data {
            assert!((b[2] - expect).abs() < 1e-12);
        }
    }
}
