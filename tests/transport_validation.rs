// tests/transport_validation.rs
//
// End-to-end transport checks against analytic solutions.

use spintrans::cmbnd::{is_nf_interface, update_cmbnd_spin};
use spintrans::grid::Grid3;
use spintrans::mesh::Mesh;
use spintrans::params::Material;
use spintrans::rect::Rect;
use spintrans::stransport::STransport;
use spintrans::transport::charge_residual;

fn metal(elc0: f64) -> Material {
    let mut mat = Material::normal_metal();
    mat.elc0 = elc0;
    mat
}

#[test]
fn uniform_slab_potential_is_linear_with_small_residual() {
    let n = [10, 10, 10];
    let h = [1e-9; 3];
    let grid = Grid3::new(n, h, [0.0; 3]);
    let mesh = Mesh::new("slab", grid, metal(1e6)).unwrap();
    let mut meshes = vec![mesh];

    let mut st = STransport::new(false);
    st.add_electrode(Rect::new([0.0; 3], [0.0, 10e-9, 10e-9]), 0.0);
    st.add_electrode(Rect::new([10e-9, 0.0, 0.0], [10e-9, 10e-9, 10e-9]), 1.0);
    st.v_convergence_error = 1e-9;
    st.iters_timeout = 5000;
    st.update_configuration(&mut meshes).unwrap();
    st.initialize(&mut meshes).unwrap();
    st.solve_charge_transport_sor(&mut meshes);

    assert!(st.v_error < st.v_convergence_error);

    // linear in cell index between the fixed boundary layers
    let mesh = &meshes[0];
    let g = mesh.grid;
    let step = 1.0 / 9.0;
    for i in 0..10 {
        let v = mesh.v.data[g.idx(i, 5, 5)];
        let expect = i as f64 * step;
        assert!(
            (v - expect).abs() < 1e-5,
            "V({i}) = {v}, expected {expect}"
        );
    }

    // discrete div(sigma grad V) residual on interior cells
    for k in 1..9 {
        for j in 1..9 {
            for i in 1..9 {
                let r = charge_residual(&mesh.v, &mesh.elc, None, g.idx(i, j, k));
                assert!(r.abs() < 1e-7, "residual {r} at ({i},{j},{k})");
            }
        }
    }
}

#[test]
fn mismatched_mesh_pair_matches_the_analytic_resistance() {
    // 8 nm of 1 nm cells plus 8 nm of 0.5 nm cells, same conductivity.
    // The fixed potentials sit at the outermost cell centres, so the
    // conducting length is L - h_a/2 - h_b/2.
    let sigma = 2e6;
    let a = Mesh::new(
        "a",
        Grid3::new([8, 4, 4], [1e-9; 3], [0.0; 3]),
        metal(sigma),
    )
    .unwrap();
    let b = Mesh::new(
        "b",
        Grid3::new([16, 8, 8], [0.5e-9; 3], [8e-9, 0.0, 0.0]),
        metal(sigma),
    )
    .unwrap();
    let mut meshes = vec![a, b];

    let mut st = STransport::new(false);
    st.add_electrode(Rect::new([0.0; 3], [0.0, 4e-9, 4e-9]), 0.0);
    st.add_electrode(Rect::new([16e-9, 0.0, 0.0], [16e-9, 4e-9, 4e-9]), 1.0);
    st.v_convergence_error = 1e-9;
    st.iters_timeout = 8000;
    st.update_configuration(&mut meshes).unwrap();
    st.initialize(&mut meshes).unwrap();
    st.solve_charge_transport_sor(&mut meshes);

    let area = 16e-18;
    let length = 16e-9 - 0.5e-9 - 0.25e-9;
    let expected = sigma * area / length;
    let measured = st.get_current(&meshes);
    assert!(
        (measured - expected).abs() / expected < 1e-3,
        "I = {measured}, expected {expected}"
    );

    // potential continuous across the contact: both boundary layers sit on
    // the single linear ramp V(x) = (x - h_a/2) / length
    let va = meshes[0].v.data[meshes[0].grid.idx(7, 1, 1)];
    let vb = meshes[1].v.data[meshes[1].grid.idx(0, 2, 2)];
    let ramp = |x: f64| (x - 0.5e-9) / length;
    assert!((va - ramp(7.5e-9)).abs() < 5e-3, "V_a = {va}");
    assert!((vb - ramp(8.25e-9)).abs() < 5e-3, "V_b = {vb}");
}

#[test]
fn electrode_free_solve_leaves_the_potential_uniform() {
    let grid = Grid3::new([6, 6, 6], [1e-9; 3], [0.0; 3]);
    let mesh = Mesh::new("island", grid, metal(1e6)).unwrap();
    let mut meshes = vec![mesh];

    let mut st = STransport::new(false);
    st.update_configuration(&mut meshes).unwrap();

    // zero start stays exactly zero
    st.solve_charge_transport_sor(&mut meshes);
    assert!(meshes[0].v.data.iter().all(|&v| v == 0.0));

    // uniform nonzero start is a fixed point of the all-Neumann problem
    meshes[0].v.set_uniform(0.3);
    st.solve_charge_transport_sor(&mut meshes);
    for &v in &meshes[0].v.data {
        assert!((v - 0.3).abs() < 1e-12);
    }
}

#[test]
fn domain_wall_builds_spin_accumulation() {
    // ferromagnet slab with a head-to-head rotation in the middle; the
    // polarised current crossing the texture sources S
    let n = [32, 4, 4];
    let grid = Grid3::new(n, [1e-9; 3], [0.0; 3]);
    let mut mat = Material::ferromagnet();
    mat.elc0 = 5e6;
    mat.p = 0.4;
    mat.de = 1e-2;
    let mut mesh = Mesh::new("fm", grid, mat).unwrap();
    for idx in 0..mesh.m.data.len() {
        let x = grid.cell_center(grid.ijk(idx))[0];
        // rotate from +x to +z over the central 8 nm
        let t = ((x - 12e-9) / 8e-9).clamp(0.0, 1.0);
        let ang = t * std::f64::consts::FRAC_PI_2;
        mesh.m.data[idx] = [ang.cos(), 0.0, ang.sin()];
    }
    let mut meshes = vec![mesh];

    let mut st = STransport::new(true);
    st.add_electrode(Rect::new([0.0; 3], [0.0, 4e-9, 4e-9]), 0.0);
    st.add_electrode(Rect::new([32e-9, 0.0, 0.0], [32e-9, 4e-9, 4e-9]), 0.0);
    st.update_configuration(&mut meshes).unwrap();
    st.set_potential(&mut meshes, 0.2);
    st.initialize(&mut meshes).unwrap();
    st.update_field(&mut meshes, None, true);

    let s_max = meshes[0]
        .s
        .data
        .iter()
        .map(|s| (s[0] * s[0] + s[1] * s[1] + s[2] * s[2]).sqrt())
        .fold(0.0f64, f64::max);
    assert!(s_max > 0.0, "no spin accumulation was generated");
    assert!(s_max.is_finite());

    // torque field from S stays on the mesh and is finite
    st.calculate_spin_torque_fields(&mut meshes);
    assert!(meshes[0]
        .heff
        .data
        .iter()
        .all(|b| b.iter().all(|c| c.is_finite())));
}

#[test]
fn nf_interface_applies_mixing_torque_instead_of_continuous_coupling() {
    // ferromagnet | heavy metal stack along x with a spin-mixing conductance:
    // S stays discontinuous across the contact and the metal-side spin
    // accumulation acts on the magnet through the interface torque
    let mut fm_mat = Material::ferromagnet();
    fm_mat.elc0 = 5e6;
    fm_mat.g_i = 1e15;
    fm_mat.g_mix_re = 1e15;
    fm_mat.g_mix_im = 1e14;
    let mut nm_mat = Material::normal_metal();
    nm_mat.elc0 = 5e6;

    let mut fm = Mesh::new(
        "fm",
        Grid3::new([8, 4, 4], [1e-9; 3], [0.0; 3]),
        fm_mat,
    )
    .unwrap();
    fm.m.set_uniform([1.0, 0.0, 0.0]);
    let nm = Mesh::new(
        "nm",
        Grid3::new([8, 4, 4], [1e-9; 3], [8e-9, 0.0, 0.0]),
        nm_mat,
    )
    .unwrap();
    let mut meshes = vec![fm, nm];

    let mut st = STransport::new(true);
    st.add_electrode(Rect::new([0.0; 3], [0.0, 4e-9, 4e-9]), 0.0);
    st.add_electrode(Rect::new([16e-9, 0.0, 0.0], [16e-9, 4e-9, 4e-9]), 0.0);
    st.update_configuration(&mut meshes).unwrap();
    st.set_potential(&mut meshes, 0.2);
    st.initialize(&mut meshes).unwrap();
    st.update_field(&mut meshes, None, true);

    assert!(is_nf_interface(&meshes[0], &meshes[1]));

    // transverse spin accumulation in the metal; none in the magnet so the
    // bulk torque cannot mask the interface term
    meshes[1].s.set_uniform([0.0, 1e3, 0.0]);
    meshes[0].s.set_uniform([0.0; 3]);

    // the continuous-S contact update is skipped at an NF interface: the
    // magnet's contact cells keep their own S instead of a value
    // interpolated from the metal
    let contact = st
        .contacts
        .iter()
        .find(|c| c.primary == 0)
        .expect("fm-primary contact");
    let cell = contact.cells[0].idx1;
    let before = meshes[0].s.data[cell];
    let (a, b) = meshes.split_at_mut(1);
    update_cmbnd_spin(&mut a[0], &b[0], &st.transports[0], &st.transports[1], contact);
    assert_eq!(meshes[0].s.data[cell], before);

    // interface torque lands on the magnet's contact layer only
    for mesh in &mut meshes {
        mesh.heff.set_zero();
    }
    st.calculate_spin_torque_fields(&mut meshes);
    let g = meshes[0].grid;
    let b_edge = meshes[0].heff.data[g.idx(7, 1, 1)];
    let torque = (b_edge[0] * b_edge[0] + b_edge[1] * b_edge[1] + b_edge[2] * b_edge[2]).sqrt();
    assert!(torque > 0.0, "no interface torque on the contact layer");
    assert!(b_edge.iter().all(|c| c.is_finite()));
    let b_bulk = meshes[0].heff.data[g.idx(3, 1, 1)];
    assert!(
        b_bulk.iter().all(|c| c.abs() == 0.0),
        "interface torque leaked into the bulk: {b_bulk:?}"
    );
}
