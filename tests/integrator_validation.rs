// tests/integrator_validation.rs
//
// Macrospin and driver-level checks for the magnetisation integrator.

use spintrans::config::{
    ElectrodeConfig, FieldConfig, MeshConfig, NumericsConfig, RunConfig, TransportConfig,
};
use spintrans::grid::Grid3;
use spintrans::llg::{Equation, EvalScheme, Integrator};
use spintrans::mesh::Mesh;
use spintrans::params::Material;
use spintrans::rect::Rect;

fn macrospin(alpha: f64) -> Vec<Mesh> {
    let grid = Grid3::new([1, 1, 1], [2e-9; 3], [0.0; 3]);
    let mut mat = Material::ferromagnet();
    mat.alpha = alpha;
    let mut mesh = Mesh::new("macro", grid, mat).unwrap();
    mesh.m.set_uniform([1.0, 0.0, 0.0]);
    vec![mesh]
}

#[test]
fn rkf45_precession_frequency_matches_larmor_within_a_percent() {
    let b0 = 0.2;
    let mut meshes = macrospin(0.0);
    meshes[0].heff.set_uniform([0.0, 0.0, b0]);
    let gamma = meshes[0].material.gamma();

    let mut ode = Integrator::new(EvalScheme::Rkf45, Equation::Llg, 1e-14);
    ode.max_err = 1e-7;
    ode.dt_min = 1e-17;
    ode.dt_max = 5e-13;
    ode.update_configuration(&meshes).unwrap();

    // count m_x zero crossings over many periods; the +-1 crossing
    // quantisation over 100 periods stays well under the 1% tolerance
    let t_end = 100.0 * 2.0 * std::f64::consts::PI / (gamma * b0);
    let mut crossings = 0usize;
    let mut prev = meshes[0].m.data[0][0];
    while ode.time < t_end {
        if ode.advance(&mut meshes) {
            let mx = meshes[0].m.data[0][0];
            if prev.signum() != mx.signum() && mx != 0.0 {
                crossings += 1;
            }
            prev = mx;
        }
    }
    // two crossings per period
    let measured = crossings as f64 / 2.0 / t_end;
    let larmor = gamma * b0 / (2.0 * std::f64::consts::PI);
    assert!(
        (measured - larmor).abs() / larmor < 0.01,
        "f = {measured:.4e}, Larmor {larmor:.4e}"
    );
}

#[test]
fn sub_stage_gating_per_scheme() {
    let mut meshes = macrospin(0.1);
    meshes[0].heff.set_uniform([0.0, 0.0, 0.1]);

    // ABM: predictor then corrector
    let mut ode = Integrator::new(EvalScheme::Abm, Equation::Llg, 1e-14);
    ode.update_configuration(&meshes).unwrap();
    assert!(!ode.advance(&mut meshes));
    assert!(ode.advance(&mut meshes));
    assert!(!ode.advance(&mut meshes));
    assert!(ode.advance(&mut meshes));

    // RKF45 with a loose tolerance accepts on the sixth sub-stage
    let mut ode = Integrator::new(EvalScheme::Rkf45, Equation::Llg, 1e-15);
    ode.max_err = 1e-3;
    ode.update_configuration(&meshes).unwrap();
    for _ in 0..5 {
        assert!(!ode.advance(&mut meshes));
    }
    assert!(ode.advance(&mut meshes));
}

#[test]
fn thermal_agitation_scales_linearly_with_temperature() {
    // independent macrospins (no exchange): short-time transverse variance
    // of m under sLLG is proportional to T
    let spread = |temp: f64, seed: u64| -> f64 {
        let grid = Grid3::new([16, 16, 4], [2e-9; 3], [0.0; 3]);
        let mut mat = Material::ferromagnet();
        mat.a_ex = 0.0;
        mat.alpha = 0.1;
        let mut mesh = Mesh::new("ensemble", grid, mat).unwrap();
        mesh.temp.set_uniform(temp);
        let mut meshes = vec![mesh];

        let mut ode =
            Integrator::new(EvalScheme::Trapezoidal, Equation::SLlg, 1e-14).with_seed(seed);
        ode.update_configuration(&meshes).unwrap();
        for _ in 0..100 {
            ode.advance(&mut meshes);
        }
        let n = meshes[0].m.data.len() as f64;
        meshes[0]
            .m
            .data
            .iter()
            .map(|m| m[0] * m[0] + m[1] * m[1])
            .sum::<f64>()
            / n
    };

    let v1 = spread(100.0, 11);
    let v4 = spread(400.0, 11);
    let ratio = v4 / v1;
    assert!(
        ratio > 3.0 && ratio < 5.0,
        "variance ratio {ratio}, expected about 4"
    );
}

#[test]
fn configured_run_advances_and_stays_finite() {
    let cfg = RunConfig {
        meshes: vec![MeshConfig {
            name: "fm".into(),
            origin: [0.0; 3],
            n: [8, 4, 2],
            cellsize: [2e-9; 3],
            material: {
                let mut m = Material::ferromagnet();
                m.elc0 = 5e6;
                m
            },
        }],
        electrodes: vec![
            ElectrodeConfig {
                rect: Rect::new([0.0; 3], [0.0, 8e-9, 4e-9]),
                potential: 0.0,
                ground: true,
            },
            ElectrodeConfig {
                rect: Rect::new([16e-9, 0.0, 0.0], [16e-9, 8e-9, 4e-9]),
                potential: 0.0,
                ground: false,
            },
        ],
        fields: FieldConfig {
            b_ext: [0.0, 0.0, 0.05],
        },
        transport: TransportConfig {
            solve_spin: true,
            potential: 0.1,
            current: None,
            v_convergence_error: Some(1e-6),
            s_convergence_error: Some(1e-6),
            iters_timeout: Some(500),
            sor_damping: None,
        },
        numerics: NumericsConfig {
            scheme: EvalScheme::Rk4,
            equation: Equation::Llg,
            dt: 1e-14,
            steps: 5,
            max_err: None,
            headroom: None,
            dt_min: None,
            dt_max: None,
        },
    };

    let mut sim = cfg.build().unwrap();
    sim.run(cfg.numerics.steps);
    assert!(sim.ode.time >= 5.0 * 1e-14 * 0.999);
    for mesh in &sim.meshes {
        for m in &mesh.m.data {
            assert!(m.iter().all(|c| c.is_finite()));
        }
        for &v in &mesh.v.data {
            assert!(v.is_finite());
        }
        for s in &mesh.s.data {
            assert!(s.iter().all(|c| c.is_finite()));
        }
    }
}
