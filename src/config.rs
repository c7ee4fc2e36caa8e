// src/config.rs
//
// JSON run configuration: geometry, materials, electrodes, numerics. A
// RunConfig can be saved next to a run's output for provenance and loaded
// back to reconstruct the Simulation.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SolverError;
use crate::grid::Grid3;
use crate::llg::{Equation, EvalScheme};
use crate::mesh::Mesh;
use crate::params::Material;
use crate::rect::Rect;
use crate::sim::Simulation;

#[derive(Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub meshes: Vec<MeshConfig>,
    pub electrodes: Vec<ElectrodeConfig>,
    pub fields: FieldConfig,
    pub transport: TransportConfig,
    pub numerics: NumericsConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeshConfig {
    pub name: String,
    pub origin: [f64; 3],
    pub n: [usize; 3],
    pub cellsize: [f64; 3],
    pub material: Material,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ElectrodeConfig {
    pub rect: Rect,
    pub potential: f64,
    #[serde(default)]
    pub ground: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub b_ext: [f64; 3],
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    pub solve_spin: bool,
    /// Symmetric potential split across the electrodes (V).
    pub potential: f64,
    /// Constant-current setpoint (A); overrides `potential` control when set.
    pub current: Option<f64>,
    pub v_convergence_error: Option<f64>,
    pub s_convergence_error: Option<f64>,
    pub iters_timeout: Option<usize>,
    /// Fixed SOR damping; omit to let the solver adapt it.
    #[serde(default)]
    pub sor_damping: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NumericsConfig {
    pub scheme: EvalScheme,
    pub equation: Equation,
    /// Initial time step (s); RKF45 adapts it during the run.
    pub dt: f64,
    pub steps: usize,
    pub max_err: Option<f64>,
    pub headroom: Option<f64>,
    pub dt_min: Option<f64>,
    pub dt_max: Option<f64>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, SolverError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SolverError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(SolverError::from)
    }

    /// Construct a ready-to-run Simulation from this configuration.
    pub fn build(&self) -> Result<Simulation, SolverError> {
        let n = &self.numerics;
        let mut sim = Simulation::new(n.scheme, n.equation, n.dt, self.transport.solve_spin);
        if let Some(v) = n.max_err {
            sim.ode.max_err = v;
        }
        if let Some(v) = n.headroom {
            sim.ode.headroom = v;
        }
        if let Some(v) = n.dt_min {
            sim.ode.dt_min = v;
        }
        if let Some(v) = n.dt_max {
            sim.ode.dt_max = v;
        }
        sim.b_ext = self.fields.b_ext;

        for mc in &self.meshes {
            let grid = Grid3::new(mc.n, mc.cellsize, mc.origin);
            sim.add_mesh(Mesh::new(mc.name.clone(), grid, mc.material.clone())?);
        }

        for ec in &self.electrodes {
            let idx = sim.stransport.add_electrode(ec.rect, ec.potential);
            if ec.ground {
                sim.stransport.set_ground_electrode(idx)?;
            }
        }
        let t = &self.transport;
        if let Some(v) = t.v_convergence_error {
            sim.stransport.v_convergence_error = v;
        }
        if let Some(v) = t.s_convergence_error {
            sim.stransport.s_convergence_error = v;
        }
        if let Some(v) = t.iters_timeout {
            sim.stransport.iters_timeout = v;
        }
        sim.stransport.fixed_sor_damping = t.sor_damping;

        sim.update_configuration()?;
        if !sim.stransport.electrodes.is_empty() {
            sim.stransport.set_potential(&mut sim.meshes, t.potential);
            if let Some(i) = t.current {
                sim.stransport.set_current(i);
            }
        }
        Ok(sim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunConfig {
        RunConfig {
            meshes: vec![MeshConfig {
                name: "slab".into(),
                origin: [0.0; 3],
                n: [8, 4, 4],
                cellsize: [1e-9; 3],
                material: Material::ferromagnet(),
            }],
            electrodes: vec![
                ElectrodeConfig {
                    rect: Rect::new([0.0; 3], [0.0, 4e-9, 4e-9]),
                    potential: 0.0,
                    ground: true,
                },
                ElectrodeConfig {
                    rect: Rect::new([8e-9, 0.0, 0.0], [8e-9, 4e-9, 4e-9]),
                    potential: 0.0,
                    ground: false,
                },
            ],
            fields: FieldConfig { b_ext: [0.0, 0.0, 0.1] },
            transport: TransportConfig {
                solve_spin: true,
                potential: 0.1,
                current: None,
                v_convergence_error: None,
                s_convergence_error: None,
                iters_timeout: None,
                sor_damping: None,
            },
            numerics: NumericsConfig {
                scheme: EvalScheme::Rkf45,
                equation: Equation::Llg,
                dt: 1e-13,
                steps: 100,
                max_err: Some(1e-5),
                headroom: None,
                dt_min: None,
                dt_max: None,
            },
        }
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = sample();
        let text = serde_json::to_string_pretty(&cfg).unwrap();
        let back: RunConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.meshes[0].n, [8, 4, 4]);
        assert_eq!(back.numerics.scheme, EvalScheme::Rkf45);
        assert!(back.electrodes[0].ground);
    }

    #[test]
    fn build_wires_up_the_simulation() {
        let sim = sample().build().unwrap();
        assert_eq!(sim.meshes.len(), 1);
        assert_eq!(sim.stransport.electrodes.len(), 2);
        assert_eq!(sim.stransport.ground_electrode(), Some(0));
        assert!((sim.ode.max_err - 1e-5).abs() < 1e-20);
        // potential split: ground at -V/2
        assert!((sim.stransport.electrodes[0].potential + 0.05).abs() < 1e-15);
    }
}
