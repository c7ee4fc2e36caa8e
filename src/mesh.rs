// src/mesh.rs
//
// One rectangular mesh with its physical quantity fields. All fields share
// the mesh grid; update_configuration keeps that invariant by resizing
// everything or nothing.

use crate::error::SolverError;
use crate::grid::Grid3;
use crate::params::Material;
use crate::scalar_field::ScalarField;
use crate::vector_field::VecField;

pub struct Mesh {
    pub name: String,
    pub grid: Grid3,
    pub material: Material,

    /// Unit magnetisation direction (magnitude carried by material.ms).
    pub m: VecField,
    /// Effective induction (Tesla); modules accumulate into it, never overwrite.
    pub heff: VecField,
    /// Electric potential (V).
    pub v: ScalarField,
    /// Spin accumulation (A/m).
    pub s: VecField,
    /// Charge current density (A/m^2).
    pub jc: VecField,
    /// Electrical conductivity (S/m).
    pub elc: ScalarField,
    /// Temperature (K).
    pub temp: ScalarField,
}

impl Mesh {
    pub fn new(name: impl Into<String>, grid: Grid3, material: Material) -> Result<Self, SolverError> {
        let base_temp = 293.0;
        Ok(Self {
            name: name.into(),
            m: VecField::new(grid, [0.0, 0.0, 1.0])?,
            heff: VecField::new(grid, [0.0; 3])?,
            v: ScalarField::new(grid, 0.0)?,
            s: VecField::new(grid, [0.0; 3])?,
            jc: VecField::new(grid, [0.0; 3])?,
            elc: ScalarField::new(grid, material.elc0)?,
            temp: ScalarField::new(grid, base_temp)?,
            grid,
            material,
        })
    }

    /// Change the discretisation. Resizes every field; if any allocation
    /// fails the mesh is restored to its previous valid state and the error
    /// propagates (no partial resize).
    pub fn update_configuration(&mut self, new_grid: Grid3) -> Result<(), SolverError> {
        if new_grid == self.grid {
            return Ok(());
        }

        // resize into clones first so a failure cannot leave a mixed state
        let mut m = self.m.clone();
        let mut heff = self.heff.clone();
        let mut v = self.v.clone();
        let mut s = self.s.clone();
        let mut jc = self.jc.clone();
        let mut elc = self.elc.clone();
        let mut temp = self.temp.clone();

        m.resize(new_grid)?;
        heff.resize(new_grid)?;
        v.resize(new_grid)?;
        s.resize(new_grid)?;
        jc.resize(new_grid)?;
        elc.resize(new_grid)?;
        temp.resize(new_grid)?;

        self.m = m;
        self.heff = heff;
        self.v = v;
        self.s = s;
        self.jc = jc;
        self.elc = elc;
        self.temp = temp;
        self.grid = new_grid;
        Ok(())
    }

    pub fn n_cells(&self) -> usize {
        self.grid.n_cells()
    }
}
