// src/params.rs
//
// Physical constants (SI) and per-mesh material parameters.

use serde::{Deserialize, Serialize};

pub const MU0: f64 = 1.256_637_061_4e-6; // T m / A
pub const KB: f64 = 1.380_649e-23; // J / K
pub const GAMMA_E: f64 = 1.760_859_630_23e11; // rad / (s T), free-electron value
pub const ECHARGE: f64 = 1.602_176_634e-19; // C
pub const MUB: f64 = 9.274_010_078e-24; // J / T
pub const HBAR: f64 = 1.054_571_817e-34; // J s

/// muB / e, the conversion between spin accumulation and charge units that
/// appears throughout the drift-diffusion terms.
pub const MUB_E: f64 = MUB / ECHARGE;

/// Material and transport parameters for one mesh. All SI.
///
/// Transport physics terms are gated on their parameter being nonzero
/// (amr, beta_d, sha, cpump_eff, the_eff, g_i/g_mix), so a default-constructed
/// material gives plain charge conduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    /// Saturation magnetisation (A/m). Zero marks a non-magnetic mesh.
    pub ms: f64,
    /// Exchange stiffness (J/m).
    pub a_ex: f64,
    /// Uniaxial anisotropy constant (J/m^3).
    pub k_u: f64,
    pub easy_axis: [f64; 3],
    /// Gilbert damping.
    pub alpha: f64,
    /// Longitudinal (LLB) damping; only meaningful for the LLB equations.
    pub alpha_par: f64,
    /// Relative gyromagnetic ratio (gamma = grel * GAMMA_E).
    pub grel: f64,

    /// Base electrical conductivity (S/m).
    pub elc0: f64,
    /// AMR magnitude in percent; 0 disables the AMR conductivity correction.
    pub amr: f64,
    /// d(rho)/dT relative temperature coefficient (1/K); sigma(T) =
    /// elc0 / (1 + temp_coeff * (T - 293)).
    pub temp_coeff: f64,

    /// Current spin polarisation.
    pub p: f64,
    /// STT non-adiabaticity (Zhang-Li beta).
    pub beta: f64,
    /// Diffusion spin polarisation (CPP-GMR strength); 0 disables.
    pub beta_d: f64,
    /// Electron diffusion constant (m^2/s).
    pub de: f64,
    /// Spin-flip length (m).
    pub l_sf: f64,
    /// Exchange rotation length (m).
    pub l_ex: f64,
    /// Spin dephasing length (m).
    pub l_ph: f64,
    /// Spin Hall angle; 0 disables SHE/ISHE terms.
    pub sha: f64,
    /// Carrier density (1/m^3), used by charge pumping and topological Hall.
    pub n_density: f64,
    /// Charge pumping efficiency (0 disables).
    pub cpump_eff: f64,
    /// Topological Hall efficiency (0 disables).
    pub the_eff: f64,

    /// NF interface conductance (S/m^2); 0 disables interface torque.
    pub g_i: f64,
    /// Real and imaginary spin-mixing conductance (S/m^2).
    pub g_mix_re: f64,
    pub g_mix_im: f64,
    /// Bulk and interface spin-torque efficiencies.
    pub ts_eff: f64,
    pub tsi_eff: f64,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ms: 0.0,
            a_ex: 0.0,
            k_u: 0.0,
            easy_axis: [0.0, 0.0, 1.0],
            alpha: 0.02,
            alpha_par: 0.0,
            grel: 1.0,

            elc0: 7e6,
            amr: 0.0,
            temp_coeff: 0.0,

            p: 0.4,
            beta: 0.04,
            beta_d: 0.0,
            de: 1e-2,
            l_sf: 10e-9,
            l_ex: 2e-9,
            l_ph: 4e-9,
            sha: 0.0,
            n_density: 1.8e29,
            cpump_eff: 0.0,
            the_eff: 0.0,

            g_i: 0.0,
            g_mix_re: 0.0,
            g_mix_im: 0.0,
            ts_eff: 1.0,
            tsi_eff: 1.0,
        }
    }
}

impl Material {
    pub fn is_magnetic(&self) -> bool {
        self.ms > 0.0
    }

    pub fn gamma(&self) -> f64 {
        self.grel * GAMMA_E
    }

    /// Permalloy-like ferromagnet preset.
    pub fn ferromagnet() -> Self {
        Self {
            ms: 8.0e5,
            a_ex: 1.3e-11,
            ..Default::default()
        }
    }

    /// Heavy-metal-like normal metal preset.
    pub fn normal_metal() -> Self {
        Self {
            ms: 0.0,
            de: 5e-3,
            l_sf: 1.5e-9,
            ..Default::default()
        }
    }
}
