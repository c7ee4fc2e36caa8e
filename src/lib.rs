// src/lib.rs

pub mod cmbnd;
pub mod config;
pub mod error;
pub mod grid;
pub mod heff;
pub mod llg;
pub mod mesh;
pub mod params;
pub mod rect;
pub mod scalar_field;
pub mod sim;
pub mod stransport;
pub mod transport;
pub mod vec3;
pub mod vector_field;
