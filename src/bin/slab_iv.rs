// src/bin/slab_iv.rs
//
// Two-electrode slab I-V sweep: a ferromagnet slab with AMR, contacted on its
// x faces, potential stepped from -0.5 V to +0.5 V. Writes the measured
// current and extracted resistance per bias point.
//
// Run:
//   cargo run --release --bin slab_iv
//
// Output:
//   out/slab_iv.csv

use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};

use spintrans::grid::Grid3;
use spintrans::mesh::Mesh;
use spintrans::params::Material;
use spintrans::rect::Rect;
use spintrans::stransport::STransport;

fn main() -> std::io::Result<()> {
    env_logger::init();

    let n = [64, 16, 4];
    let h = [2e-9, 2e-9, 2e-9];
    let l = [n[0] as f64 * h[0], n[1] as f64 * h[1], n[2] as f64 * h[2]];

    let mut mat = Material::ferromagnet();
    mat.elc0 = 5e6; // S/m
    mat.amr = 2.0; // percent

    let grid = Grid3::new(n, h, [0.0; 3]);
    let mut mesh = Mesh::new("slab", grid, mat).expect("mesh allocation");
    // magnetisation along +x so AMR sees a parallel current
    mesh.m.set_uniform([1.0, 0.0, 0.0]);
    let mut meshes = vec![mesh];

    let mut st = STransport::new(false);
    st.add_electrode(Rect::new([0.0; 3], [0.0, l[1], l[2]]), 0.0);
    st.add_electrode(Rect::new([l[0], 0.0, 0.0], l), 0.0);
    st.v_convergence_error = 1e-8;
    st.iters_timeout = 5000;
    st.update_configuration(&mut meshes)
        .expect("transport configuration");

    create_dir_all("out")?;
    let file = File::create("out/slab_iv.csv")?;
    let mut w = BufWriter::new(file);
    writeln!(w, "# V (V), I (A), R (Ohm)")?;

    let points = 21;
    for p in 0..points {
        let bias = -0.5 + p as f64 / (points - 1) as f64;
        st.set_potential(&mut meshes, bias);
        st.initialize(&mut meshes).expect("ground electrode set");
        st.update_field(&mut meshes, None, true);

        let current = st.get_current(&meshes);
        let resistance = if current.abs() > 0.0 {
            bias / current
        } else {
            f64::NAN
        };
        println!(
            "V = {bias:+.3} V  I = {current:+.6e} A  ({} sweeps, error {:.2e})",
            st.v_iterations, st.v_error
        );
        writeln!(w, "{bias:.6e},{current:.6e},{resistance:.6e}")?;
    }

    Ok(())
}
