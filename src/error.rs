// src/error.rs
//
// Configuration-time errors. Solve-time outcomes (non-convergence, timeout)
// are diagnostics on the orchestrator state, never errors: the transport
// solver keeps the best available solution and continues.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolverError {
    /// A field resize could not allocate; the previous mesh state is intact.
    #[error("field allocation failed for {cells} cells")]
    Allocation { cells: usize },

    /// Mesh rectangles intersect with positive volume instead of abutting.
    #[error("meshes `{a}` and `{b}` overlap; transport meshes must abut on faces")]
    OverlappingMeshes { a: String, b: String },

    /// A transport solve needs a ground electrode for a well-posed potential.
    #[error("no ground electrode configured")]
    NoGroundElectrode,

    #[error("electrode index {0} out of range")]
    BadElectrode(usize),

    #[error("config i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SolverError>;
