//! External data formats: the legacy ASCII VTK writer/reader frame
//! output and scene tooling use, and the binary model archive format used for
//! save/load round-trips.

pub mod archive;
pub mod vtk;
