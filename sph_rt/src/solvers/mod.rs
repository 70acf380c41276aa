//! Iterative solvers driven by the scheme procedures in `sph_rt::schemes`:
//! the outer convergence/eligibility control flow lives here so it can be
//! tested independently of the per-particle math.

pub mod iisph;
pub mod viscosity_cg;
