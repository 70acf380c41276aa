//! Concrete schemes: the SESPH/IISPH/PT16 procedure set plus the He14
//! surface-tension supplement, each implementing [`crate::scheme::Scheme`].

pub mod boundary;
pub mod density;
pub mod gravity;
pub mod iisph;
pub mod implicit_viscosity;
pub mod surface_tension;
pub mod symplectic_euler;
pub mod viscosity;

pub use boundary::BoundaryScheme;
pub use density::DensityScheme;
pub use gravity::GravityScheme;
pub use iisph::IisphScheme;
pub use implicit_viscosity::ImplicitViscosityScheme;
pub use surface_tension::SurfaceTensionScheme;
pub use symplectic_euler::SymplecticEulerScheme;
pub use viscosity::ViscosityScheme;

#[cfg(test)]
mod test_counting;
