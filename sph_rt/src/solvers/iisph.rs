//! IISPH pressure solver protocol: drives `schemes::iisph`'s three
//! procedures through the relaxed-Jacobi loop until the average positive
//! relative density error (APRDE) converges or `max_iters` is hit.

use crate::error::ModelError;
use crate::model::Model;
use crate::neighborhood::NeighborIndex;
use crate::numeric::{Index, Real};
use crate::schemes::IisphScheme;
use num::ToPrimitive;

#[derive(Debug, Clone, Copy)]
pub struct IisphParams<R> {
    pub min_iters: u32,
    pub max_iters: u32,
    pub max_aprde: R,
}

impl<R: Real> Default for IisphParams<R> {
    fn default() -> Self {
        IisphParams {
            min_iters: 3,
            max_iters: 2000,
            max_aprde: R::from_f64(1e-3).unwrap(),
        }
    }
}

/// Runs the full IISPH protocol for one step: `setup`, then the
/// pressure-acceleration/pressure-update loop. Returns the number of
/// iterations actually performed (zero if there were no eligible particles
/// after `setup`).
pub fn solve<R: Real, I: Index>(
    scheme: &IisphScheme,
    model: &mut Model<R, I, 3>,
    nhood: &NeighborIndex<R, 3>,
    h: R,
    dt: R,
    params: IisphParams<R>,
) -> Result<u32, ModelError> {
    scheme.setup(model, nhood, h, dt)?;
    model.set_global_real("iisph_aprde", R::zero())?;

    let mut iter: u32 = 0;
    loop {
        scheme.iteration_pressure_acceleration(model, nhood, h)?;

        model.set_global_real("iisph_aprde", R::zero())?;
        scheme.iteration_pressure(model, nhood, h, dt)?;

        let nprde = model.global_integer("iisph_nprde")?.to_i64().unwrap_or(0);
        if nprde == 0 && iter == 0 {
            // No eligible particles at all: diverging or already converged,
            // the protocol exits with zero iterations.
            return Ok(0);
        }

        let aprde = model.global_real("iisph_aprde")?;
        let cur_aprde = if nprde > 0 { aprde / R::from_i64(nprde).unwrap() } else { R::zero() };
        iter += 1;

        let keep_going = (iter < params.min_iters || cur_aprde > params.max_aprde) && iter <= params.max_iters && nprde > 0;
        if !keep_going {
            return Ok(iter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::Scheme;
    use crate::tensor::from_array;

    #[test]
    fn no_eligible_particles_exits_with_zero_iterations() {
        let h = 0.025_f64;
        let mut model: Model<f64, i32, 3> = Model::new();
        let mut scheme = IisphScheme::new();
        model.add_group("fluid", "fluid").unwrap();
        scheme.require(&mut model).unwrap();
        {
            let g = model.get_group_mut("fluid").unwrap();
            g.get_uniform_mut("rest_density").unwrap().as_real_scalar_mut().unwrap()[0] = 1000.0;
            g.create_items(1);
            g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap()[0] = from_array([0.0, 0.0, 0.0]);
            g.get_varying_mut("mass").unwrap().as_real_scalar_mut().unwrap()[0] = h.powi(3) * 1000.0;
            // below rest density: not eligible, no positive error possible.
            g.get_varying_mut("density").unwrap().as_real_scalar_mut().unwrap()[0] = 500.0;
        }
        scheme.load(&model);
        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        nh.set_radius(2.0 * h).unwrap();
        nh.load(&model).unwrap();
        nh.update(&model);

        let iters = solve(&scheme, &mut model, &nh, h, 0.0005, IisphParams::default()).unwrap();
        assert_eq!(iters, 0);
    }

    #[test]
    fn runs_at_least_min_iters_when_eligible() {
        let h = 0.025_f64;
        let mut model: Model<f64, i32, 3> = Model::new();
        let mut scheme = IisphScheme::new();
        model.add_group("fluid", "fluid").unwrap();
        scheme.require(&mut model).unwrap();
        {
            let g = model.get_group_mut("fluid").unwrap();
            g.get_uniform_mut("rest_density").unwrap().as_real_scalar_mut().unwrap()[0] = 1000.0;
            g.create_items(2);
            let pos = g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap();
            pos[0] = from_array([0.0, 0.0, 0.0]);
            pos[1] = from_array([0.02, 0.0, 0.0]);
            g.get_varying_mut("mass").unwrap().as_real_scalar_mut().unwrap().fill(h.powi(3) * 1000.0);
            g.get_varying_mut("density").unwrap().as_real_scalar_mut().unwrap().fill(1200.0);
        }
        scheme.load(&model);
        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        nh.set_radius(2.0 * h).unwrap();
        nh.load(&model).unwrap();
        nh.update(&model);

        let params = IisphParams { min_iters: 3, max_iters: 5, max_aprde: 1e-3 };
        let iters = solve(&scheme, &mut model, &nh, h, 0.0005, params).unwrap();
        assert!(iters >= 3);
    }
}
