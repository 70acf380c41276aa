//! `symplectic_euler.{integrate_velocity_with_hard_fade, integrate_position}`
//!: the time integrator shared by every fluid group. Velocity
//! integration also maintains the global `maximum_speed` reduction the driver
//! reads to compute the next CFL-limited timestep.

use crate::error::ModelError;
use crate::model::{real_scalar, real_vector, Model};
use crate::numeric::{Index, Real};
use crate::scheme::{select_active_groups, GroupSelector, Scheme};

pub struct SymplecticEulerScheme {
    selector: GroupSelector,
    active_groups: Vec<usize>,
}

impl SymplecticEulerScheme {
    pub fn new() -> Self {
        SymplecticEulerScheme { selector: GroupSelector::new("fluid"), active_groups: Vec::new() }
    }

    /// `v[f] += a[f] * dt`, unless `now - time_of_birth[f] < fade_duration`, in
    /// which case the acceleration contribution for this step is dropped
    /// entirely (a hard, not smoothed, cutoff — hence "hard fade"). Updates the
    /// model-global `maximum_speed` via a max-reduction over the resulting
    /// speeds.
    pub fn integrate_velocity_with_hard_fade<R: Real, I: Index>(
        &self,
        model: &mut Model<R, I, 3>,
        dt: R,
        now: R,
        fade_duration: R,
    ) -> Result<(), ModelError> {
        let mut global_max = model.global_real("maximum_speed").unwrap_or_else(|_| R::zero());
        for &group_index in &self.active_groups {
            let group = model.get_group_by_index_mut(group_index).unwrap();
            let accelerations = group.get_varying("acceleration")?.as_real_vector()?.clone();
            let births = group.get_varying("time_of_birth")?.as_real_scalar()?.clone();
            let velocities = group.get_varying_mut("velocity")?.as_real_vector_mut()?;

            let mut local_max = R::zero();
            for i in 0..velocities.len() {
                let faded = now - births[i] >= fade_duration;
                if faded {
                    velocities[i] += accelerations[i] * dt;
                }
                let speed = velocities[i].norm();
                if speed > local_max {
                    local_max = speed;
                }
            }
            if local_max > global_max {
                global_max = local_max;
            }
        }
        model.set_global_real("maximum_speed", global_max)
    }

    /// `x[f] += v[f] * dt`.
    pub fn integrate_position<R: Real, I: Index>(&self, model: &mut Model<R, I, 3>, dt: R) -> Result<(), ModelError> {
        for &group_index in &self.active_groups {
            let group = model.get_group_by_index_mut(group_index).unwrap();
            let velocities = group.get_varying("velocity")?.as_real_vector()?.clone();
            let positions = group.get_varying_mut("position")?.as_real_vector_mut()?;
            for (x, v) in positions.iter_mut().zip(velocities.iter()) {
                *x += *v * dt;
            }
        }
        Ok(())
    }
}

impl Default for SymplecticEulerScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Real, I: Index> Scheme<R, I, 3> for SymplecticEulerScheme {
    fn require(&mut self, model: &mut Model<R, I, 3>) -> Result<(), ModelError> {
        crate::scheme::require_on_matching(model, &self.selector, |g| {
            g.add_varying("position", real_vector)?;
            g.add_varying("velocity", real_vector)?;
            g.add_varying("acceleration", real_vector)?;
            g.add_varying("time_of_birth", real_scalar)?;
            Ok(())
        })?;
        model.add_global("maximum_speed", real_scalar)
    }

    fn load(&mut self, model: &Model<R, I, 3>) {
        self.active_groups = select_active_groups(model, &self.selector);
    }
}
