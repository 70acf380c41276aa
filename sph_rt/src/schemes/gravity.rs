//! `gravity.initialize_acceleration`: resets each fluid particle's
//! acceleration to the group's constant gravity vector at the start of a step.

use crate::error::ModelError;
use crate::model::{real_vector, Model};
use crate::numeric::{Index, Real};
use crate::scheme::{select_active_groups, GroupSelector, Scheme};
use crate::tensor::Vector;

pub struct GravityScheme {
    selector: GroupSelector,
    active_groups: Vec<usize>,
}

impl GravityScheme {
    pub fn new() -> Self {
        GravityScheme { selector: GroupSelector::new("fluid"), active_groups: Vec::new() }
    }

    /// `a[f] <- g`, where `g` is the group's `gravity` uniform.
    pub fn initialize_acceleration<R: Real, I: Index>(&self, model: &mut Model<R, I, 3>) -> Result<(), ModelError> {
        for &group_index in &self.active_groups {
            let group = model.get_group_by_index_mut(group_index).unwrap();
            let g: Vector<R, 3> = group.get_uniform("gravity")?.as_real_vector()?[0];
            let acceleration = group.get_varying_mut("acceleration")?.as_real_vector_mut()?;
            acceleration.fill(g);
        }
        Ok(())
    }
}

impl Default for GravityScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Real, I: Index> Scheme<R, I, 3> for GravityScheme {
    fn require(&mut self, model: &mut Model<R, I, 3>) -> Result<(), ModelError> {
        crate::scheme::require_on_matching(model, &self.selector, |g| {
            g.add_varying("acceleration", real_vector)?;
            g.add_uniform("gravity", real_vector)?;
            Ok(())
        })
    }

    fn load(&mut self, model: &Model<R, I, 3>) {
        self.active_groups = select_active_groups(model, &self.selector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::from_array;

    #[test]
    fn resets_every_particle_to_group_gravity() {
        let mut model: Model<f64, i32, 3> = Model::new();
        model.add_group("fluid", "fluid").unwrap();
        let mut scheme = GravityScheme::new();
        scheme.require(&mut model).unwrap();
        {
            let g = model.get_group_mut("fluid").unwrap();
            g.get_uniform_mut("gravity").unwrap().as_real_vector_mut().unwrap()[0] = from_array([0.0, -9.81, 0.0]);
            g.create_items(3);
            let acc = g.get_varying_mut("acceleration").unwrap().as_real_vector_mut().unwrap();
            acc[1] = from_array([1.0, 1.0, 1.0]);
        }
        scheme.load(&model);
        scheme.initialize_acceleration(&mut model).unwrap();
        let acc = model.get_group("fluid").unwrap().get_varying("acceleration").unwrap().as_real_vector().unwrap();
        for a in acc {
            assert_eq!(*a, from_array([0.0, -9.81, 0.0]));
        }
    }
}
