//! Trivial scheme used only to exercise the `Require`/`Load`/procedure
//! contract in isolation from any real physics (mirrors the original's
//! counting-particles test scheme). Not part of the public API.

use crate::error::ModelError;
use crate::model::{integer_scalar, Model};
use crate::numeric::{Index, Real};
use crate::scheme::{select_active_groups, GroupSelector, Scheme};

pub struct CountingScheme {
    selector: GroupSelector,
    active_groups: Vec<usize>,
}

impl CountingScheme {
    pub fn new(group_type: &str) -> Self {
        CountingScheme { selector: GroupSelector::new(group_type), active_groups: Vec::new() }
    }

    /// Writes each active particle's own index into a `count` varying field —
    /// the smallest possible procedure that still exercises per-particle
    /// writes-only-own-slot semantics.
    pub fn count<R: Real, I: Index, const D: usize>(&self, model: &mut Model<R, I, D>) -> Result<(), ModelError> {
        for &group_index in &self.active_groups {
            let group = model.get_group_by_index_mut(group_index).unwrap();
            let n = group.item_count();
            let counts = group.get_varying_mut("count")?.as_integer_scalar_mut()?;
            for (i, slot) in counts.iter_mut().enumerate().take(n) {
                *slot = I::from_usize(i).unwrap_or_else(I::zero);
            }
        }
        Ok(())
    }
}

impl<R: Real, I: Index, const D: usize> Scheme<R, I, D> for CountingScheme {
    fn require(&mut self, model: &mut Model<R, I, D>) -> Result<(), ModelError> {
        crate::scheme::require_on_matching(model, &self.selector, |g| g.add_varying("count", integer_scalar))
    }

    fn load(&mut self, model: &Model<R, I, D>) {
        self.active_groups = select_active_groups(model, &self.selector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_then_load_then_count_round_trips() {
        let mut model: Model<f64, i32, 3> = Model::new();
        model.add_group("particles", "generic").unwrap();
        let mut scheme = CountingScheme::new("generic");
        scheme.require(&mut model).unwrap();
        model.get_group_mut("particles").unwrap().create_items(5);
        scheme.load(&model);
        scheme.count(&mut model).unwrap();
        let counts = model.get_group("particles").unwrap().get_varying("count").unwrap().as_integer_scalar().unwrap();
        assert_eq!(counts, &vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn require_is_idempotent() {
        let mut model: Model<f64, i32, 3> = Model::new();
        model.add_group("particles", "generic").unwrap();
        let mut scheme = CountingScheme::new("generic");
        scheme.require(&mut model).unwrap();
        scheme.require(&mut model).unwrap();
    }
}
