//! Group / Model data model: named, typed, tagged collections of
//! particles (`Group`) owned by a `Model` alongside global fields.
//!
//! Groups are addressed two ways: by `group_index`, a stable integer assigned in
//! insertion order and used as the fast key everywhere else in the core (the
//! neighbor index, scheme active-group lists), and by name, used for scene
//! description and save/load where a deterministic (lexicographic) order matters.

use crate::error::ModelError;
use crate::field::{ComponentType, Field};
use crate::numeric::{Index, Real};
use crate::source::Source;
use crate::tensor::{Matrix, Vector};
use std::collections::HashSet;

pub(crate) type MapType<K, V> = std::collections::HashMap<K, V, fxhash::FxBuildHasher>;
pub(crate) fn new_map<K, V>() -> MapType<K, V> {
    MapType::with_hasher(fxhash::FxBuildHasher::default())
}

fn validate_identifier(name: &str) -> Result<(), ModelError> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ModelError::InvalidIdentifier(name.to_string()))
    }
}

/// A named, typed, tagged collection of particles.
pub struct Group<R: Real, I: Index, const D: usize> {
    name: String,
    group_type: String,
    tags: HashSet<String>,
    item_count: usize,
    uniforms: MapType<String, Field<R, I, D>>,
    varyings: MapType<String, Field<R, I, D>>,
    sources: Vec<Source<R, I, D>>,
    /// Set whenever items are created, destroyed or permuted; consumed by the
    /// neighbor index to decide whether a rebuild is needed.
    dirty: bool,
    group_index: usize,
}

impl<R: Real, I: Index, const D: usize> Group<R, I, D> {
    pub(crate) fn new(name: impl Into<String>, group_type: impl Into<String>, group_index: usize) -> Self {
        Group {
            name: name.into(),
            group_type: group_type.into(),
            tags: HashSet::new(),
            item_count: 0,
            uniforms: new_map(),
            varyings: new_map(),
            sources: Vec::new(),
            dirty: false,
            group_index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn group_type(&self) -> &str {
        &self.group_type
    }
    pub fn group_index(&self) -> usize {
        self.group_index
    }
    pub fn item_count(&self) -> usize {
        self.item_count
    }
    pub fn dirty(&self) -> bool {
        self.dirty
    }
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.remove(tag);
    }
    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    pub fn sources(&self) -> &[Source<R, I, D>] {
        &self.sources
    }
    pub fn sources_mut(&mut self) -> &mut Vec<Source<R, I, D>> {
        &mut self.sources
    }

    fn add_field(
        map: &mut MapType<String, Field<R, I, D>>,
        name: &str,
        make: impl FnOnce() -> Field<R, I, D>,
        resize_to: Option<usize>,
    ) -> Result<(), ModelError> {
        validate_identifier(name)?;
        let fresh = make();
        match map.get(name) {
            Some(existing) if existing.tensor_type() == fresh.tensor_type() => Ok(()),
            Some(_) => Err(ModelError::FieldExists(name.to_string())),
            None => {
                let mut field = fresh;
                if let Some(n) = resize_to {
                    field.resize(n);
                }
                map.insert(name.to_string(), field);
                Ok(())
            }
        }
    }

    /// Adds a uniform (group-scoped) field; idempotent if the same name/type
    /// already exists.
    pub fn add_uniform(&mut self, name: &str, make: impl FnOnce() -> Field<R, I, D>) -> Result<(), ModelError> {
        Self::add_field(&mut self.uniforms, name, make, Some(1))
    }

    /// Adds a varying (per-particle) field; idempotent if the same name/type
    /// already exists. New varying fields are immediately sized to the group's
    /// current item count.
    pub fn add_varying(&mut self, name: &str, make: impl FnOnce() -> Field<R, I, D>) -> Result<(), ModelError> {
        Self::add_field(&mut self.varyings, name, make, Some(self.item_count))
    }

    pub fn get_uniform(&self, name: &str) -> Result<&Field<R, I, D>, ModelError> {
        self.uniforms.get(name).ok_or_else(|| ModelError::UnknownField(name.to_string()))
    }
    pub fn get_uniform_mut(&mut self, name: &str) -> Result<&mut Field<R, I, D>, ModelError> {
        self.uniforms.get_mut(name).ok_or_else(|| ModelError::UnknownField(name.to_string()))
    }
    pub fn get_varying(&self, name: &str) -> Result<&Field<R, I, D>, ModelError> {
        self.varyings.get(name).ok_or_else(|| ModelError::UnknownField(name.to_string()))
    }
    pub fn get_varying_mut(&mut self, name: &str) -> Result<&mut Field<R, I, D>, ModelError> {
        self.varyings.get_mut(name).ok_or_else(|| ModelError::UnknownField(name.to_string()))
    }
    pub fn has_varying(&self, name: &str, tensor_type: crate::field::TensorType) -> bool {
        self.varyings.get(name).map_or(false, |f| f.tensor_type() == tensor_type)
    }
    pub fn has_uniform(&self, name: &str, tensor_type: crate::field::TensorType) -> bool {
        self.uniforms.get(name).map_or(false, |f| f.tensor_type() == tensor_type)
    }

    pub fn remove_field(&mut self, name: &str) -> Result<(), ModelError> {
        if self.uniforms.remove(name).is_some() || self.varyings.remove(name).is_some() {
            Ok(())
        } else {
            Err(ModelError::UnknownField(name.to_string()))
        }
    }

    pub fn varying_names(&self) -> impl Iterator<Item = &String> {
        self.varyings.keys()
    }
    pub fn uniform_names(&self) -> impl Iterator<Item = &String> {
        self.uniforms.keys()
    }

    /// Creates `n` new items, returning their assigned index range
    /// `first..first+n`. `CreateItems(0)` is a no-op that returns an empty range
    /// without touching field storage.
    pub fn create_items(&mut self, n: usize) -> std::ops::Range<usize> {
        let first = self.item_count;
        if n == 0 {
            return first..first;
        }
        self.item_count += n;
        for field in self.varyings.values_mut() {
            field.resize(self.item_count);
        }
        self.dirty = true;
        first..self.item_count
    }

    /// Destroys the given items by index, compacting all varying fields and
    /// returning the permutation applied (`new[i] = old[perm[i]]` for the
    /// surviving items, in their new order) so external state (e.g. the
    /// neighbor index) can follow along.
    pub fn destroy_items(&mut self, indices: &[usize]) -> Vec<usize> {
        let doomed: HashSet<usize> = indices.iter().copied().collect();
        let surviving: Vec<usize> = (0..self.item_count).filter(|i| !doomed.contains(i)).collect();
        for field in self.varyings.values_mut() {
            permute_in_place(field, &surviving);
        }
        self.item_count = surviving.len();
        self.dirty = true;
        surviving
    }

    /// Resizes all varying fields to `n` (used when item count changes without
    /// an explicit create/destroy, e.g. loading a persisted model).
    pub fn resize(&mut self, n: usize) {
        self.item_count = n;
        for field in self.varyings.values_mut() {
            field.resize(n);
        }
        self.dirty = true;
    }

    /// Applies `perm` to every varying field (`new[i] = old[perm[i]]`) and sets
    /// `dirty`.
    pub fn permute(&mut self, perm: &[usize]) -> Result<(), ModelError> {
        for field in self.varyings.values_mut() {
            field.permute(perm)?;
        }
        self.dirty = true;
        Ok(())
    }

    /// Convenience accessor for the `"position"` varying field, used pervasively
    /// by the neighbor index and sources.
    pub fn positions(&self) -> Option<&Vec<Vector<R, D>>> {
        self.varyings.get("position").and_then(|f| f.as_real_vector().ok())
    }
}

fn permute_in_place<R: Real, I: Index, const D: usize>(field: &mut Field<R, I, D>, surviving: &[usize]) {
    macro_rules! compact {
        ($v:expr) => {{
            let old = std::mem::take($v);
            *$v = surviving.iter().map(|&i| old[i].clone()).collect();
        }};
    }
    match field {
        Field::RealScalar(v) => compact!(v),
        Field::RealVector(v) => compact!(v),
        Field::RealMatrix(v) => compact!(v),
        Field::IntegerScalar(v) => compact!(v),
        Field::IntegerVector(v) => compact!(v),
        Field::BooleanScalar(v) => compact!(v),
    }
}

/// Owns all `Group`s and the Model-wide global fields.
pub struct Model<R: Real, I: Index, const D: usize> {
    groups: Vec<Group<R, I, D>>,
    index_by_name: MapType<String, usize>,
    globals: MapType<String, Field<R, I, D>>,
}

impl<R: Real, I: Index, const D: usize> Default for Model<R, I, D> {
    fn default() -> Self {
        Model { groups: Vec::new(), index_by_name: new_map(), globals: new_map() }
    }
}

impl<R: Real, I: Index, const D: usize> Model<R, I, D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, name: &str, group_type: &str) -> Result<&mut Group<R, I, D>, ModelError> {
        validate_identifier(name)?;
        if self.index_by_name.contains_key(name) {
            return Err(ModelError::GroupExists(name.to_string()));
        }
        let index = self.groups.len();
        self.groups.push(Group::new(name, group_type, index));
        self.index_by_name.insert(name.to_string(), index);
        Ok(&mut self.groups[index])
    }

    pub fn get_group(&self, name: &str) -> Result<&Group<R, I, D>, ModelError> {
        let idx = *self.index_by_name.get(name).ok_or_else(|| ModelError::UnknownGroup(name.to_string()))?;
        Ok(&self.groups[idx])
    }

    pub fn get_group_mut(&mut self, name: &str) -> Result<&mut Group<R, I, D>, ModelError> {
        let idx = *self.index_by_name.get(name).ok_or_else(|| ModelError::UnknownGroup(name.to_string()))?;
        Ok(&mut self.groups[idx])
    }

    pub fn get_group_by_index(&self, index: usize) -> Option<&Group<R, I, D>> {
        self.groups.get(index)
    }
    pub fn get_group_by_index_mut(&mut self, index: usize) -> Option<&mut Group<R, I, D>> {
        self.groups.get_mut(index)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Groups in stable `group_index` (insertion) order.
    pub fn groups(&self) -> impl Iterator<Item = &Group<R, I, D>> {
        self.groups.iter()
    }
    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut Group<R, I, D>> {
        self.groups.iter_mut()
    }

    /// Groups ordered lexicographically by name, used for deterministic save
    /// and VTK output.
    pub fn groups_by_name(&self) -> Vec<&Group<R, I, D>> {
        let mut v: Vec<&Group<R, I, D>> = self.groups.iter().collect();
        v.sort_by(|a, b| a.name().cmp(b.name()));
        v
    }

    /// Removes a group by name. Re-numbers the `group_index` of every group
    /// after the removed one to keep indices dense and contiguous; callers that
    /// cached a `group_index` across a `RemoveGroup` must re-resolve it.
    pub fn remove_group(&mut self, name: &str) -> Result<(), ModelError> {
        let idx = *self.index_by_name.get(name).ok_or_else(|| ModelError::UnknownGroup(name.to_string()))?;
        self.groups.remove(idx);
        self.index_by_name.remove(name);
        for (i, g) in self.groups.iter_mut().enumerate().skip(idx) {
            g.group_index = i;
            self.index_by_name.insert(g.name.clone(), i);
        }
        Ok(())
    }

    pub fn add_global(&mut self, name: &str, make: impl FnOnce() -> Field<R, I, D>) -> Result<(), ModelError> {
        Group::<R, I, D>::add_field(&mut self.globals, name, make, Some(1))
    }
    pub fn get_global(&self, name: &str) -> Result<&Field<R, I, D>, ModelError> {
        self.globals.get(name).ok_or_else(|| ModelError::UnknownField(name.to_string()))
    }
    pub fn get_global_mut(&mut self, name: &str) -> Result<&mut Field<R, I, D>, ModelError> {
        self.globals.get_mut(name).ok_or_else(|| ModelError::UnknownField(name.to_string()))
    }
    pub fn global_names(&self) -> impl Iterator<Item = &String> {
        self.globals.keys()
    }

    /// Reads a scalar real global, e.g. `smoothing_scale`.
    pub fn global_real(&self, name: &str) -> Result<R, ModelError> {
        Ok(self.get_global(name)?.as_real_scalar()?[0])
    }
    pub fn set_global_real(&mut self, name: &str, value: R) -> Result<(), ModelError> {
        self.get_global_mut(name)?.as_real_scalar_mut()?[0] = value;
        Ok(())
    }
    pub fn global_vector(&self, name: &str) -> Result<Vector<R, D>, ModelError> {
        Ok(self.get_global(name)?.as_real_vector()?[0])
    }
    pub fn global_integer(&self, name: &str) -> Result<I, ModelError> {
        Ok(self.get_global(name)?.as_integer_scalar()?[0])
    }
    pub fn set_global_integer(&mut self, name: &str, value: I) -> Result<(), ModelError> {
        self.get_global_mut(name)?.as_integer_scalar_mut()?[0] = value;
        Ok(())
    }
}

/// Component-type helper used when declaring fields without spelling out the
/// `Field::new_*` constructor directly (mirrors the `AddUniform<T,N...>` /
/// `AddVarying<T,N...>` template API).
pub fn real_scalar<R: Real, I: Index, const D: usize>() -> Field<R, I, D> {
    Field::new_real_scalar()
}
pub fn real_vector<R: Real, I: Index, const D: usize>() -> Field<R, I, D> {
    Field::new_real_vector()
}
pub fn real_matrix<R: Real, I: Index, const D: usize>() -> Field<R, I, D> {
    Field::new_real_matrix()
}
pub fn integer_scalar<R: Real, I: Index, const D: usize>() -> Field<R, I, D> {
    Field::new_integer_scalar()
}
pub fn boolean_scalar<R: Real, I: Index, const D: usize>() -> Field<R, I, D> {
    Field::new_boolean_scalar()
}

#[allow(unused)]
fn _assert_component_type_unused(_c: ComponentType) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identifier_rejected() {
        let mut m: Model<f64, i32, 3> = Model::new();
        assert!(matches!(m.add_group("1bad", "fluid"), Err(ModelError::InvalidIdentifier(_))));
    }

    #[test]
    fn duplicate_group_rejected() {
        let mut m: Model<f64, i32, 3> = Model::new();
        m.add_group("fluid", "fluid").unwrap();
        assert!(matches!(m.add_group("fluid", "fluid"), Err(ModelError::GroupExists(_))));
    }

    #[test]
    fn add_uniform_is_idempotent() {
        let g = &mut Model::<f64, i32, 3>::new();
        let group = g.add_group("fluid", "fluid").unwrap();
        group.add_uniform("rest_density", real_scalar).unwrap();
        group.add_uniform("rest_density", real_scalar).unwrap();
        assert!(group.add_uniform("rest_density", real_vector).is_err());
    }

    #[test]
    fn create_items_zero_is_noop() {
        let mut m: Model<f64, i32, 3> = Model::new();
        let group = m.add_group("fluid", "fluid").unwrap();
        group.add_varying("position", real_vector).unwrap();
        let r = group.create_items(0);
        assert_eq!(r, 0..0);
        assert_eq!(group.item_count(), 0);
        assert_eq!(group.get_varying("position").unwrap().size(), 0);
    }

    #[test]
    fn create_and_destroy_all_items() {
        let mut m: Model<f64, i32, 3> = Model::new();
        let group = m.add_group("fluid", "fluid").unwrap();
        group.add_varying("position", real_vector).unwrap();
        let r = group.create_items(4);
        assert_eq!(r, 0..4);
        group.destroy_items(&[0, 1, 2, 3]);
        assert_eq!(group.item_count(), 0);
        assert_eq!(group.get_varying("position").unwrap().size(), 0);
    }

    #[test]
    fn varying_field_length_tracks_item_count() {
        let mut m: Model<f64, i32, 3> = Model::new();
        let group = m.add_group("fluid", "fluid").unwrap();
        group.create_items(5);
        group.add_varying("mass", real_scalar).unwrap();
        assert_eq!(group.get_varying("mass").unwrap().size(), 5);
        group.create_items(2);
        assert_eq!(group.get_varying("mass").unwrap().size(), 7);
    }

    #[test]
    fn global_fields_have_length_one() {
        let mut m: Model<f64, i32, 3> = Model::new();
        m.add_global("gravity", real_vector).unwrap();
        assert_eq!(m.get_global("gravity").unwrap().size(), 1);
    }
}
