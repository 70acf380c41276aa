//! Scene description loading: turns a `model.group.<name>` config tree
//! into groups, sampled particles and sources on a [`Driver`]. Grounded in the
//! original `prtcl` `basic_application`'s scene-loading pass (construct
//! groups, then populate them from `sample`/`source` blocks), split out of the
//! driver itself to keep CLI/scene concerns out of the runtime library.

use crate::cli::ConfigTree;
use sph_rt::error::{FieldError, FileFormatError, ModelError};
use sph_rt::geometry::{self, SurfaceSamplingOptions, TriangleMesh};
use sph_rt::source::{Source, SourceKind};
use sph_rt::tensor::{from_array, Vector};
use sph_rt::{Driver, Index, Real};
use std::fs;
use std::path::Path;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SceneError {
    #[error("scene group \"{0}\" has no \"type\" entry")]
    MissingGroupType(String),
    #[error("sample block \"{0}\" has an unsupported \"what\" (only \"triangle_mesh\" is supported)")]
    UnsupportedSampleKind(String),
    #[error("sample block \"{0}\" has an unsupported \"file_type\" (only \"obj\" is supported)")]
    UnsupportedFileType(String),
    #[error("sample block \"{0}\" is missing a \"file_path\" entry")]
    MissingFilePath(String),
    #[error("source block \"{0}\" has an unsupported \"kind\" (expected \"hcp\" or \"scg\")")]
    UnsupportedSourceKind(String),
    #[error(transparent)]
    FileFormat(#[from] FileFormatError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Reads a scene description file (the same dotted `key=value` grammar as CLI
/// overrides) into a [`ConfigTree`].
pub fn load_tree_file(path: impl AsRef<Path>) -> Result<ConfigTree, SceneError> {
    let contents = fs::read_to_string(path).map_err(FileFormatError::Io)?;
    Ok(ConfigTree::parse_lines(&contents).map_err(|e| FileFormatError::BadFormat(e.to_string()))?)
}

fn read_vector3<R: Real>(tree: &ConfigTree, prefix: &str, default: Vector<R, 3>, h: R) -> Vector<R, 3> {
    let x = tree.get_f64(&format!("{prefix}.x")).and_then(R::from_f64).unwrap_or(default[0]);
    let y = tree.get_f64(&format!("{prefix}.y")).and_then(R::from_f64).unwrap_or(default[1]);
    let z = tree.get_f64(&format!("{prefix}.z")).and_then(R::from_f64).unwrap_or(default[2]);
    let v = from_array([x, y, z]);
    if tree.get_bool_or(&format!("{prefix}.adaptive"), false) {
        v * h
    } else {
        v
    }
}

/// Adds every group named under `model.group` with its declared `type` (and
/// optional comma-separated `tags`). Field requirements are declared later by
/// [`sph_rt::Driver::finalize`]; this pass only establishes group identity and
/// membership so `finalize` has something to run its schemes' `require` over.
pub fn declare_groups<R: Real, I: Index>(tree: &ConfigTree, driver: &mut Driver<R, I>) -> Result<(), SceneError> {
    for name in tree.children("model.group") {
        let prefix = format!("model.group.{name}");
        let group_type = tree
            .get_str(&format!("{prefix}.type"))
            .ok_or_else(|| SceneError::MissingGroupType(name.clone()))?;
        let group = driver.model_mut().add_group(&name, group_type)?;
        if let Some(tags) = tree.get_str(&format!("{prefix}.tags")) {
            for tag in tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                group.add_tag(tag);
            }
        }
    }
    Ok(())
}

/// Sets each group's uniforms (`rest_density`, `gravity`) and populates it from
/// its `sample` blocks, then registers its `source` blocks. Must run after
/// [`sph_rt::Driver::finalize`] has declared every scheme's fields, since
/// `sample` population writes straight into `position`/`velocity`/`mass` and
/// `source` registration needs a resolvable group index.
pub fn populate_groups<R: Real, I: Index>(tree: &ConfigTree, driver: &mut Driver<R, I>, h: R) -> Result<(), SceneError> {
    for name in tree.children("model.group") {
        let prefix = format!("model.group.{name}");

        let rest_density = R::from_f64(tree.get_f64_or(&format!("{prefix}.rest_density"), 1000.0)).unwrap();
        let default_gravity = from_array([R::zero(), R::zero(), R::from_f64(-9.81).unwrap()]);
        let gravity = read_vector3(tree, &format!("{prefix}.gravity"), default_gravity, h);
        {
            let group = driver.model_mut().get_group_mut(&name)?;
            // `rest_density`/`gravity` only exist on groups a scheme has
            // required them on (fluid groups, via `finalize`); other group
            // types are left untouched rather than growing unused fields.
            if let Ok(field) = group.get_uniform_mut("rest_density") {
                field.as_real_scalar_mut()?[0] = rest_density;
            }
            if let Ok(field) = group.get_uniform_mut("gravity") {
                field.as_real_vector_mut()?[0] = gravity;
            }
        }

        for index in tree.children(&format!("{prefix}.sample")) {
            let sample_prefix = format!("{prefix}.sample.{index}");
            let points = sample_points(tree, &sample_prefix, h)?;
            populate_particles(driver, &name, &points, rest_density, h)?;
        }

        for index in tree.children(&format!("{prefix}.source")) {
            let source_prefix = format!("{prefix}.source.{index}");
            add_source(tree, driver, &name, &source_prefix, h)?;
        }
    }
    Ok(())
}

fn sample_points<R: Real>(tree: &ConfigTree, prefix: &str, h: R) -> Result<Vec<Vector<R, 3>>, SceneError> {
    let what = tree.get_str_or(&format!("{prefix}.what"), "triangle_mesh");
    if what != "triangle_mesh" {
        return Err(SceneError::UnsupportedSampleKind(prefix.to_string()));
    }
    let file_type = tree.get_str_or(&format!("{prefix}.file_type"), "obj");
    if file_type != "obj" {
        return Err(SceneError::UnsupportedFileType(prefix.to_string()));
    }
    let file_path = tree.get_str(&format!("{prefix}.file_path")).ok_or_else(|| SceneError::MissingFilePath(prefix.to_string()))?;

    let contents = fs::read_to_string(file_path).map_err(FileFormatError::Io)?;
    let mut mesh: TriangleMesh<R> = geometry::load_obj(&contents)?;

    let scaling = read_vector3(tree, &format!("{prefix}.scaling"), from_array([R::one(), R::one(), R::one()]), h);
    let translation = read_vector3(tree, &format!("{prefix}.translation"), from_array([R::zero(), R::zero(), R::zero()]), h);
    mesh.transform(scaling, translation);

    let mode = tree.get_str_or(&format!("{prefix}.mode"), "surface");
    if mode == "volume" {
        let (mut lo, mut hi) = (from_array([R::zero(); 3]), from_array([R::zero(); 3]));
        for (i, v) in mesh.vertices.iter().enumerate() {
            if i == 0 {
                lo = *v;
                hi = *v;
            } else {
                for k in 0..3 {
                    if v[k] < lo[k] {
                        lo[k] = v[k];
                    }
                    if v[k] > hi[k] {
                        hi[k] = v[k];
                    }
                }
            }
        }
        Ok(geometry::sample_volume(lo, hi, h))
    } else {
        let max_sample_distance = R::from_f64(tree.get_f64_or(&format!("{prefix}.max_sample_distance"), h.to_f64().unwrap_or(0.025))).unwrap();
        let opts = SurfaceSamplingOptions::new(max_sample_distance);
        Ok(geometry::sample_surface(&mesh, &opts))
    }
}

fn populate_particles<R: Real, I: Index>(
    driver: &mut Driver<R, I>,
    group_name: &str,
    points: &[Vector<R, 3>],
    rest_density: R,
    h: R,
) -> Result<(), SceneError> {
    let group = driver.model_mut().get_group_mut(group_name)?;
    let range = group.create_items(points.len());
    let mass = h.powi(3) * rest_density;
    if let Ok(positions) = group.get_varying_mut("position").and_then(|f| Ok(f.as_real_vector_mut()?)) {
        for (slot, p) in range.clone().zip(points.iter()) {
            positions[slot] = *p;
        }
    }
    if let Ok(masses) = group.get_varying_mut("mass").and_then(|f| Ok(f.as_real_scalar_mut()?)) {
        for slot in range.clone() {
            masses[slot] = mass;
        }
    }
    // Scene-loaded particles predate the clock; stamp them as already past
    // `fade_duration` so they are not treated as newborn on the first frame.
    if let Ok(births) = group.get_varying_mut("time_of_birth").and_then(|f| Ok(f.as_real_scalar_mut()?)) {
        for slot in range {
            births[slot] = R::from_f64(-1.0).unwrap();
        }
    }
    Ok(())
}

fn add_source<R: Real, I: Index>(
    tree: &ConfigTree,
    driver: &mut Driver<R, I>,
    group_name: &str,
    prefix: &str,
    h: R,
) -> Result<(), SceneError> {
    let kind = match tree.get_str_or(&format!("{prefix}.kind"), "hcp") {
        "hcp" => SourceKind::Hcp,
        "scg" => SourceKind::Scg,
        _ => return Err(SceneError::UnsupportedSourceKind(prefix.to_string())),
    };
    let center = read_vector3(tree, &format!("{prefix}.center"), from_array([R::zero(); 3]), h);
    let default_velocity = from_array([R::zero(), R::zero(), R::zero()]);
    let velocity = read_vector3(tree, &format!("{prefix}.velocity"), default_velocity, h);
    let radius = R::from_f64(tree.get_f64_or(&format!("{prefix}.radius"), 2.0)).unwrap() * h;
    let remaining_count: i64 = tree.get_str(&format!("{prefix}.count")).and_then(|s| s.parse().ok()).unwrap_or(0);

    let group_index = driver.model().get_group(group_name)?.group_index();
    let source = Source::new(kind, group_index, center, velocity, radius, remaining_count);
    driver.add_source(group_index, source);

    for sample_index in tree.children(&format!("{prefix}.sample")) {
        let sample_prefix = format!("{prefix}.sample.{sample_index}");
        let points = sample_points(tree, &sample_prefix, h)?;
        populate_particles(driver, group_name, &points, R::from_f64(1000.0).unwrap(), h)?;
    }
    Ok(())
}
