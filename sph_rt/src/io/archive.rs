//! Persisted-model binary archive: a length-prefixed, little-endian,
//! row-major dump of an entire [`Model`] — every group's tags, uniform and
//! varying fields, plus the model's global fields — used for save/load
//! round-trips and for seeding a scene from a prior run's final frame.
//!
//! Tensor payloads are written via `bytemuck::cast_slice` over the field's
//! native `Vec<R>`/`Vec<Vector<R, D>>`/`Vec<Matrix<R, D>>` storage, which is
//! little-endian on every platform this crate targets; `bool` is not
//! bytemuck-`Pod` (not every bit pattern is a valid `bool`) so boolean fields
//! are packed/unpacked one byte per value by hand.

use crate::error::FileFormatError;
use crate::field::Field;
use crate::model::{Group, Model};
use crate::numeric::{Index, Real};
use crate::tensor::{Matrix, Vector};
use std::fs;
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8; 8] = b"SPHARCH1";

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn ttype_code<R: Real, I: Index, const D: usize>(field: &Field<R, I, D>) -> u8 {
    match field {
        Field::RealScalar(_) => 0,
        Field::RealVector(_) => 1,
        Field::RealMatrix(_) => 2,
        Field::IntegerScalar(_) => 3,
        Field::IntegerVector(_) => 4,
        Field::BooleanScalar(_) => 5,
    }
}

fn write_field<R: Real, I: Index, const D: usize>(buf: &mut Vec<u8>, name: &str, field: &Field<R, I, D>) {
    write_str(buf, name);
    buf.push(ttype_code(field));
    let (count, bytes): (u32, Vec<u8>) = match field {
        Field::RealScalar(v) => (v.len() as u32, bytemuck::cast_slice(v).to_vec()),
        Field::RealVector(v) => (v.len() as u32, bytemuck::cast_slice(v).to_vec()),
        Field::RealMatrix(v) => (v.len() as u32, bytemuck::cast_slice(v).to_vec()),
        Field::IntegerScalar(v) => (v.len() as u32, bytemuck::cast_slice(v).to_vec()),
        Field::IntegerVector(v) => (v.len() as u32, bytemuck::cast_slice(v).to_vec()),
        Field::BooleanScalar(v) => (v.len() as u32, v.iter().map(|&b| b as u8).collect()),
    };
    write_u32(buf, count);
    write_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(&bytes);
}

/// Serializes `model` to `path` in the archive format described above.
pub fn write_model<R: Real, I: Index, const D: usize, P: AsRef<Path>>(
    model: &Model<R, I, D>,
    path: P,
) -> Result<(), FileFormatError> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);

    let groups = model.groups_by_name();
    write_u32(&mut buf, groups.len() as u32);
    for group in &groups {
        write_str(&mut buf, group.name());
        write_str(&mut buf, group.group_type());

        let mut tags: Vec<&String> = group.tags().iter().collect();
        tags.sort();
        write_u32(&mut buf, tags.len() as u32);
        for tag in tags {
            write_str(&mut buf, tag);
        }

        write_u32(&mut buf, group.item_count() as u32);

        let mut uniform_names: Vec<&String> = group.uniform_names().collect();
        uniform_names.sort();
        write_u32(&mut buf, uniform_names.len() as u32);
        for name in uniform_names {
            write_field(&mut buf, name, group.get_uniform(name).unwrap());
        }

        let mut varying_names: Vec<&String> = group.varying_names().collect();
        varying_names.sort();
        write_u32(&mut buf, varying_names.len() as u32);
        for name in varying_names {
            write_field(&mut buf, name, group.get_varying(name).unwrap());
        }
    }

    let mut global_names: Vec<&String> = model.global_names().collect();
    global_names.sort();
    write_u32(&mut buf, global_names.len() as u32);
    for name in global_names {
        write_field(&mut buf, name, model.get_global(name).unwrap());
    }

    let mut file = fs::File::create(path)?;
    file.write_all(&buf)?;
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FileFormatError> {
        if self.pos + n > self.bytes.len() {
            return Err(FileFormatError::BadFormat("archive truncated".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, FileFormatError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String, FileFormatError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FileFormatError::BadFormat("non-UTF8 string in archive".into()))
    }
}

fn read_field<R: Real, I: Index, const D: usize>(reader: &mut Reader) -> Result<(String, Field<R, I, D>), FileFormatError> {
    let name = reader.string()?;
    let ttype = reader.take(1)?[0];
    let count = reader.u32()? as usize;
    let byte_len = reader.u32()? as usize;
    let bytes = reader.take(byte_len)?;

    let field = match ttype {
        0 => Field::RealScalar(cast_or_err::<R>(bytes, count)?),
        1 => Field::RealVector(cast_or_err::<Vector<R, D>>(bytes, count)?),
        2 => Field::RealMatrix(cast_or_err::<Matrix<R, D>>(bytes, count)?),
        3 => Field::IntegerScalar(cast_or_err::<I>(bytes, count)?),
        4 => Field::IntegerVector(cast_or_err::<Vector<I, D>>(bytes, count)?),
        5 => {
            if bytes.len() != count {
                return Err(FileFormatError::BadFormat("boolean field byte count mismatch".into()));
            }
            Field::BooleanScalar(bytes.iter().map(|&b| b != 0).collect())
        }
        other => return Err(FileFormatError::BadFormat(format!("unknown field type code {other}"))),
    };
    Ok((name, field))
}

fn cast_or_err<T: bytemuck::Pod>(bytes: &[u8], count: usize) -> Result<Vec<T>, FileFormatError> {
    if bytes.len() != count * std::mem::size_of::<T>() {
        return Err(FileFormatError::BadFormat("tensor byte length does not match component count".into()));
    }
    Ok(bytemuck::cast_slice(bytes).to_vec())
}

/// Deserializes a model previously written by [`write_model`].
pub fn read_model<R: Real, I: Index, const D: usize, P: AsRef<Path>>(path: P) -> Result<Model<R, I, D>, FileFormatError> {
    let bytes = fs::read(path)?;
    let mut reader = Reader::new(&bytes);

    if reader.take(MAGIC.len())? != MAGIC {
        return Err(FileFormatError::BadFormat("not a sph_rt model archive".into()));
    }

    let mut model: Model<R, I, D> = Model::new();

    let group_count = reader.u32()?;
    for _ in 0..group_count {
        let name = reader.string()?;
        let group_type = reader.string()?;
        let group = model
            .add_group(&name, &group_type)
            .map_err(|e| FileFormatError::BadFormat(e.to_string()))?;

        let tag_count = reader.u32()?;
        for _ in 0..tag_count {
            group.add_tag(reader.string()?);
        }

        let item_count = reader.u32()? as usize;

        let uniform_count = reader.u32()?;
        for _ in 0..uniform_count {
            let (name, field) = read_field::<R, I, D>(&mut reader)?;
            install_field(group, &name, field, true).map_err(|e| FileFormatError::BadFormat(e.to_string()))?;
        }

        let varying_count = reader.u32()?;
        for _ in 0..varying_count {
            let (name, field) = read_field::<R, I, D>(&mut reader)?;
            install_field(group, &name, field, false).map_err(|e| FileFormatError::BadFormat(e.to_string()))?;
        }
        // Each varying field was already overwritten at its decoded length
        // (== item_count); this just brings `group.item_count()` itself back
        // in sync, it does not touch the field storage again.
        group.resize(item_count);
    }

    let global_count = reader.u32()?;
    for _ in 0..global_count {
        let (name, field) = read_field::<R, I, D>(&mut reader)?;
        install_global(&mut model, &name, field).map_err(|e| FileFormatError::BadFormat(e.to_string()))?;
    }

    Ok(model)
}

fn install_field<R: Real, I: Index, const D: usize>(
    group: &mut Group<R, I, D>,
    name: &str,
    field: Field<R, I, D>,
    uniform: bool,
) -> Result<(), crate::error::ModelError> {
    let empty = empty_like(&field);
    if uniform {
        group.add_uniform(name, || empty)?;
        *group.get_uniform_mut(name)? = field;
    } else {
        group.add_varying(name, || empty)?;
        *group.get_varying_mut(name)? = field;
    }
    Ok(())
}

fn install_global<R: Real, I: Index, const D: usize>(
    model: &mut Model<R, I, D>,
    name: &str,
    field: Field<R, I, D>,
) -> Result<(), crate::error::ModelError> {
    let empty = empty_like(&field);
    model.add_global(name, || empty)?;
    *model.get_global_mut(name)? = field;
    Ok(())
}

fn empty_like<R: Real, I: Index, const D: usize>(field: &Field<R, I, D>) -> Field<R, I, D> {
    match field {
        Field::RealScalar(_) => Field::new_real_scalar(),
        Field::RealVector(_) => Field::new_real_vector(),
        Field::RealMatrix(_) => Field::new_real_matrix(),
        Field::IntegerScalar(_) => Field::new_integer_scalar(),
        Field::IntegerVector(_) => Field::new_integer_vector(),
        Field::BooleanScalar(_) => Field::new_boolean_scalar(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::real_scalar;
    use crate::tensor::from_array;

    #[test]
    fn round_trips_a_model_with_uniform_and_varying_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.sphm");

        let mut model: Model<f64, i32, 3> = Model::new();
        {
            let g = model.add_group("fluid_a", "fluid").unwrap();
            g.add_tag("surface_tension");
            g.add_uniform("rest_density", real_scalar).unwrap();
            g.get_uniform_mut("rest_density").unwrap().as_real_scalar_mut().unwrap()[0] = 1000.0;
            g.add_varying("position", crate::model::real_vector).unwrap();
            g.create_items(2);
            let pos = g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap();
            pos[0] = from_array([0.0, 0.0, 0.0]);
            pos[1] = from_array([1.0, 2.0, 3.0]);
        }
        model.add_global("time", real_scalar).unwrap();
        model.set_global_real("time", 1.5).unwrap();

        write_model(&model, &path).unwrap();
        let loaded: Model<f64, i32, 3> = read_model(&path).unwrap();

        let g = loaded.get_group("fluid_a").unwrap();
        assert_eq!(g.group_type(), "fluid");
        assert!(g.has_tag("surface_tension"));
        assert_eq!(g.item_count(), 2);
        assert_eq!(g.get_uniform("rest_density").unwrap().as_real_scalar().unwrap()[0], 1000.0);
        let pos = g.get_varying("position").unwrap().as_real_vector().unwrap();
        assert_eq!(pos[0], from_array([0.0, 0.0, 0.0]));
        assert_eq!(pos[1], from_array([1.0, 2.0, 3.0]));
        assert_eq!(loaded.global_real("time").unwrap(), 1.5);
    }

    #[test]
    fn rejects_a_file_with_a_bad_magic_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.sphm");
        fs::write(&path, b"NOTANARCHIVE").unwrap();
        let result: Result<Model<f64, i32, 3>, _> = read_model(&path);
        assert!(result.is_err());
    }
}
