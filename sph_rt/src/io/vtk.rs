//! Legacy VTK `POLYDATA` I/O: the on-disk format frame output is written in,
//! and the format scene snapshots can be reloaded from. Builds a
//! `vtkio::model::DataSet::PolyData` piece (points as a `Vertices` cell block
//! plus `POINT_DATA` scalar/vector attributes) and writes it through
//! `Vtk::export_be`, mirroring `splashsurf`'s `vtk_format.rs`.

use crate::error::FileFormatError;
use crate::model::Group;
use crate::numeric::{Index, Real};
use crate::tensor::Vector;
use num::ToPrimitive;
use std::fs;
use std::path::Path;
use vtkio::model::{
    Attribute, Attributes, ByteOrder, DataArray, DataSet, ElementType, Piece, PolyDataPiece,
    Version, VertexNumbers, Vtk,
};
use vtkio::IOBuffer;

/// Named point-attribute arrays accompanying a set of positions.
#[derive(Debug, Clone, Default)]
pub struct VtkPointData<R: Real> {
    pub scalars: Vec<(String, Vec<R>)>,
    pub vectors: Vec<(String, Vec<Vector<R, 3>>)>,
}

/// Writes `positions` (one vertex cell per point) and `point_data` to a
/// legacy `POLYDATA` file at `path`.
pub fn write_particles_vtk<R: Real, P: AsRef<Path>>(
    positions: &[Vector<R, 3>],
    point_data: &VtkPointData<R>,
    title: &str,
    path: P,
) -> Result<(), FileFormatError> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let n = positions.len();
    let mut coords: Vec<f64> = Vec::with_capacity(n * 3);
    for p in positions {
        coords.push(p.x.to_f64_lossy());
        coords.push(p.y.to_f64_lossy());
        coords.push(p.z.to_f64_lossy());
    }

    let mut vertex_cells = Vec::with_capacity(n * 2);
    for i in 0..n {
        vertex_cells.push(1);
        vertex_cells.push(i as u32);
    }

    let mut point_attributes = Attributes::new();
    for (name, values) in &point_data.scalars {
        let data: Vec<f64> = values.iter().map(|v| v.to_f64_lossy()).collect();
        point_attributes.point.push(Attribute::DataArray(DataArray {
            name: name.clone(),
            elem: ElementType::Scalars { num_comp: 1, lookup_table: None },
            data: IOBuffer::F64(data),
        }));
    }
    for (name, values) in &point_data.vectors {
        let mut data = Vec::with_capacity(values.len() * 3);
        for v in values {
            data.push(v.x.to_f64_lossy());
            data.push(v.y.to_f64_lossy());
            data.push(v.z.to_f64_lossy());
        }
        point_attributes.point.push(Attribute::DataArray(DataArray {
            name: name.clone(),
            elem: ElementType::Vectors,
            data: IOBuffer::F64(data),
        }));
    }

    let piece = PolyDataPiece {
        points: IOBuffer::F64(coords),
        verts: Some(VertexNumbers::Legacy { num_cells: n as u32, vertices: vertex_cells }),
        lines: None,
        polys: None,
        strips: None,
        data: point_attributes,
    };

    let vtk_file = Vtk {
        version: Version::new((2, 0)),
        title: title.to_string(),
        byte_order: ByteOrder::BigEndian,
        file_path: None,
        data: DataSet::PolyData { meta: None, pieces: vec![Piece::Inline(Box::new(piece))] },
    };

    vtk_file.export_be(path).map_err(|e| FileFormatError::BadFormat(e.to_string()))
}

/// Writes every real-valued varying field of `group` (besides `position`
/// itself, which becomes the point coordinates) as point data.
pub fn write_group_vtk<R: Real, I: Index, P: AsRef<Path>>(
    group: &Group<R, I, 3>,
    path: P,
) -> Result<(), FileFormatError> {
    let positions = group
        .positions()
        .ok_or_else(|| FileFormatError::BadFormat(format!("group \"{}\" has no position field", group.name())))?;

    let mut point_data = VtkPointData::default();
    for name in group.varying_names() {
        if name == "position" {
            continue;
        }
        let Ok(field) = group.get_varying(name) else { continue };
        match field {
            crate::field::Field::RealScalar(values) => point_data.scalars.push((name.clone(), values.clone())),
            crate::field::Field::RealVector(values) if values.first().map(|v| v.len()) == Some(3) => {
                point_data.vectors.push((name.clone(), values.clone()));
            }
            _ => {}
        }
    }

    write_particles_vtk(positions, &point_data, group.name(), path)
}

/// Reads back a file written by [`write_particles_vtk`]: the point block plus
/// any scalar/vector point-data arrays. Anything other than a single
/// `PolyData` piece is rejected with [`FileFormatError::BadFormat`] rather
/// than silently ignored.
pub fn read_particles_vtk<R: Real, P: AsRef<Path>>(path: P) -> Result<(Vec<Vector<R, 3>>, VtkPointData<R>), FileFormatError> {
    let path = path.as_ref();
    let mut vtk_file = Vtk::import(path).map_err(|e| FileFormatError::BadFormat(e.to_string()))?;
    vtk_file.load_all_pieces().map_err(|e| FileFormatError::BadFormat(e.to_string()))?;
    let file_path = vtk_file.file_path.clone();

    let piece = match vtk_file.data {
        DataSet::PolyData { pieces, .. } => pieces.into_iter().next().ok_or_else(|| FileFormatError::BadFormat("PolyData set had no pieces".into()))?,
        _ => return Err(FileFormatError::BadFormat("only PolyData files are supported".into())),
    };
    let piece = piece
        .into_loaded_piece_data(file_path.as_deref())
        .map_err(|e| FileFormatError::BadFormat(e.to_string()))?;

    let positions = buffer_to_vectors(&piece.points)?;

    let mut point_data = VtkPointData::default();
    // Dispatch on component count rather than matching `ElementType`
    // variants directly, mirroring `vtk_format.rs`'s own
    // `io_buffer_to_attribute_data` dispatch.
    let mut push_array = |array: &DataArray| -> Result<(), FileFormatError> {
        match array.num_comp() {
            1 => point_data.scalars.push((array.name.clone(), buffer_to_scalars(&array.data)?)),
            3 => point_data.vectors.push((array.name.clone(), buffer_to_vectors(&array.data)?)),
            _ => {}
        }
        Ok(())
    };
    for attribute in &piece.data.point {
        match attribute {
            Attribute::DataArray(array) => push_array(array)?,
            Attribute::Field { data_array, .. } => {
                for array in data_array {
                    push_array(array)?;
                }
            }
        }
    }

    Ok((positions, point_data))
}

fn buffer_to_scalars<R: Real>(buffer: &IOBuffer) -> Result<Vec<R>, FileFormatError> {
    match buffer {
        IOBuffer::F64(values) => Ok(values.iter().map(|v| R::from_f64(*v).unwrap()).collect()),
        IOBuffer::F32(values) => Ok(values.iter().map(|v| R::from_f32(*v).unwrap()).collect()),
        _ => Err(FileFormatError::BadFormat("unsupported scalar buffer type".into())),
    }
}

fn buffer_to_vectors<R: Real>(buffer: &IOBuffer) -> Result<Vec<Vector<R, 3>>, FileFormatError> {
    let coords: Vec<f64> = match buffer {
        IOBuffer::F64(values) => values.clone(),
        IOBuffer::F32(values) => values.iter().map(|v| *v as f64).collect(),
        _ => return Err(FileFormatError::BadFormat("unsupported point/vector buffer type".into())),
    };
    if coords.len() % 3 != 0 {
        return Err(FileFormatError::BadFormat("coordinate buffer length is not divisible by 3".into()));
    }
    Ok(coords
        .chunks_exact(3)
        .map(|c| Vector::<R, 3>::new(R::from_f64(c[0]).unwrap(), R::from_f64(c[1]).unwrap(), R::from_f64(c[2]).unwrap()))
        .collect())
}

/// Small helper trait so the writer can format both `f32` and `f64` uniformly
/// without losing precision for the common `f64` case.
trait ToF64Lossy {
    fn to_f64_lossy(&self) -> f64;
}

impl<R: Real> ToF64Lossy for R {
    fn to_f64_lossy(&self) -> f64 {
        ToPrimitive::to_f64(self).unwrap_or(f64::NAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_positions_and_point_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("particles.vtk");

        let positions = vec![
            Vector::<f64, 3>::new(0.0, 0.0, 0.0),
            Vector::<f64, 3>::new(1.0, 0.0, 0.0),
            Vector::<f64, 3>::new(0.0, 1.0, 0.0),
        ];
        let mut point_data = VtkPointData::default();
        point_data.scalars.push(("density".to_string(), vec![1000.0, 1001.0, 999.5]));
        point_data.vectors.push((
            "velocity".to_string(),
            vec![
                Vector::<f64, 3>::new(0.1, 0.0, 0.0),
                Vector::<f64, 3>::new(0.0, 0.1, 0.0),
                Vector::<f64, 3>::new(0.0, 0.0, 0.1),
            ],
        ));

        write_particles_vtk(&positions, &point_data, "test particles", &path).unwrap();
        let (read_positions, read_data): (Vec<Vector<f64, 3>>, VtkPointData<f64>) = read_particles_vtk(&path).unwrap();

        assert_eq!(read_positions, positions);
        assert_eq!(read_data.scalars[0].1, vec![1000.0, 1001.0, 999.5]);
        assert_eq!(read_data.vectors[0].1, point_data.vectors[0].1);
    }

    #[test]
    fn writes_a_well_formed_polydata_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("header.vtk");
        let positions = vec![Vector::<f64, 3>::new(0.0, 0.0, 0.0)];
        write_particles_vtk(&positions, &VtkPointData::default(), "header check", &path).unwrap();

        let mut vtk_file = Vtk::import(&path).unwrap();
        vtk_file.load_all_pieces().unwrap();
        assert_eq!(vtk_file.title, "header check");
        match vtk_file.data {
            DataSet::PolyData { pieces, .. } => assert_eq!(pieces.len(), 1),
            _ => panic!("expected a PolyData data set"),
        }
    }
}
