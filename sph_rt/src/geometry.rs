//! Geometry sampling: a minimal triangle mesh type, an OBJ loader for
//! it, affine transforms, and the surface/volume particle samplers scenes use
//! to seed boundary and fluid groups.

use crate::error::FileFormatError;
use crate::numeric::Real;
use crate::tensor::Vector;
use num::ToPrimitive;

/// A triangle mesh: plain vertex and index buffers, no normals/UVs/topology —
/// everything this crate's samplers need and nothing more.
#[derive(Debug, Clone, Default)]
pub struct TriangleMesh<R: Real> {
    pub vertices: Vec<Vector<R, 3>>,
    pub faces: Vec<[u32; 3]>,
}

impl<R: Real> TriangleMesh<R> {
    pub fn new(vertices: Vec<Vector<R, 3>>, faces: Vec<[u32; 3]>) -> Self {
        TriangleMesh { vertices, faces }
    }

    fn face_vertices(&self, face: [u32; 3]) -> Option<[Vector<R, 3>; 3]> {
        Some([
            *self.vertices.get(face[0] as usize)?,
            *self.vertices.get(face[1] as usize)?,
            *self.vertices.get(face[2] as usize)?,
        ])
    }

    /// Applies `scale` (per-axis) then `translation`, in place.
    pub fn transform(&mut self, scale: Vector<R, 3>, translation: Vector<R, 3>) {
        for v in &mut self.vertices {
            *v = v.component_mul(&scale) + translation;
        }
    }
}

/// Parses a minimal OBJ subset: `v x y z` vertex lines and
/// `f a b c [d]` face lines (`a`/`b`/`c`/`d` may carry `/texture/normal`
/// suffixes, which are ignored); 1-based indices become 0-based; quads are
/// split into two triangles along `(0, 1, 2)`/`(0, 2, 3)`. Any other line is
/// ignored. An empty or entirely-unrecognized file yields an empty mesh, not
/// an error.
pub fn load_obj<R: Real>(contents: &str) -> Result<TriangleMesh<R>, FileFormatError> {
    let mut vertices = Vec::new();
    let mut faces = Vec::new();

    for line in contents.lines() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let coords: Vec<R> = tokens
                    .take(3)
                    .map(|t| {
                        t.parse::<f64>()
                            .ok()
                            .and_then(|v| R::from_f64(v))
                            .ok_or_else(|| FileFormatError::BadFormat(format!("bad vertex coordinate \"{t}\"")))
                    })
                    .collect::<Result<_, _>>()?;
                if coords.len() != 3 {
                    return Err(FileFormatError::BadFormat(format!("vertex line has {} coordinates, expected 3", coords.len())));
                }
                vertices.push(Vector::<R, 3>::new(coords[0], coords[1], coords[2]));
            }
            Some("f") => {
                let indices: Vec<u32> = tokens
                    .map(|t| {
                        let idx_str = t.split('/').next().unwrap_or(t);
                        idx_str
                            .parse::<i64>()
                            .ok()
                            .map(|i| (i - 1) as u32)
                            .ok_or_else(|| FileFormatError::BadFormat(format!("bad face index \"{t}\"")))
                    })
                    .collect::<Result<_, _>>()?;
                match indices.len() {
                    3 => faces.push([indices[0], indices[1], indices[2]]),
                    4 => {
                        faces.push([indices[0], indices[1], indices[2]]);
                        faces.push([indices[0], indices[2], indices[3]]);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    Ok(TriangleMesh::new(vertices, faces))
}

/// Samples a mesh's surface at up to `max_sample_distance` spacing. Each
/// stage is independently toggled so callers can e.g. skip vertex samples
/// when a mesh's vertex density already exceeds the target spacing.
pub struct SurfaceSamplingOptions<R> {
    pub max_sample_distance: R,
    pub sample_vertices: bool,
    pub sample_edges: bool,
    pub sample_faces: bool,
}

impl<R: Real> SurfaceSamplingOptions<R> {
    pub fn new(max_sample_distance: R) -> Self {
        SurfaceSamplingOptions { max_sample_distance, sample_vertices: true, sample_edges: true, sample_faces: true }
    }
}

/// Samples `mesh`'s surface per `opts`. Edges are deduplicated so a shared
/// edge between two faces is only sampled once.
pub fn sample_surface<R: Real>(mesh: &TriangleMesh<R>, opts: &SurfaceSamplingOptions<R>) -> Vec<Vector<R, 3>> {
    let mut samples = Vec::new();

    if opts.sample_vertices {
        samples.extend(mesh.vertices.iter().copied());
    }

    let mut seen_edges = std::collections::HashSet::new();
    for &face in &mesh.faces {
        let Some(verts) = mesh.face_vertices(face) else { continue };

        if opts.sample_edges {
            for (a, b) in [(0, 1), (1, 2), (2, 0)] {
                let (ia, ib) = (face[a], face[b]);
                let key = if ia < ib { (ia, ib) } else { (ib, ia) };
                if seen_edges.insert(key) {
                    samples.extend(sample_edge(verts[a], verts[b], opts.max_sample_distance));
                }
            }
        }

        if opts.sample_faces {
            samples.extend(sample_face_interior(verts, opts.max_sample_distance));
        }
    }

    samples
}

/// Points strictly between `a` and `b`, spaced no more than `max_distance`
/// apart (the endpoints themselves are never emitted — callers get those from
/// vertex/edge-endpoint sampling instead).
fn sample_edge<R: Real>(a: Vector<R, 3>, b: Vector<R, 3>, max_distance: R) -> Vec<Vector<R, 3>> {
    let length = (b - a).norm();
    let n = (length / max_distance).ceil().to_i64().unwrap_or(0).max(0) as usize;
    if n <= 1 {
        return Vec::new();
    }
    (1..n)
        .map(|i| {
            let t = R::from_usize(i).unwrap() / R::from_usize(n).unwrap();
            a + (b - a) * t
        })
        .collect()
}

/// Samples the interior of triangle `verts` via an obtuse-angle
/// decomposition: find the vertex opposite the longest edge, drop an altitude
/// to that edge, and fill the two resulting right triangles with horizontal
/// scan lines parallel to the long edge, each spaced `max_distance` apart.
fn sample_face_interior<R: Real>(verts: [Vector<R, 3>; 3], max_distance: R) -> Vec<Vector<R, 3>> {
    let edge_len = |i: usize, j: usize| (verts[j] - verts[i]).norm();
    let lengths = [edge_len(1, 2), edge_len(2, 0), edge_len(0, 1)];
    let apex = lengths
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);
    let (base_a, base_b) = match apex {
        0 => (1, 2),
        1 => (2, 0),
        _ => (0, 1),
    };
    let apex_point = verts[apex];
    let a = verts[base_a];
    let b = verts[base_b];

    let base_dir = crate::tensor::normalized(&(b - a));
    let base_len = (b - a).norm();
    let foot_t = (apex_point - a).dot(&base_dir);
    let foot = a + base_dir * foot_t;
    let altitude = (apex_point - foot).norm();

    if altitude <= R::default_epsilon() || base_len <= R::default_epsilon() {
        return Vec::new();
    }

    let altitude_dir = (apex_point - foot) / altitude;
    let rows = (altitude / max_distance).ceil().to_i64().unwrap_or(0).max(0) as usize;

    let mut samples = Vec::new();
    for row in 1..rows {
        let s = R::from_usize(row).unwrap() / R::from_usize(rows).unwrap();
        let height = altitude * s;
        let row_point = foot + altitude_dir * height;
        // Triangle similarity: the scan line at height fraction `s` from the
        // base spans a fraction `(1-s)` of the base, centered at `row_point`'s
        // foot-relative offset.
        let half_width = (base_len / R::from_f64(2.0).unwrap()) * (R::one() - s);
        let left_t = foot_t - half_width;
        let right_t = foot_t + half_width;
        let span = right_t - left_t;
        if span <= R::default_epsilon() {
            continue;
        }
        let cols = (span / max_distance).ceil().to_i64().unwrap_or(0).max(0) as usize;
        let cols = cols.max(1);
        for col in 0..=cols {
            let u = R::from_usize(col).unwrap() / R::from_usize(cols).unwrap();
            let t = left_t + span * u;
            samples.push(row_point + base_dir * (t - foot_t));
        }
    }
    samples
}

/// Regular grid of points filling `[lo, hi]` at `spacing`, used to seed fluid
/// blocks from a volume rather than a surface.
pub fn sample_volume<R: Real>(lo: Vector<R, 3>, hi: Vector<R, 3>, spacing: R) -> Vec<Vector<R, 3>> {
    let mut samples = Vec::new();
    if spacing <= R::default_epsilon() {
        return samples;
    }
    let extent = hi - lo;
    let counts: [usize; 3] = std::array::from_fn(|i| {
        if extent[i] <= R::zero() {
            1
        } else {
            (extent[i] / spacing).ceil().to_i64().unwrap_or(0).max(0) as usize + 1
        }
    });
    for ix in 0..counts[0] {
        for iy in 0..counts[1] {
            for iz in 0..counts[2] {
                let offset = Vector::<R, 3>::new(
                    spacing * R::from_usize(ix).unwrap(),
                    spacing * R::from_usize(iy).unwrap(),
                    spacing * R::from_usize(iz).unwrap(),
                );
                samples.push(lo + offset);
            }
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_single_quad_as_two_triangles() {
        let obj = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3 4
";
        let mesh: TriangleMesh<f64> = load_obj(obj).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn ignores_unknown_lines_and_handles_empty_input() {
        let mesh: TriangleMesh<f64> = load_obj("# a comment\ng group_name\n").unwrap();
        assert!(mesh.vertices.is_empty());
        assert!(mesh.faces.is_empty());

        let empty: TriangleMesh<f64> = load_obj("").unwrap();
        assert!(empty.vertices.is_empty());
    }

    #[test]
    fn strips_texture_and_normal_indices() {
        let obj = "\
v 0 0 0
v 1 0 0
v 0 1 0
f 1/1/1 2/2/1 3/3/1
";
        let mesh: TriangleMesh<f64> = load_obj(obj).unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
    }

    #[test]
    fn edge_sampling_excludes_endpoints() {
        let a = Vector::<f64, 3>::new(0.0, 0.0, 0.0);
        let b = Vector::<f64, 3>::new(1.0, 0.0, 0.0);
        let samples = sample_edge(a, b, 0.25);
        assert!(!samples.is_empty());
        for s in &samples {
            assert!(s[0] > 0.0 && s[0] < 1.0);
        }
    }

    #[test]
    fn volume_sampling_fills_a_box_on_a_regular_grid() {
        let lo = Vector::<f64, 3>::new(0.0, 0.0, 0.0);
        let hi = Vector::<f64, 3>::new(1.0, 1.0, 1.0);
        let samples = sample_volume(lo, hi, 0.5);
        assert!(samples.len() >= 27);
        for s in &samples {
            assert!(s[0] >= -1e-9 && s[0] <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn transform_applies_scale_then_translation() {
        let mut mesh = TriangleMesh::new(vec![Vector::<f64, 3>::new(1.0, 1.0, 1.0)], vec![]);
        mesh.transform(Vector::<f64, 3>::new(2.0, 2.0, 2.0), Vector::<f64, 3>::new(1.0, 0.0, 0.0));
        assert_eq!(mesh.vertices[0], Vector::<f64, 3>::new(3.0, 2.0, 2.0));
    }
}
