use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sph_rt::kernel::{kernel_gradient_h, kernel_h};
use sph_rt::model::{real_scalar, real_vector, Model};
use sph_rt::neighborhood::NeighborIndex;
use sph_rt::tensor::{from_array, Vector};

fn bench_kernel(c: &mut Criterion) {
    let h = 0.025;
    let dx: Vector<f64, 3> = from_array([0.3 * h, 0.1 * h, -0.2 * h]);

    c.bench_function("kernel_h", |b| {
        b.iter(|| kernel_h(black_box(&dx), black_box(h)).unwrap())
    });
    c.bench_function("kernel_gradient_h", |b| {
        b.iter(|| kernel_gradient_h(black_box(&dx), black_box(h)).unwrap())
    });
}

/// Fills a cube of fluid particles on a regular `h`-spaced lattice, used as a
/// stand-in scene for the neighbor index benchmarks below.
fn build_populated_index(h: f64, particles_per_axis: i32) -> (Model<f64, i32, 3>, NeighborIndex<f64, 3>) {
    let mut model: Model<f64, i32, 3> = Model::new();
    let group = model.add_group("fluid", "fluid").unwrap();
    group.add_varying("position", real_vector).unwrap();
    group.add_varying("mass", real_scalar).unwrap();

    let n = particles_per_axis;
    let count = (n * n * n) as usize;
    let range = group.create_items(count);
    let positions = group.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap();
    let mut i = 0;
    for ix in 0..n {
        for iy in 0..n {
            for iz in 0..n {
                positions[range.start + i] = from_array([ix as f64 * h, iy as f64 * h, iz as f64 * h]);
                i += 1;
            }
        }
    }

    let mut nhood: NeighborIndex<f64, 3> = NeighborIndex::new();
    nhood.set_radius(2.0 * h).unwrap();
    nhood.load(&model).unwrap();
    nhood.update(&model);
    (model, nhood)
}

fn bench_neighbor_index(c: &mut Criterion) {
    let h = 0.025;
    let (model, mut nhood) = build_populated_index(h, 20);

    c.bench_function("neighbor_index_update_8000_particles", |b| {
        b.iter(|| nhood.update(black_box(&model)))
    });

    let probe = from_array([0.25, 0.25, 0.25]);
    c.bench_function("neighbor_index_has_any_neighbor", |b| {
        b.iter(|| black_box(nhood.has_any_neighbor(black_box(probe), black_box(0))))
    });

    drop(model);
}

criterion_group!(benches, bench_kernel, bench_neighbor_index);
criterion_main!(benches);
