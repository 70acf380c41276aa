//! CLI driver binary: parses arguments, loads a scene description,
//! wires it into a [`sph_rt::Driver`] and runs the frame loop, writing one
//! VTK file per group per frame. Exit codes: `0` success, `1` argument error
//! (bad CLI flags, malformed/unreadable scene), `2` runtime error (anything
//! the core surfaces once the simulation is actually running).

mod cli;
mod scene;

use cli::{Args, ConfigTree};
use sph_rt::{Driver, DriverParams};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    env_logger::init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match Args::parse(argv) {
        Ok(args) => args,
        Err(e) => return argument_error(e),
    };

    let scene_path = match args.positionals.first() {
        Some(path) => path,
        None => return argument_error("missing scene file path argument"),
    };

    let mut tree = match scene::load_tree_file(scene_path) {
        Ok(tree) => tree,
        Err(e) => return argument_error(e),
    };
    tree.merge(args.overrides);

    let params = driver_params_from_tree(&tree);
    let mut driver: Driver<f64, i32> = Driver::new(params);

    if let Err(e) = scene::declare_groups(&tree, &mut driver) {
        return argument_error(e);
    }
    if let Err(e) = driver.finalize() {
        return runtime_error(e);
    }
    if let Err(e) = scene::populate_groups(&tree, &mut driver, params.particle_radius) {
        return argument_error(e);
    }
    if let Err(e) = driver.reload() {
        return runtime_error(e);
    }

    let output_dir = tree.get_str_or("output.directory", "output");
    let frame_count = tree.get_u64_or("output.frame_count", 100);

    for _ in 0..frame_count {
        let mut write_error = None;
        let result = driver.run_frame(|model, frame| {
            for group in model.groups_by_name() {
                let path = format!("{output_dir}/{}_{:06}.vtk", group.name(), frame);
                if let Err(e) = sph_rt::io::vtk::write_group_vtk(group, path) {
                    log::error!("failed to write frame output for group \"{}\": {e}", group.name());
                    write_error.get_or_insert(e);
                }
            }
        });
        if let Err(e) = result {
            return runtime_error(e);
        }
        if let Some(e) = write_error {
            return runtime_error(e);
        }
    }
    0
}

fn driver_params_from_tree(tree: &ConfigTree) -> DriverParams<f64> {
    let default = DriverParams::default();
    DriverParams {
        particle_radius: tree.get_f64_or("simulation.particle_radius", default.particle_radius),
        frames_per_second: tree.get_f64_or("simulation.frames_per_second", default.frames_per_second),
        max_cfl: tree.get_f64_or("simulation.max_cfl", default.max_cfl),
        maximum_time_step: tree.get_f64_or("simulation.maximum_time_step", default.maximum_time_step),
        initial_time_step: tree.get_f64_or("simulation.initial_time_step", default.initial_time_step),
        fade_duration: tree.get_f64_or("simulation.fade_duration", default.fade_duration),
        permute_every: tree.get_u64_or("simulation.permute_every", default.permute_every),
        iisph: default.iisph,
    }
}

fn argument_error(e: impl std::fmt::Display) -> i32 {
    eprintln!("argument error: {e}");
    1
}

fn runtime_error(e: impl std::fmt::Display) -> i32 {
    eprintln!("runtime error: {e}");
    2
}
