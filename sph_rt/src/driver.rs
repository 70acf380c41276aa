//! Simulation driver: wires the virtual clock, event scheduler,
//! particle sources, neighbor index and the scheme/solver pipeline together
//! into the per-frame step loop. Output (VTK, persisted archives) is left to
//! the caller via the `on_frame` callback of [`Driver::run_frame`] — this
//! module only owns the physics.

use crate::clock::VirtualClock;
use crate::error::RuntimeError;
use crate::kernel::kernel_support_radius;
use crate::model::Model;
use crate::neighborhood::NeighborIndex;
use crate::numeric::{Index, Real};
use crate::scheduler::Scheduler;
use crate::scheme::Scheme;
use crate::schemes::{
    BoundaryScheme, DensityScheme, GravityScheme, IisphScheme, ImplicitViscosityScheme,
    SurfaceTensionScheme, SymplecticEulerScheme, ViscosityScheme,
};
use crate::solvers::iisph::{self, IisphParams};
use crate::solvers::viscosity_cg;
use crate::source::Source;
use crate::tensor::{component_max, component_min, negative_infinity, positive_infinity, Vector};
use log::debug;

/// Scheduler context: owns the model and neighbor index so that
/// `Scheduler::tick` can hand a live `&mut` of both to source callbacks
/// without the driver's other fields aliasing them. `now` is stamped before
/// each `tick` call since the scheduler callback only receives lateness.
pub struct SourceCtx<R: Real, I: Index> {
    pub model: Model<R, I, 3>,
    pub nhood: NeighborIndex<R, 3>,
    now: R,
}

/// Fixed-for-the-run configuration, the runtime counterpart of a scene's
/// top-level simulation parameters.
#[derive(Debug, Clone, Copy)]
pub struct DriverParams<R> {
    pub particle_radius: R,
    pub frames_per_second: R,
    pub max_cfl: R,
    pub maximum_time_step: R,
    pub initial_time_step: R,
    pub fade_duration: R,
    /// Permute + reload schemes every `permute_every` frames for cache locality.
    pub permute_every: u64,
    pub iisph: IisphParams<R>,
}

impl<R: Real> Default for DriverParams<R> {
    fn default() -> Self {
        let h = R::from_f64(0.025).unwrap();
        DriverParams {
            particle_radius: h,
            frames_per_second: R::from_f64(30.0).unwrap(),
            max_cfl: R::from_f64(0.5).unwrap(),
            maximum_time_step: R::from_f64(0.005).unwrap(),
            initial_time_step: R::from_f64(0.001).unwrap(),
            fade_duration: R::from_f64(0.1).unwrap(),
            permute_every: 4,
            iisph: IisphParams::default(),
        }
    }
}

/// The full runtime pipeline: clock, scheduler, neighbor index, model and
/// every scheme, driven one frame at a time by [`Driver::run_frame`].
pub struct Driver<R: Real, I: Index> {
    ctx: SourceCtx<R, I>,
    scheduler: Scheduler<R, SourceCtx<R, I>>,
    clock: VirtualClock<R>,
    params: DriverParams<R>,
    next_dt: R,
    frame: u64,

    gravity: GravityScheme,
    boundary: BoundaryScheme,
    density: DensityScheme,
    viscosity: ViscosityScheme,
    implicit_viscosity: ImplicitViscosityScheme,
    surface_tension: SurfaceTensionScheme,
    iisph: IisphScheme,
    integrator: SymplecticEulerScheme,
}

impl<R: Real, I: Index> Driver<R, I> {
    pub fn new(params: DriverParams<R>) -> Self {
        Driver {
            ctx: SourceCtx { model: Model::new(), nhood: NeighborIndex::new(), now: R::zero() },
            scheduler: Scheduler::new(),
            clock: VirtualClock::new(),
            next_dt: params.initial_time_step,
            params,
            frame: 0,
            gravity: GravityScheme::new(),
            boundary: BoundaryScheme::new(),
            density: DensityScheme::new(),
            viscosity: ViscosityScheme::new(),
            implicit_viscosity: ImplicitViscosityScheme::new(),
            surface_tension: SurfaceTensionScheme::new(),
            iisph: IisphScheme::new(),
            integrator: SymplecticEulerScheme::new(),
        }
    }

    pub fn model(&self) -> &Model<R, I, 3> {
        &self.ctx.model
    }

    pub fn model_mut(&mut self) -> &mut Model<R, I, 3> {
        &mut self.ctx.model
    }

    pub fn clock(&self) -> &VirtualClock<R> {
        &self.clock
    }

    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    /// Registers `source` on `group_index`'s source list and schedules its
    /// first firing for the current clock time.
    pub fn add_source(&mut self, group_index: usize, source: Source<R, I, 3>) -> usize {
        let group = self.ctx.model.get_group_by_index_mut(group_index).expect("group must exist");
        group.sources_mut().push(source);
        let source_index = group.sources().len() - 1;
        self.schedule_source(group_index, source_index, self.clock.now().seconds());
        source_index
    }

    fn schedule_source(&mut self, group_index: usize, source_index: usize, at: R) {
        let h = self.params.particle_radius;
        self.scheduler.schedule_at(at, move |_sched, lateness, ctx: &mut SourceCtx<R, I>| {
            let rest_density = ctx
                .model
                .get_group_by_index(group_index)
                .and_then(|g| g.get_uniform("rest_density").ok())
                .and_then(|f| f.as_real_scalar().ok())
                .map(|v| v[0])
                .unwrap_or_else(|| R::zero());
            crate::source::emit(&mut ctx.model, &ctx.nhood, group_index, source_index, h, rest_density, ctx.now, lateness)
        });
    }

    /// Declares every scheme's field requirements on the groups already
    /// present in the model, builds the neighbor index and loads every scheme.
    /// Call once after the scene has populated groups, fields and sources, and
    /// again (or use [`Driver::reload`] directly) after any later change to
    /// group membership.
    pub fn finalize(&mut self) -> Result<(), RuntimeError> {
        self.gravity.require(&mut self.ctx.model)?;
        self.boundary.require(&mut self.ctx.model)?;
        self.density.require(&mut self.ctx.model)?;
        self.viscosity.require(&mut self.ctx.model)?;
        self.implicit_viscosity.require(&mut self.ctx.model)?;
        self.surface_tension.require(&mut self.ctx.model)?;
        self.iisph.require(&mut self.ctx.model)?;
        self.integrator.require(&mut self.ctx.model)?;

        let h = self.params.particle_radius;
        self.ctx.nhood.set_radius(kernel_support_radius(h))?;
        self.ctx.nhood.load(&self.ctx.model)?;
        self.ctx.nhood.update(&self.ctx.model);

        self.reload()
    }

    /// Re-snapshots active groups for every scheme and recomputes boundary
    /// volumes. Needed whenever group membership (not just item count)
    /// changes, and after a permute.
    pub fn reload(&mut self) -> Result<(), RuntimeError> {
        self.gravity.load(&self.ctx.model);
        self.boundary.load(&self.ctx.model);
        self.density.load(&self.ctx.model);
        self.viscosity.load(&self.ctx.model);
        self.implicit_viscosity.load(&self.ctx.model);
        self.surface_tension.load(&self.ctx.model);
        self.iisph.load(&self.ctx.model);
        self.integrator.load(&self.ctx.model);

        let h = self.params.particle_radius;
        self.boundary.compute_volume(&mut self.ctx.model, &self.ctx.nhood, h)?;
        Ok(())
    }

    fn total_item_count(&self) -> usize {
        self.ctx.model.groups().map(|g| g.item_count()).sum()
    }

    /// Runs one frame: `on_frame` is invoked once at the start of the frame
    /// (with the not-yet-stepped state) so the caller can write it out; the
    /// driver then substeps internally until the frame's wall-clock duration
    /// has elapsed, and finally prunes out-of-domain fluid particles.
    pub fn run_frame(&mut self, mut on_frame: impl FnMut(&Model<R, I, 3>, u64)) -> Result<(), RuntimeError> {
        on_frame(&self.ctx.model, self.frame);

        if self.params.permute_every > 0 && self.frame % self.params.permute_every == 0 {
            self.ctx.nhood.permute(&mut self.ctx.model)?;
            self.reload()?;
        }

        let frame_dt = R::one() / self.params.frames_per_second;
        let frame_done = self.clock.now().seconds() + frame_dt;
        while self.clock.now().seconds() < frame_done {
            self.substep()?;
        }

        self.remove_out_of_domain_particles()?;
        self.frame += 1;
        Ok(())
    }

    fn substep(&mut self) -> Result<(), RuntimeError> {
        self.ctx.nhood.update(&self.ctx.model);

        let now = self.clock.now().seconds();
        self.ctx.now = now;
        let before = self.total_item_count();
        self.scheduler.tick(now, &mut self.ctx);
        if self.total_item_count() != before {
            debug!("sources emitted particles, reloading neighbor index and schemes");
            self.ctx.nhood.load(&self.ctx.model)?;
            self.reload()?;
        }

        self.ctx.model.set_global_real("maximum_speed", R::zero())?;

        let h = self.params.particle_radius;
        self.density.compute_density(&mut self.ctx.model, &self.ctx.nhood, h)?;

        self.gravity.initialize_acceleration(&mut self.ctx.model)?;
        self.viscosity.accumulate_acceleration(&mut self.ctx.model, &self.ctx.nhood, h)?;
        self.surface_tension.compute_normal(&mut self.ctx.model, &self.ctx.nhood, h)?;
        self.surface_tension.accumulate_acceleration(&mut self.ctx.model, &self.ctx.nhood, h)?;

        let dt = self.next_dt;
        let fade = self.params.fade_duration;
        self.integrator.integrate_velocity_with_hard_fade(&mut self.ctx.model, dt, now, fade)?;

        iisph::solve(&self.iisph, &mut self.ctx.model, &self.ctx.nhood, h, dt, self.params.iisph)?;
        self.apply_pressure_acceleration()?;
        self.integrator.integrate_velocity_with_hard_fade(&mut self.ctx.model, dt, now, fade)?;

        self.implicit_viscosity.compute_vorticity(&mut self.ctx.model, &self.ctx.nhood, h)?;
        viscosity_cg::solve_vorticity_diffusion(&self.implicit_viscosity, &mut self.ctx.model, &self.ctx.nhood, h, dt)?;

        self.integrator.integrate_position(&mut self.ctx.model, dt)?;

        let max_speed = self.ctx.model.global_real("maximum_speed")?;
        let cfl_dt = if max_speed > R::default_epsilon() {
            self.params.max_cfl * h / max_speed
        } else {
            self.params.maximum_time_step
        };
        self.clock.advance(dt);
        self.next_dt = if cfl_dt < self.params.maximum_time_step { cfl_dt } else { self.params.maximum_time_step };

        Ok(())
    }

    /// Overwrites each IISPH-active fluid group's `acceleration` with its
    /// freshly solved `pressure_acceleration`, so the second
    /// `integrate_velocity_with_hard_fade` call folds in the pressure force.
    fn apply_pressure_acceleration(&mut self) -> Result<(), RuntimeError> {
        for &group_index in self.iisph.active_fluid_groups() {
            let group = self.ctx.model.get_group_by_index_mut(group_index).expect("active group must exist");
            let pressure_acc = group.get_varying("pressure_acceleration")?.as_real_vector()?.clone();
            let acceleration = group.get_varying_mut("acceleration")?.as_real_vector_mut()?;
            acceleration.copy_from_slice(&pressure_acc);
        }
        Ok(())
    }

    fn remove_out_of_domain_particles(&mut self) -> Result<(), RuntimeError> {
        let pad = self.params.particle_radius * R::from_f64(4.0).unwrap();
        let mut lo = positive_infinity::<R, 3>();
        let mut hi = negative_infinity::<R, 3>();
        let mut has_boundary = false;
        for group in self.ctx.model.groups() {
            if group.group_type() != "boundary" {
                continue;
            }
            if let Some(positions) = group.positions() {
                for p in positions {
                    lo = component_min(&lo, p);
                    hi = component_max(&hi, p);
                    has_boundary = true;
                }
            }
        }
        if !has_boundary {
            return Ok(());
        }
        let pad_vec = Vector::<R, 3>::new(pad, pad, pad);
        let lo = lo - pad_vec;
        let hi = hi + pad_vec;

        let fluid_groups: Vec<usize> =
            self.ctx.model.groups().filter(|g| g.group_type() == "fluid").map(|g| g.group_index()).collect();

        let mut removed_any = false;
        for group_index in fluid_groups {
            let group = self.ctx.model.get_group_by_index(group_index).expect("index came from this model");
            let positions = group.positions().cloned().unwrap_or_default();
            let out_of_domain: Vec<usize> = positions
                .iter()
                .enumerate()
                .filter(|(_, p)| p[0] < lo[0] || p[1] < lo[1] || p[2] < lo[2] || p[0] > hi[0] || p[1] > hi[1] || p[2] > hi[2])
                .map(|(i, _)| i)
                .collect();
            if !out_of_domain.is_empty() {
                debug!("removing {} out-of-domain particles from group {}", out_of_domain.len(), group_index);
                self.ctx.model.get_group_by_index_mut(group_index).expect("index came from this model").destroy_items(&out_of_domain);
                removed_any = true;
            }
        }

        if removed_any {
            self.ctx.nhood.load(&self.ctx.model)?;
            self.reload()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::from_array;

    fn build_driver(h: f64) -> Driver<f64, i32> {
        let params = DriverParams { particle_radius: h, ..DriverParams::default() };
        let mut driver: Driver<f64, i32> = Driver::new(params);

        driver.model_mut().add_group("box", "boundary").unwrap();
        driver.model_mut().add_group("water", "fluid").unwrap();

        driver.finalize().unwrap();
        {
            let g = driver.model_mut().get_group_mut("box").unwrap();
            g.create_items(9);
            let positions = g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap();
            let mut i = 0;
            for ix in -1..=1 {
                for iy in -1..=1 {
                    positions[i] = from_array([ix as f64 * h, iy as f64 * h, -h]);
                    i += 1;
                }
            }
        }
        {
            let g = driver.model_mut().get_group_mut("water").unwrap();
            g.get_uniform_mut("gravity").unwrap().as_real_vector_mut().unwrap()[0] = from_array([0.0, 0.0, -9.81]);
            g.get_uniform_mut("rest_density").unwrap().as_real_scalar_mut().unwrap()[0] = 1000.0;
            g.create_items(1);
            g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap()[0] = from_array([0.0, 0.0, 0.2]);
            g.get_varying_mut("mass").unwrap().as_real_scalar_mut().unwrap()[0] = h.powi(3) * 1000.0;
            // Scene-loaded particles predate the clock; stamp them as already
            // past `fade_duration` so they are not treated as newborn.
            g.get_varying_mut("time_of_birth").unwrap().as_real_scalar_mut().unwrap()[0] = -1.0;
        }
        driver.reload().unwrap();
        driver
    }

    #[test]
    fn a_single_falling_particle_gains_downward_speed_over_one_frame() {
        let h = 0.025;
        let mut driver = build_driver(h);
        driver.run_frame(|_, _| {}).unwrap();

        let v = driver.model().get_group("water").unwrap().get_varying("velocity").unwrap().as_real_vector().unwrap()[0];
        assert!(v[2] < 0.0, "gravity should have pulled the particle downward, got {:?}", v);
    }

    #[test]
    fn on_frame_callback_runs_before_the_frame_steps() {
        let h = 0.025;
        let mut driver = build_driver(h);
        let mut seen_frames = Vec::new();
        driver.run_frame(|_, frame| seen_frames.push(frame)).unwrap();
        driver.run_frame(|_, frame| seen_frames.push(frame)).unwrap();
        assert_eq!(seen_frames, vec![0, 1]);
    }

    #[test]
    fn particle_far_outside_the_boundary_is_removed_after_a_frame() {
        let h = 0.025;
        let mut driver = build_driver(h);
        {
            let g = driver.model_mut().get_group_mut("water").unwrap();
            g.create_items(1);
            let idx = g.item_count() - 1;
            g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap()[idx] = from_array([0.0, 0.0, 1000.0]);
            g.get_varying_mut("mass").unwrap().as_real_scalar_mut().unwrap()[idx] = h.powi(3) * 1000.0;
        }
        driver.reload().unwrap();
        let before = driver.model().get_group("water").unwrap().item_count();
        driver.run_frame(|_, _| {}).unwrap();
        let after = driver.model().get_group("water").unwrap().item_count();
        assert!(after < before, "the far-away particle should have been pruned as out-of-domain");
    }
}
