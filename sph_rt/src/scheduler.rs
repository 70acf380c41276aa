//! Event scheduler: callbacks keyed by scheduled time, invoked in time
//! order by `tick`. A callback scheduled by another callback while it is firing
//! is deferred to the *next* `tick`, never run within the same one — this keeps
//! a misbehaving reschedule from spinning the clock forward within a single
//! call.

use crate::numeric::Real;

/// What a scheduled callback wants to happen next.
pub enum SchedulerAction<R: Real> {
    DoNothing,
    RescheduleAfter(R),
}

type Callback<R, Ctx> = Box<dyn FnMut(&mut Scheduler<R, Ctx>, R, &mut Ctx) -> SchedulerAction<R> + Send>;

struct Event<R: Real, Ctx> {
    time: R,
    callback: Callback<R, Ctx>,
}

/// Priority queue of time-keyed callbacks. `Ctx` is passed through to every
/// callback invocation (in this crate, the driver's `Model` + `NeighborIndex`).
pub struct Scheduler<R: Real, Ctx> {
    events: Vec<Event<R, Ctx>>,
    pending: Vec<Event<R, Ctx>>,
    in_tick: bool,
}

impl<R: Real, Ctx> Scheduler<R, Ctx> {
    pub fn new() -> Self {
        Scheduler { events: Vec::new(), pending: Vec::new(), in_tick: false }
    }

    /// Schedules `callback` to fire at `time`. If called from within a firing
    /// callback (`tick` is in progress), the event is deferred to the next
    /// `tick`.
    pub fn schedule_at(
        &mut self,
        time: R,
        callback: impl FnMut(&mut Scheduler<R, Ctx>, R, &mut Ctx) -> SchedulerAction<R> + Send + 'static,
    ) {
        let event = Event { time, callback: Box::new(callback) };
        if self.in_tick {
            self.pending.push(event);
        } else {
            self.events.push(event);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.events.len() + self.pending.len()
    }

    /// Invokes every callback scheduled at a time `<= now`, in order of
    /// scheduled time, passing each the lateness `now - scheduled_time`.
    pub fn tick(&mut self, now: R, ctx: &mut Ctx) {
        let mut due = Vec::new();
        let mut rest = Vec::new();
        for event in self.events.drain(..) {
            if event.time <= now {
                due.push(event);
            } else {
                rest.push(event);
            }
        }
        due.sort_by(|a, b| a.time.partial_cmp(&b.time).expect("event time must not be NaN"));
        self.events = rest;

        self.in_tick = true;
        for mut event in due {
            let lateness = now - event.time;
            match (event.callback)(self, lateness, ctx) {
                SchedulerAction::DoNothing => {}
                SchedulerAction::RescheduleAfter(d) => {
                    self.pending.push(Event { time: now + d, callback: event.callback });
                }
            }
        }
        self.events.append(&mut self.pending);
        self.in_tick = false;
    }
}

impl<R: Real, Ctx> Default for Scheduler<R, Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fires_in_time_order_once_each() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut sched: Scheduler<f64, ()> = Scheduler::new();
        {
            let order = order.clone();
            sched.schedule_at(1.5, move |_, _, _| {
                order.borrow_mut().push("b");
                SchedulerAction::DoNothing
            });
        }
        {
            let order = order.clone();
            sched.schedule_at(1.0, move |_, _, _| {
                order.borrow_mut().push("a");
                SchedulerAction::DoNothing
            });
        }
        let mut ctx = ();
        sched.tick(2.0, &mut ctx);
        assert_eq!(*order.borrow(), vec!["a", "b"]);
        assert_eq!(sched.pending_count(), 0);
    }

    #[test]
    fn callback_scheduled_during_tick_is_deferred() {
        let fired = Rc::new(RefCell::new(0));
        let mut sched: Scheduler<f64, ()> = Scheduler::new();
        {
            let fired = fired.clone();
            sched.schedule_at(1.0, move |s, _, _| {
                let fired = fired.clone();
                s.schedule_at(1.2, move |_, _, _| {
                    *fired.borrow_mut() += 1;
                    SchedulerAction::DoNothing
                });
                SchedulerAction::DoNothing
            });
        }
        let mut ctx = ();
        sched.tick(2.0, &mut ctx);
        // the nested callback at t=1.2 <= now=2.0 must not have fired yet
        assert_eq!(*fired.borrow(), 0);
        assert_eq!(sched.pending_count(), 1);
        sched.tick(2.0, &mut ctx);
        assert_eq!(*fired.borrow(), 1);
    }
}
