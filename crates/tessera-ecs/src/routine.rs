//! Cooperative multi-tick routines.
//!
//! A [`Routine`] does one unit of work each time the world steps it and
//! reports whether it wants to be stepped again. The world steps every
//! routine once per tick, after all systems, in the order they were spawned,
//! and drops the ones that return [`Step::Done`]. A routine spawned while the
//! routines are being stepped is first stepped on the next tick.

use std::collections::HashSet;

use crate::world::World;

/// Result of stepping a routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Step again next tick.
    Continue,
    /// Finished; drop the routine.
    Done,
}

/// A resumable unit of per-tick work.
pub trait Routine: 'static {
    fn step(&mut self, world: &mut World) -> Step;
}

impl<F> Routine for F
where
    F: FnMut(&mut World) -> Step + 'static,
{
    fn step(&mut self, world: &mut World) -> Step {
        self(world)
    }
}

/// Handle of a spawned routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutineId(pub(crate) u32);

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Wait {
    Ticks(u32),
    Until(f64),
}

/// Runs an action once after a number of ticks or once world time reaches a
/// deadline.
pub struct Delay<F> {
    wait: Wait,
    action: Option<F>,
}

impl<F: FnOnce(&mut World) + 'static> Delay<F> {
    /// Run `action` on the `ticks`-th step. Zero behaves like one.
    pub fn ticks(ticks: u32, action: F) -> Self {
        Self {
            wait: Wait::Ticks(ticks.max(1)),
            action: Some(action),
        }
    }

    /// Run `action` on the first step at which world time is at least
    /// `time_ms`.
    pub fn until(time_ms: f64, action: F) -> Self {
        Self {
            wait: Wait::Until(time_ms),
            action: Some(action),
        }
    }
}

impl<F: FnOnce(&mut World) + 'static> Routine for Delay<F> {
    fn step(&mut self, world: &mut World) -> Step {
        match &mut self.wait {
            Wait::Ticks(remaining) if *remaining > 1 => {
                *remaining -= 1;
                return Step::Continue;
            }
            Wait::Until(deadline) if world.time() < *deadline => return Step::Continue,
            _ => {}
        }
        if let Some(action) = self.action.take() {
            action(world);
        }
        Step::Done
    }
}

impl<F> std::fmt::Debug for Delay<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delay")
            .field("wait", &self.wait)
            .field("pending", &self.action.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// World integration
// ---------------------------------------------------------------------------

pub(crate) struct RoutineEntry {
    pub id: RoutineId,
    pub routine: Box<dyn Routine>,
}

#[derive(Default)]
pub(crate) struct Routines {
    pub entries: Vec<RoutineEntry>,
    /// Cancellations requested while the entries were taken out for stepping.
    pub cancelled: HashSet<RoutineId>,
    pub next_id: u32,
}

impl World {
    /// Register a routine. It is first stepped on the next tick.
    pub fn spawn_routine<R: Routine>(&mut self, routine: R) -> RoutineId {
        let id = RoutineId(self.routines.next_id);
        self.routines.next_id += 1;
        self.routines.entries.push(RoutineEntry {
            id,
            routine: Box::new(routine),
        });
        id
    }

    /// Cancel a routine. It is not stepped again, even later in the current
    /// tick.
    pub fn cancel_routine(&mut self, id: RoutineId) {
        let before = self.routines.entries.len();
        self.routines.entries.retain(|entry| entry.id != id);
        if self.routines.entries.len() == before {
            self.routines.cancelled.insert(id);
        }
    }

    /// Number of live routines.
    pub fn routine_count(&self) -> usize {
        self.routines.entries.len()
    }

    /// Step every routine once. Returns `(stepped, finished)`.
    pub(crate) fn step_routines(&mut self) -> (usize, usize) {
        let mut running = std::mem::take(&mut self.routines.entries);
        let mut stepped = 0;
        let mut finished = 0;

        running.retain_mut(|entry| {
            if self.routines.cancelled.remove(&entry.id) {
                return false;
            }
            stepped += 1;
            match entry.routine.step(self) {
                Step::Continue => true,
                Step::Done => {
                    finished += 1;
                    false
                }
            }
        });

        // Cancelled after their own step this tick.
        let cancelled = std::mem::take(&mut self.routines.cancelled);
        running.retain(|entry| !cancelled.contains(&entry.id));

        running.append(&mut self.routines.entries);
        self.routines.entries = running;
        (stepped, finished)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, serde::Serialize, serde::Deserialize)]
    struct Events(Vec<String>);

    fn world_with_log() -> (World, crate::entity::EntityId) {
        let mut world = World::new();
        world.register_component::<Events>("events");
        let log = world.spawn_immediate();
        world.add_component_immediate(log, Events::default()).unwrap();
        (world, log)
    }

    fn push(world: &mut World, log: crate::entity::EntityId, event: String) {
        world.get_component_mut::<Events>(log).unwrap().0.push(event);
    }

    #[test]
    fn routines_step_in_spawn_order_until_done() {
        let (mut world, log) = world_with_log();
        for label in ["a", "b"] {
            let mut steps = 0;
            world.spawn_routine(move |world: &mut World| {
                steps += 1;
                push(world, log, format!("{label}{steps}"));
                if steps == 2 {
                    Step::Done
                } else {
                    Step::Continue
                }
            });
        }

        world.tick(1.0);
        world.tick(2.0);
        world.tick(3.0);
        assert_eq!(
            world.get_component::<Events>(log).unwrap().0,
            vec!["a1", "b1", "a2", "b2"]
        );
        assert_eq!(world.routine_count(), 0);
    }

    struct MarkTick {
        log: crate::entity::EntityId,
    }

    impl crate::system::System for MarkTick {
        fn update(&mut self, world: &mut World) {
            let tag = format!("tick{}", world.tick_count());
            world.add_tag_immediate(self.log, &tag).unwrap();
            push(world, self.log, "system".to_owned());
        }

        fn priority(&self) -> i32 {
            -100
        }
    }

    #[test]
    fn routines_step_after_every_system() {
        let (mut world, log) = world_with_log();
        // Spawned before the system is added, and the system has the lowest
        // priority, so only the tick order puts the routine last.
        world.spawn_routine(move |world: &mut World| {
            let tag = format!("tick{}", world.tick_count());
            let seen = world.has_tag(log, &tag);
            push(world, log, format!("routine saw {tag}: {seen}"));
            Step::Continue
        });
        world.add_system(MarkTick { log });

        world.tick(1.0);
        world.tick(2.0);
        assert_eq!(
            world.get_component::<Events>(log).unwrap().0,
            vec![
                "system",
                "routine saw tick1: true",
                "system",
                "routine saw tick2: true",
            ]
        );
    }

    #[test]
    fn spawned_during_step_waits_for_next_tick() {
        let (mut world, log) = world_with_log();
        world.spawn_routine(move |world: &mut World| {
            push(world, log, "outer".to_owned());
            world.spawn_routine(move |world: &mut World| {
                push(world, log, "inner".to_owned());
                Step::Done
            });
            Step::Done
        });

        let report = world.tick(1.0);
        assert_eq!(report.routines_stepped, 1);
        assert_eq!(world.routine_count(), 1);
        world.tick(2.0);
        assert_eq!(
            world.get_component::<Events>(log).unwrap().0,
            vec!["outer", "inner"]
        );
    }

    #[test]
    fn cancel_is_immediate() {
        let (mut world, log) = world_with_log();
        let victim = world.spawn_routine(move |world: &mut World| {
            push(world, log, "victim".to_owned());
            Step::Continue
        });
        world.tick(1.0);
        world.cancel_routine(victim);
        world.tick(2.0);
        assert_eq!(world.get_component::<Events>(log).unwrap().0, vec!["victim"]);
        assert_eq!(world.routine_count(), 0);
    }

    #[test]
    fn cancel_from_an_earlier_routine_in_the_same_tick() {
        let (mut world, log) = world_with_log();
        let victim = RoutineId(1);
        world.spawn_routine(move |world: &mut World| {
            world.cancel_routine(victim);
            Step::Done
        });
        let spawned = world.spawn_routine(move |world: &mut World| {
            push(world, log, "victim".to_owned());
            Step::Continue
        });
        assert_eq!(spawned, victim);

        world.tick(1.0);
        assert!(world.get_component::<Events>(log).unwrap().0.is_empty());
        assert_eq!(world.routine_count(), 0);
    }

    #[test]
    fn delay_by_ticks_and_by_time() {
        let (mut world, log) = world_with_log();
        world.spawn_routine(Delay::ticks(3, move |world: &mut World| {
            let event = format!("ticks@{}", world.tick_count());
            push(world, log, event);
        }));
        world.spawn_routine(Delay::until(25.0, move |world: &mut World| {
            let event = format!("until@{}", world.time());
            push(world, log, event);
        }));

        for now in [10.0, 20.0, 30.0, 40.0] {
            world.tick(now);
        }
        assert_eq!(
            world.get_component::<Events>(log).unwrap().0,
            vec!["ticks@3", "until@30"]
        );
        assert_eq!(world.routine_count(), 0);
    }
}
