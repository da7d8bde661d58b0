// Fixed-period motion scheduler
//
// One dedicated thread ticks every period: run the modules, merge their
// output, write it to the bus. A tick holds the state lock from compute to
// the last bus write, so control operations only ever observe state between
// ticks. Lock order is always state, then bus.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::joint::{JointTargets, MAX_POSITION, NUM_JOINTS};
use super::state::MotionState;
use crate::bus::ActuatorBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Motion scheduler is not running")]
pub struct SchedulerStopped;

/// Tick timing and bus health counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub overruns: u64,
    pub bus_errors: u64,
    pub max_tick_us: u64,
}

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub targets: JointTargets,
    pub written: usize,
    pub failed: Vec<u8>,
}

/// Motion state plus the bus, shared by the scheduler thread and control callers
pub struct MotionCore {
    state: Mutex<MotionState>,
    changed: Condvar,
    bus: Mutex<Box<dyn ActuatorBus>>,
    offsets: [i16; NUM_JOINTS as usize + 1],
}

impl MotionCore {
    pub fn new(
        state: MotionState,
        bus: Box<dyn ActuatorBus>,
        offsets: impl Fn(u8) -> i16,
    ) -> Arc<Self> {
        let mut table = [0i16; NUM_JOINTS as usize + 1];
        for (id, slot) in table.iter_mut().enumerate().skip(1) {
            *slot = offsets(id as u8);
        }

        Arc::new(Self {
            state: Mutex::new(state),
            changed: Condvar::new(),
            bus: Mutex::new(bus),
            offsets: table,
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, MotionState> {
        self.state.lock()
    }

    /// Run `f` with exclusive bus access. Callers holding the state guard
    /// may call this; the reverse order is never allowed.
    pub fn with_bus<R>(&self, f: impl FnOnce(&mut dyn ActuatorBus) -> R) -> R {
        let mut bus = self.bus.lock();
        f(bus.as_mut())
    }

    /// Wake everyone blocked in [`MotionCore::wait_until`]
    pub fn notify(&self) {
        self.changed.notify_all();
    }

    /// Block until `done` holds, re-checking after every tick.
    ///
    /// Fails if the scheduler is not running, since nothing would ever
    /// change the state.
    pub fn wait_until(
        &self,
        state: &mut MutexGuard<'_, MotionState>,
        mut done: impl FnMut(&MotionState) -> bool,
    ) -> Result<(), SchedulerStopped> {
        loop {
            if done(&**state) {
                return Ok(());
            }
            if !state.scheduler_running {
                return Err(SchedulerStopped);
            }
            self.changed.wait(state);
        }
    }

    /// Device value for a logical position
    pub fn apply_offset(&self, id: u8, position: u16) -> u16 {
        let offset = self.offsets.get(id as usize).copied().unwrap_or(0);
        (position as i32 + offset as i32).clamp(0, MAX_POSITION as i32) as u16
    }

    /// Logical position for a device value
    pub fn remove_offset(&self, id: u8, value: u16) -> u16 {
        let offset = self.offsets.get(id as usize).copied().unwrap_or(0);
        (value as i32 - offset as i32).clamp(0, MAX_POSITION as i32) as u16
    }

    /// Compute and transmit one tick
    pub fn tick(&self) -> TickReport {
        let mut state = self.state.lock();
        let targets = state.tick();
        state.stats.ticks += 1;

        let mut report = TickReport::default();
        if state.powered && !targets.is_empty() {
            let mut bus = self.bus.lock();
            for (id, position) in targets.iter() {
                match bus.write_target(id, self.apply_offset(id, position)) {
                    Ok(()) => report.written += 1,
                    Err(e) => {
                        warn!("Tick {}: {}", state.stats.ticks, e);
                        report.failed.push(id);
                    }
                }
            }
        }
        state.stats.bus_errors += report.failed.len() as u64;
        report.targets = targets;

        drop(state);
        self.notify();
        report
    }

    fn record_timing(&self, elapsed: Duration, overrun: bool) {
        let mut state = self.state.lock();
        let us = elapsed.as_micros() as u64;
        state.stats.max_tick_us = state.stats.max_tick_us.max(us);
        if overrun {
            state.stats.overruns += 1;
        }
    }

    fn set_running(&self, running: bool) {
        self.state.lock().scheduler_running = running;
        self.notify();
    }
}

/// Handle to the scheduler thread. Dropping it stops the thread.
pub struct MotionScheduler {
    core: Arc<MotionCore>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MotionScheduler {
    /// Spawn the tick thread
    pub fn start(core: Arc<MotionCore>, period: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        core.set_running(true);

        let thread_core = Arc::clone(&core);
        let thread_stop = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name("motion-scheduler".to_string())
            .spawn(move || run(&thread_core, &thread_stop, period));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                core.set_running(false);
                return Err(e);
            }
        };

        info!("Motion scheduler started: {}ms period", period.as_millis());
        Ok(Self {
            core,
            stop,
            handle: Some(handle),
        })
    }

    pub fn core(&self) -> &Arc<MotionCore> {
        &self.core
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Motion scheduler thread panicked");
            }
            info!("Motion scheduler stopped");
        }
        self.core.set_running(false);
    }
}

impl Drop for MotionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tick loop. A late tick schedules the next one immediately instead of
/// trying to catch up on missed periods.
fn run(core: &MotionCore, stop: &AtomicBool, period: Duration) {
    let mut next = Instant::now();

    while !stop.load(Ordering::Acquire) {
        let started = Instant::now();
        core.tick();
        let elapsed = started.elapsed();

        next += period;
        let now = Instant::now();
        let overrun = now >= next;
        core.record_timing(elapsed, overrun);

        if overrun {
            debug!("Tick overran its period ({:?})", elapsed);
            next = now;
        } else {
            thread::sleep(next - now);
        }
    }

    core.set_running(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusEvent, SimBus};
    use crate::config::WalkingConfig;
    use crate::motion::ModuleId;
    use crate::motion::action::ActionPlayer;
    use crate::motion::joint::all_joints;
    use crate::motion::page::{Page, PageTable, Step};
    use crate::motion::walking::GaitController;

    const TICK: Duration = Duration::from_millis(8);

    fn make_core(bus: &SimBus, offsets: impl Fn(u8) -> i16) -> Arc<MotionCore> {
        let pose: JointTargets = [(1, 1000), (2, 1100), (3, 1200)].into_iter().collect();
        let pages = vec![Page::empty(), Page::new("p", vec![Step::new(pose, 1, 0)])];
        let mut state = MotionState::new(
            ActionPlayer::new(Arc::new(PageTable::new(pages)), TICK),
            GaitController::new(WalkingConfig::default(), TICK),
        );
        state.ownership.enable_all(ModuleId::Action, all_joints()).unwrap();
        state.powered = true;
        MotionCore::new(state, Box::new(bus.clone()), offsets)
    }

    #[test]
    fn test_tick_writes_with_offsets() {
        let bus = SimBus::new(20);
        let core = make_core(&bus, |id| if id == 2 { -100 } else { 0 });
        core.lock().action.start(1).unwrap();

        let report = core.tick();
        assert_eq!(report.written, 3);
        assert_eq!(
            bus.events(),
            vec![
                BusEvent::Target { id: 1, position: 1000 },
                BusEvent::Target { id: 2, position: 1000 },
                BusEvent::Target { id: 3, position: 1200 },
            ]
        );
        assert_eq!(core.lock().positions.get(2), Some(1100));
    }

    #[test]
    fn test_bus_error_skips_only_that_actuator() {
        let bus = SimBus::new(20);
        bus.set_failing(2, true);
        let core = make_core(&bus, |_| 0);
        core.lock().action.start(1).unwrap();

        let report = core.tick();
        assert_eq!(report.written, 2);
        assert_eq!(report.failed, vec![2]);
        assert_eq!(core.lock().stats.bus_errors, 1);
        assert_eq!(bus.position(3), Some(1200));
    }

    #[test]
    fn test_unpowered_tick_does_not_transmit() {
        let bus = SimBus::new(20);
        let core = make_core(&bus, |_| 0);
        {
            let mut state = core.lock();
            state.powered = false;
            state.action.start(1).unwrap();
        }

        let report = core.tick();
        assert_eq!(report.targets.len(), 3);
        assert_eq!(report.written, 0);
        assert!(bus.events().is_empty());
    }

    #[test]
    fn test_offset_clamps_to_device_range() {
        let bus = SimBus::new(20);
        let core = make_core(&bus, |_| 200);
        assert_eq!(core.apply_offset(1, 4000), MAX_POSITION);
        assert_eq!(core.remove_offset(1, 100), 0);
        assert_eq!(core.remove_offset(1, 1200), 1000);
    }

    #[test]
    fn test_wait_wakes_on_tick_and_fails_after_stop() {
        let bus = SimBus::new(20);
        let core = make_core(&bus, |_| 0);
        let mut scheduler = MotionScheduler::start(Arc::clone(&core), Duration::from_millis(1)).unwrap();
        assert!(scheduler.is_running());

        {
            let mut state = core.lock();
            state.action.start(1).unwrap();
            core.wait_until(&mut state, |s| !s.action.is_running()).unwrap();
            assert!(state.stats.ticks >= 1);
        }

        scheduler.stop();
        let mut state = core.lock();
        state.action.start(1).unwrap();
        assert_eq!(
            core.wait_until(&mut state, |s| !s.action.is_running()),
            Err(SchedulerStopped)
        );
    }
}
