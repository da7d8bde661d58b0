// End-to-end runs of the host surface against simulated actuators

mod common;

use biped_motion_runtime::bus::{BusEvent, SimConnector, CONTROLLER_ID};
use biped_motion_runtime::motion::{GaitState, ModuleId, RobotMode};
use biped_motion_runtime::Robot;
use common::{wait_ticks, Fixture, SIT_POSITION};

#[test]
fn walk_with_centered_joystick_then_stop() {
    let fixture = Fixture::new();
    let (robot, _bus) = fixture.robot();
    assert_eq!(robot.port().as_deref(), Some("/dev/ttyUSB0"));
    assert!(robot.startup());
    assert!(robot.set_walking(true));

    let control = robot.control().unwrap();
    for _ in 0..100 {
        assert!(robot.set_velocity_from_joystick(0, 0));
        wait_ticks(&control, 1);
    }
    // Small stick noise stays inside the dead-band
    assert!(robot.set_velocity_from_joystick(4, -6));

    let status = robot.status().unwrap();
    assert_eq!(status.mode, RobotMode::Walking);
    assert_eq!(status.amplitudes.forward, 0.0);
    assert_eq!(status.amplitudes.lateral, 0.0);
    assert_eq!(status.amplitudes.turn, 0.0);
    assert_eq!(status.velocity_accumulator, 0.0);

    let (cycle, before) = {
        let state = control.core().lock();
        (state.walking.cycle_ticks() as u64, state.stats.ticks)
    };
    assert!(robot.set_walking(false));
    let after = control.core().lock().stats.ticks;
    // Stops at the next cycle boundary, allowing for wake-up latency
    assert!(after - before <= cycle + 5, "took {} ticks", after - before);

    let state = control.core().lock();
    assert_eq!(state.walking.state(), GaitState::Stopped);
    assert_eq!(state.mode, RobotMode::Idle);
    assert_eq!(state.ownership.enabled_for(ModuleId::Action).len(), 20);
}

#[test]
fn sit_while_walking() {
    let fixture = Fixture::new();
    let (robot, bus) = fixture.robot();
    assert!(robot.set_walking(true));
    assert!(robot.walk_forward(30.0));
    wait_ticks(&robot.control().unwrap(), 50);

    assert_eq!(robot.play_action(15), 0);

    let status = robot.status().unwrap();
    assert_eq!(status.mode, RobotMode::Idle);
    assert_eq!(status.gait, GaitState::Stopped);
    for id in 1..=20 {
        assert_eq!(bus.position(id), Some(SIT_POSITION), "actuator {}", id);
    }
    assert!(!robot.walk_forward(10.0));
}

#[test]
fn no_controller_on_any_port_then_retry() {
    let fixture = Fixture::new();
    let connector = SimConnector::new(20);
    let bus = connector.bus();
    bus.set_failing(CONTROLLER_ID, true);
    let robot = Robot::new(connector, fixture.options());

    assert!(!robot.initialize());
    assert!(!robot.is_initialized());
    assert!(bus.events().is_empty());
    assert_eq!(robot.play_action(15), -1);

    bus.set_failing(CONTROLLER_ID, false);
    assert!(robot.initialize());
    assert_eq!(robot.port().as_deref(), Some("/dev/ttyUSB0"));
    assert_eq!(robot.play_action(15), 0);
}

#[test]
fn ports_are_each_probed_once() {
    let fixture = Fixture::new();
    let connector = SimConnector::new(20)
        .with_failing_port("/dev/ttyUSB0")
        .with_failing_port("/dev/ttyUSB1");
    let bus = connector.bus();
    let robot = Robot::new(connector, fixture.options());

    assert!(!robot.initialize());
    assert!(bus.events().is_empty());
}

#[test]
fn falls_back_to_second_port() {
    let fixture = Fixture::new();
    let connector = SimConnector::new(20).with_failing_port("/dev/ttyUSB0");
    let robot = Robot::new(connector, fixture.options());

    assert!(robot.initialize());
    assert_eq!(robot.port().as_deref(), Some("/dev/ttyUSB1"));
}

#[test]
fn shutdown_sits_before_power_off() {
    let fixture = Fixture::new();
    let (robot, bus) = fixture.robot();
    assert!(robot.set_walking(true));
    wait_ticks(&robot.control().unwrap(), 20);

    assert!(robot.shutdown());
    assert_eq!(robot.status().unwrap().mode, RobotMode::PoweredOff);

    let events = bus.events();
    let off = events
        .iter()
        .rposition(|e| *e == BusEvent::Power(false))
        .unwrap();
    assert_eq!(off, events.len() - 1);
    let last_target = events[..off]
        .iter()
        .rev()
        .find_map(|e| match e {
            BusEvent::Target { position, .. } => Some(*position),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_target, SIT_POSITION);
    assert!(!bus.is_powered());
}

#[test]
fn diagnostics_through_host_surface() {
    let fixture = Fixture::new();
    let (robot, bus) = fixture.robot();

    assert_eq!(robot.check_actuators(), 0);
    bus.set_failing(17, true);
    assert_eq!(robot.check_actuators(), 17);

    bus.set_voltage(121);
    assert_eq!(robot.read_battery_level(), 121);

    assert!(robot.set_actuator_target(20, 2300));
    assert_eq!(robot.get_actuator_target(20), 2300);
    assert_eq!(robot.get_actuator_target(25), -1);
}

#[test]
fn play_by_name() {
    let fixture = Fixture::new();
    let (robot, bus) = fixture.robot();

    assert_eq!(robot.play_action_by_name("WAVE"), 0);
    assert_eq!(bus.position(4), Some(1900));
    assert_eq!(robot.play_action_by_name("moonwalk"), -1);
}
