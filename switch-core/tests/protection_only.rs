mod support;

use switch_core::config::{FeatureMode, resolve};
use switch_core::duty::DutyState;

use support::{boot, run_ticks};

#[test]
fn duty_machine_never_switches_in_protection_only_mode() {
    let mut controller = boot(resolve(true, true), 900);
    assert_eq!(controller.config().feature_mode, FeatureMode::ProtectionOnly);

    let edges = run_ticks(&mut controller, 3 * (7_031 + 3_516));

    assert!(edges.is_empty(), "protection-only load toggled: {edges:?}");
    assert_eq!(controller.duty_state(), DutyState::On);
    assert!(controller.load_level().is_energized());
    assert!(controller.load_mut().high);
}

#[test]
fn monitor_still_cuts_load_in_protection_only_mode() {
    let mut controller = boot(resolve(false, true), 900);
    run_ticks(&mut controller, 20_000);

    controller.sense_mut().raw = 600;
    let edges = run_ticks(&mut controller, 110);

    assert_eq!(edges.len(), 1);
    assert!(!edges[0].1);
    assert!(controller.is_latched());
    assert!(!controller.load_mut().high);
}
