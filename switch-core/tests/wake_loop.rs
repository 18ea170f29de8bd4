mod support;

use switch_core::config::resolve;
use switch_core::scheduler::{WakeFlag, WakeScheduler};

use support::{MockTimer, boot};

#[test]
fn scheduler_dispatches_one_tick_per_wake() {
    let flag = WakeFlag::new();
    let mut scheduler = WakeScheduler::new(MockTimer::new(&flag, 0), &flag);
    let mut controller = boot(resolve(true, false), 900);

    for _ in 0..7_031 {
        scheduler.run_once(&mut controller);
    }

    assert_eq!(controller.now().ticks(), 7_031);
    assert!(!controller.load_level().is_energized());
    assert!(!scheduler.timer_mut().armed);
}

#[test]
fn spurious_resumes_do_not_count_as_ticks() {
    let flag = WakeFlag::new();
    let mut scheduler = WakeScheduler::new(MockTimer::new(&flag, 2), &flag);
    let mut controller = boot(resolve(true, false), 900);

    for _ in 0..50 {
        let event = scheduler.run_once(&mut controller);
        assert_eq!(event.spurious_resumes, 2);
    }

    assert_eq!(controller.now().ticks(), 50);
    assert_eq!(controller.counters().duty, 50);
    assert_eq!(scheduler.timer_mut().suspends, 150);
    assert_eq!(scheduler.spurious_total(), 100);
}

#[test]
fn stale_flag_does_not_cut_the_next_sleep_short() {
    let flag = WakeFlag::new();
    flag.signal();
    let mut scheduler = WakeScheduler::new(MockTimer::new(&flag, 3), &flag);
    let mut controller = boot(resolve(true, false), 900);

    let event = scheduler.run_once(&mut controller);

    assert_eq!(event.spurious_resumes, 3);
    assert_eq!(scheduler.timer_mut().suspends, 4);
    assert!(!flag.is_pending());
    assert_eq!(controller.now().ticks(), 1);
}
