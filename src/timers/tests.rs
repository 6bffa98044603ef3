use super::*;

#[test]
fn div_8_boundary_case_leaves_remainder() {
    let mut timers = Timers::new();
    let mut ic = InterruptController::new();

    timers.timer_mut(2).write_mode(1 << 8); // clock_source = Alternate (SysClock/8)
    timers.clock(2, 15, &mut ic);

    assert_eq!(timers.timer(2).counter(), 1);
    assert_eq!(timers.timer(2).div_8_remainder, 7);
}

#[test]
fn sync_mode_two_resets_on_blank_rising_edge() {
    let mut timer = Timer::new(TimerId::Timer0);
    let mut ic = InterruptController::new();

    timer.write_mode(1 | (2 << 1)); // sync_enabled, sync_mode = 2
    timer.clock(100, &mut ic);
    assert_eq!(timer.counter(), 100);

    timer.update_blank(true);
    assert_eq!(timer.counter(), 0);

    timer.clock(50, &mut ic);
    timer.update_blank(false);
    timer.update_blank(true);
    assert_eq!(timer.counter(), 0);
}

#[test]
fn pulse_mode_fires_every_crossing_in_repeat_mode() {
    let mut timer = Timer::new(TimerId::Timer0);
    let mut ic = InterruptController::new();

    timer.write_target(10);
    timer.write_mode((1 << 4) | (1 << 6)); // irq_on_target, repeat, pulse

    timer.clock(11, &mut ic);
    assert!(ic.is_set(IrqSource::Timer0));
    ic.write_status(0);

    timer.clock(11, &mut ic);
    assert!(ic.is_set(IrqSource::Timer0));
}

#[test]
fn one_shot_mode_fires_only_once_until_mode_rewrite() {
    let mut timer = Timer::new(TimerId::Timer0);
    let mut ic = InterruptController::new();

    timer.write_target(10);
    timer.write_mode(1 << 4); // irq_on_target, one-shot (repeat bit clear), pulse

    timer.clock(11, &mut ic);
    assert!(ic.is_set(IrqSource::Timer0));
    ic.write_status(0);

    timer.clock(11, &mut ic);
    assert!(!ic.is_set(IrqSource::Timer0));

    timer.write_mode(1 << 4);
    timer.clock(11, &mut ic);
    assert!(ic.is_set(IrqSource::Timer0));
}

#[test]
fn toggle_mode_fires_on_every_other_crossing() {
    let mut timer = Timer::new(TimerId::Timer0);
    let mut ic = InterruptController::new();

    timer.write_target(10);
    timer.write_mode((1 << 4) | (1 << 6) | (1 << 7)); // irq_on_target, repeat, toggle

    timer.clock(11, &mut ic);
    assert!(ic.is_set(IrqSource::Timer0));
    ic.write_status(0);

    timer.clock(11, &mut ic);
    assert!(!ic.is_set(IrqSource::Timer0));
    ic.write_status(0);

    timer.clock(11, &mut ic);
    assert!(ic.is_set(IrqSource::Timer0));
}

#[test]
fn reset_at_max_wraps_past_0xffff() {
    let mut timer = Timer::new(TimerId::Timer0);
    let mut ic = InterruptController::new();

    timer.write_counter(MAX_COUNTER - 2);
    timer.clock(5, &mut ic);

    assert_eq!(timer.counter(), 2);
    assert!(timer.reached_max_value);
}

#[test]
fn reached_flags_auto_clear_on_mode_read() {
    let mut timer = Timer::new(TimerId::Timer0);
    let mut ic = InterruptController::new();

    timer.write_counter(MAX_COUNTER);
    timer.clock(1, &mut ic);
    assert!(timer.reached_max_value);

    let mode = timer.read_mode();
    assert!(mode & (1 << 12) != 0);
    assert!(!timer.reached_max_value);

    let mode_again = timer.read_mode();
    assert!(mode_again & (1 << 12) == 0);
}
