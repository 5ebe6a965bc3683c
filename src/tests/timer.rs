use crate::mocks::TestClock;
use crate::timer::Timer;
use embedded_time::duration::Microseconds;

fn elapsed_micros(timer: &Timer<TestClock>, clock: &TestClock) -> Option<Microseconds<u64>> {
    timer
        .elapsed(clock)
        .unwrap()
        .map(|generic| Microseconds::<u64>::try_from(generic).unwrap())
}

#[test]
fn test_stopped_timer_never_fires() {
    let clock = TestClock::new();
    let timer: Timer<TestClock> = Timer::new(Microseconds(0));

    assert!(timer.is_stopped());
    assert!(!timer.is_timed_out(&clock).unwrap());
    assert!(elapsed_micros(&timer, &clock).is_none());
}

#[test]
fn test_zero_timeout_fires_immediately_once_started() {
    let clock = TestClock::new();
    let mut timer = Timer::new(Microseconds(0));

    timer.start(&clock).unwrap();

    assert!(timer.is_timed_out(&clock).unwrap());
}

#[test]
fn test_timeout_fires_strictly_after_the_deadline() {
    let clock = TestClock::new();
    let mut timer = Timer::new(Microseconds(1_000));

    timer.start(&clock).unwrap();
    assert!(!timer.is_timed_out(&clock).unwrap());

    clock.advance(1_000);
    assert!(!timer.is_timed_out(&clock).unwrap());

    clock.advance(1);
    assert!(timer.is_timed_out(&clock).unwrap());
}

#[test]
fn test_stop_clears_elapsed_time() {
    let clock = TestClock::new();
    let mut timer = Timer::new(Microseconds(500));

    timer.start(&clock).unwrap();
    clock.advance(300);
    assert_eq!(elapsed_micros(&timer, &clock), Some(Microseconds(300)));

    timer.stop();
    assert!(timer.is_stopped());
    assert!(elapsed_micros(&timer, &clock).is_none());
    assert!(!timer.is_timed_out(&clock).unwrap());
}

#[test]
fn test_restart_resets_the_origin() {
    let clock = TestClock::new();
    let mut timer = Timer::new(Microseconds(500));

    timer.start(&clock).unwrap();
    clock.advance(400);
    timer.start(&clock).unwrap();
    clock.advance(200);

    assert_eq!(elapsed_micros(&timer, &clock), Some(Microseconds(200)));
    assert!(!timer.is_timed_out(&clock).unwrap());
}

#[test]
fn test_set_timeout_applies_to_a_running_timer() {
    let clock = TestClock::new();
    let mut timer = Timer::new(Microseconds(10_000));

    timer.start(&clock).unwrap();
    clock.advance(600);
    assert!(!timer.is_timed_out(&clock).unwrap());

    timer.set_timeout(Microseconds(500));
    assert!(timer.is_timed_out(&clock).unwrap());
}
