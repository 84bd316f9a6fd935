//! Per-logic-thread frame clock. Published at the start of every frame by
//! the owning thread; game code reads it through the module functions, so
//! there is no global mutable time.

use std::cell::Cell;
use std::time::Duration;

#[derive(Copy, Clone)]
struct ClockState {
    delta: f32,
    fixed_delta: f32,
    time: f64,
    frame: u64,
}

impl ClockState {
    const fn zero() -> ClockState {
        ClockState { delta: 0.0, fixed_delta: 0.0, time: 0.0, frame: 0 }
    }
}

thread_local! {
    static CLOCK: Cell<ClockState> = Cell::new(ClockState::zero());
}

/// Seconds elapsed between the previous frame and this one.
#[inline]
pub fn delta_time() -> f32 {
    CLOCK.with(|clock| clock.get().delta)
}

/// The fixed integration step of the owning logic thread, in seconds.
#[inline]
pub fn fixed_delta_time() -> f32 {
    CLOCK.with(|clock| clock.get().fixed_delta)
}

/// Seconds elapsed since the owning logic thread started.
#[inline]
pub fn time() -> f64 {
    CLOCK.with(|clock| clock.get().time)
}

/// Frames completed by the owning logic thread.
#[inline]
pub fn frame_count() -> u64 {
    CLOCK.with(|clock| clock.get().frame)
}

/// Re-initializes the clock at thread start.
pub fn reset(fixed_step: Duration) {
    CLOCK.with(|clock| {
        clock.set(ClockState {
            delta: 0.0,
            fixed_delta: fixed_step.as_secs_f32(),
            time: 0.0,
            frame: 0,
        })
    });
}

/// Publishes the new frame: delta for this frame, accumulated time and the
/// incremented frame counter.
pub fn publish(delta: Duration) {
    CLOCK.with(|clock| {
        let mut state = clock.get();
        state.delta = delta.as_secs_f32();
        state.time += f64::from(state.delta);
        state.frame += 1;
        clock.set(state);
    });
}
