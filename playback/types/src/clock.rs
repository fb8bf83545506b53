/*!
    Drift-corrected playback clock.
*/

use std::sync::OnceLock;
use std::time::Instant;

use parking_lot::Mutex;

/**
    Clocks further apart than this (in seconds) are considered unrelated,
    and [`MediaClock::sync_to_slave`] snaps instead of leaving them be.
*/
pub const NO_SYNC_THRESHOLD: f64 = 10.0;

/**
    Monotonic wall time in seconds.

    All clocks in the process measure from the same origin, so values from
    different clocks and threads can be compared and subtracted directly.
*/
pub fn wall_time() -> f64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now).elapsed().as_secs_f64()
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    pts: f64,
    pts_drift: f64,
    last_updated: f64,
    speed: f64,
    paused: bool,
}

impl ClockState {
    fn read_at(&self, now: f64) -> f64 {
        if self.paused {
            self.pts
        } else {
            self.pts_drift + now - (now - self.last_updated) * (1.0 - self.speed)
        }
    }

    fn set_at(&mut self, pts: f64, time: f64) {
        self.pts = pts;
        self.last_updated = time;
        self.pts_drift = pts - time;
    }
}

/**
    A playback clock that free-runs with wall time between updates.

    Each update anchors the clock at a known timestamp; reads extrapolate
    from that anchor, scaled by the clock's `speed`. A clock that has never
    been set reads as NaN, and callers treat NaN as "no correction this cycle".

    Three instances exist per player (audio, video, external), and any of
    them may act as the master clock.
*/
#[derive(Debug)]
pub struct MediaClock {
    state: Mutex<ClockState>,
}

impl MediaClock {
    /**
        Create an unset clock running at normal speed.
    */
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                pts: f64::NAN,
                pts_drift: f64::NAN,
                last_updated: wall_time(),
                speed: 1.0,
                paused: false,
            }),
        }
    }

    /**
        Read the clock at the current wall time.
    */
    pub fn get_clock(&self) -> f64 {
        self.get_clock_at(wall_time())
    }

    /**
        Read the clock at wall time `now`.

        While paused this returns the frozen timestamp.
    */
    pub fn get_clock_at(&self, now: f64) -> f64 {
        self.state.lock().read_at(now)
    }

    /**
        Anchor the clock at `pts` as of the current wall time.
    */
    pub fn set_clock(&self, pts: f64) {
        self.set_clock_at(pts, wall_time());
    }

    /**
        Anchor the clock at `pts` as of wall time `time`.
    */
    pub fn set_clock_at(&self, pts: f64, time: f64) {
        self.state.lock().set_at(pts, time);
    }

    /**
        Change the playback rate without making the clock jump.
    */
    pub fn set_speed(&self, speed: f64) {
        let now = wall_time();
        let mut state = self.state.lock();
        let current = state.read_at(now);
        state.set_at(current, now);
        state.speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    /**
        Freeze or resume the clock.

        Resuming re-anchors at the frozen timestamp so the paused interval
        is not counted.
    */
    pub fn set_paused(&self, paused: bool) {
        let now = wall_time();
        let mut state = self.state.lock();
        if state.paused && !paused {
            let pts = state.pts;
            state.set_at(pts, now);
        }
        state.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /**
        Snap this clock to `slave` if `slave` is valid and this clock is
        either unset or more than [`NO_SYNC_THRESHOLD`] away from it.
    */
    pub fn sync_to_slave(&self, slave: &MediaClock) {
        let now = wall_time();
        let clock = self.get_clock_at(now);
        let slave_clock = slave.get_clock_at(now);
        if !slave_clock.is_nan()
            && (clock.is_nan() || (clock - slave_clock).abs() > NO_SYNC_THRESHOLD)
        {
            self.set_clock_at(slave_clock, now);
        }
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

// Clocks are shared between the sync thread, the decoder thread and the audio callback
static_assertions::assert_impl_all!(MediaClock: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-3;

    #[test]
    fn unset_clock_is_nan() {
        assert!(MediaClock::new().get_clock().is_nan());
    }

    #[test]
    fn clock_free_runs_at_normal_speed() {
        let clock = MediaClock::new();
        clock.set_clock_at(10.0, 100.0);
        assert!((clock.get_clock_at(105.0) - 15.0).abs() < TOLERANCE);
    }

    #[test]
    fn clock_free_runs_at_half_speed() {
        let clock = MediaClock::new();
        clock.set_speed(0.5);
        clock.set_clock_at(10.0, 100.0);
        assert!((clock.get_clock_at(105.0) - 12.5).abs() < TOLERANCE);
    }

    #[test]
    fn paused_clock_is_frozen() {
        let clock = MediaClock::new();
        clock.set_clock_at(10.0, 100.0);
        clock.set_paused(true);
        assert_eq!(clock.get_clock_at(200.0), 10.0);
    }

    #[test]
    fn resume_does_not_count_paused_time() {
        let clock = MediaClock::new();
        clock.set_clock(3.0);
        clock.set_paused(true);
        std::thread::sleep(std::time::Duration::from_millis(30));
        clock.set_paused(false);
        let value = clock.get_clock();
        assert!(value >= 3.0 && value < 3.02, "clock jumped to {value}");
    }

    #[test]
    fn speed_change_does_not_jump() {
        let clock = MediaClock::new();
        clock.set_clock(5.0);
        let before = clock.get_clock();
        clock.set_speed(2.0);
        let after = clock.get_clock();
        assert!((after - before).abs() < 0.01);
        assert_eq!(clock.speed(), 2.0);
    }

    #[test]
    fn sync_to_slave_snaps_unset_clock() {
        let external = MediaClock::new();
        let audio = MediaClock::new();
        audio.set_clock(42.0);
        external.sync_to_slave(&audio);
        assert!((external.get_clock() - 42.0).abs() < 0.01);
    }

    #[test]
    fn sync_to_slave_ignores_unset_slave() {
        let external = MediaClock::new();
        external.set_clock(1.0);
        external.sync_to_slave(&MediaClock::new());
        assert!((external.get_clock() - 1.0).abs() < 0.01);
    }

    #[test]
    fn sync_to_slave_leaves_nearby_clock_alone() {
        let external = MediaClock::new();
        let audio = MediaClock::new();
        external.set_clock_at(20.0, 0.0);
        audio.set_clock_at(25.0, 0.0);
        external.sync_to_slave(&audio);
        assert_eq!(external.get_clock_at(0.0), 20.0);
    }

    #[test]
    fn sync_to_slave_is_idempotent() {
        let external = MediaClock::new();
        let audio = MediaClock::new();
        external.set_clock(0.0);
        audio.set_clock(50.0);
        audio.set_paused(true);

        external.set_paused(true);
        external.sync_to_slave(&audio);
        let first = external.get_clock();
        external.sync_to_slave(&audio);
        let second = external.get_clock();

        assert_eq!(first, 50.0);
        assert_eq!(first, second);
    }
}
