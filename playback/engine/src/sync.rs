/*!
    Presentation scheduler and the three-clock model.

    [`SyncClocks`] holds the audio, video and external clocks and resolves
    the master clock from the player's sync type. [`MediaSync`] runs the
    video presentation loop: it decides, once per tick, whether the next
    frame is due, late enough to drop, or should wait.
*/

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use playback_types::{MediaClock, wall_time};

use crate::config::EngineConfig;
use crate::decoder::MediaDecoder;
use crate::device::VideoDevice;
use crate::error::{EngineError, EngineResult};
use crate::frame_queue::FrameQueue;
use crate::messages::PlayerMessage;
use crate::monitor::Monitor;
use crate::state::{ControlFlags, PlayerState, SharedState, SyncType};

/**
    A clock other components can synchronize against.
*/
pub trait MasterClock: Send + Sync {
    /// Current value in seconds, NaN if unknown.
    fn master_clock(&self) -> f64;
}

impl MasterClock for MediaClock {
    fn master_clock(&self) -> f64 {
        self.get_clock()
    }
}

/**
    The audio, video and external clocks of one player.
*/
#[derive(Debug)]
pub struct SyncClocks {
    audio: MediaClock,
    video: MediaClock,
    external: MediaClock,
    state: SharedState,
}

impl SyncClocks {
    pub fn new(state: SharedState) -> Self {
        Self {
            audio: MediaClock::new(),
            video: MediaClock::new(),
            external: MediaClock::new(),
            state,
        }
    }

    pub fn audio(&self) -> &MediaClock {
        &self.audio
    }

    pub fn video(&self) -> &MediaClock {
        &self.video
    }

    pub fn external(&self) -> &MediaClock {
        &self.external
    }

    /**
        Value of the clock selected by the player's sync type, at wall time `now`.
    */
    pub fn master_clock_at(&self, now: f64) -> f64 {
        match self.state.sync_type() {
            SyncType::Audio => self.audio.get_clock_at(now),
            SyncType::Video => self.video.get_clock_at(now),
            SyncType::External => self.external.get_clock_at(now),
        }
    }

    /**
        Anchor the audio clock and let the external clock follow it.
    */
    pub fn update_audio_clock(&self, pts: f64, time: f64) {
        self.audio.set_clock_at(pts, time);
        self.external.sync_to_slave(&self.audio);
    }

    pub fn update_external_clock(&self, pts: f64) {
        self.external.set_clock(pts);
    }

    /**
        How far the audio clock is ahead of the master clock.
    */
    pub fn audio_diff_clock(&self) -> f64 {
        let now = wall_time();
        self.audio.get_clock_at(now) - self.master_clock_at(now)
    }

    pub fn set_paused(&self, paused: bool) {
        self.audio.set_paused(paused);
        self.video.set_paused(paused);
        self.external.set_paused(paused);
    }
}

impl MasterClock for SyncClocks {
    fn master_clock(&self) -> f64 {
        self.master_clock_at(wall_time())
    }
}

static_assertions::assert_impl_all!(SyncClocks: Send, Sync, MasterClock);

/**
    What one scheduler tick did.
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshOutcome {
    /// Seconds until the scheduler should tick again.
    pub remaining: f64,
    /// Timestamp of the frame promoted to "shown", if any.
    pub presented: Option<f64>,
    /// Frames discarded because their successor was already due.
    pub dropped: usize,
}

#[derive(Debug)]
struct FrameTiming {
    frame_timer: f64,
    timer_refresh: bool,
    force_refresh: bool,
    max_frame_duration: f64,
}

#[derive(Default)]
struct Attached {
    video: Option<Arc<dyn MediaDecoder>>,
    audio: Option<Arc<dyn MediaDecoder>>,
}

#[derive(Debug)]
struct RunState {
    abort: bool,
    exited: bool,
}

struct SyncInner {
    state: SharedState,
    config: EngineConfig,
    clocks: Arc<SyncClocks>,
    decoders: Mutex<Attached>,
    timing: Mutex<FrameTiming>,
    run: Monitor<RunState>,
    device: Mutex<Option<Box<dyn VideoDevice>>>,
}

/**
    Video presentation scheduler.

    Idle until [`MediaSync::start`] attaches decoders; with a video decoder
    attached it runs a dedicated thread ticking at least every
    `refresh_rate` seconds until [`MediaSync::stop`]. Audio-only playback
    needs no thread, the audio callback reports position instead.
*/
pub struct MediaSync {
    inner: Arc<SyncInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MediaSync {
    pub fn new(state: SharedState, config: EngineConfig) -> Self {
        let max_frame_duration = config.max_frame_duration;
        Self {
            inner: Arc::new(SyncInner {
                clocks: Arc::new(SyncClocks::new(Arc::clone(&state))),
                state,
                config,
                decoders: Mutex::new(Attached::default()),
                timing: Mutex::new(FrameTiming {
                    frame_timer: 0.0,
                    timer_refresh: true,
                    force_refresh: false,
                    max_frame_duration,
                }),
                run: Monitor::new(RunState {
                    abort: true,
                    exited: true,
                }),
                device: Mutex::new(None),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn clocks(&self) -> &Arc<SyncClocks> {
        &self.inner.clocks
    }

    pub fn set_video_device(&self, device: Box<dyn VideoDevice>) {
        *self.inner.device.lock() = Some(device);
    }

    /**
        Attach decoders without starting the presentation thread.
    */
    pub fn attach(
        &self,
        video: Option<Arc<dyn MediaDecoder>>,
        audio: Option<Arc<dyn MediaDecoder>>,
    ) {
        *self.inner.decoders.lock() = Attached { video, audio };
    }

    /**
        Attach decoders and, if there is a video decoder, start presenting.

        Streams turned off with the `an`/`vn` options are left detached.
    */
    pub fn start(
        &self,
        video: Option<Arc<dyn MediaDecoder>>,
        audio: Option<Arc<dyn MediaDecoder>>,
    ) -> EngineResult<()> {
        let flags = self.inner.state.snapshot();
        let video = video.filter(|_| !flags.video_disable);
        let audio = audio.filter(|_| !flags.audio_disable);
        let has_video = video.is_some();
        self.attach(video, audio);

        let mut thread = self.thread.lock();
        if !has_video || thread.is_some() {
            return Ok(());
        }
        self.inner.run.update(|run| {
            run.abort = false;
            run.exited = false;
        });
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("media-sync".into())
            .spawn(move || inner.run())
            .map_err(|source| {
                self.inner.run.update(|run| run.exited = true);
                EngineError::Spawn {
                    name: "media sync",
                    source,
                }
            })?;
        *thread = Some(handle);
        debug!("media sync started");
        Ok(())
    }

    /**
        Stop presenting and join the scheduler thread.
    */
    pub fn stop(&self) {
        self.inner.run.update(|run| run.abort = true);
        drop(self.inner.run.wait_while(|run| !run.exited));
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("media sync thread panicked");
            }
            debug!("media sync stopped");
        }
    }

    /**
        Run one scheduler tick at wall time `now`.
    */
    pub fn refresh_video_at(&self, now: f64) -> RefreshOutcome {
        self.inner.refresh_video(now)
    }

    /**
        Reset the frame timer on the next tick, e.g. after a seek or resume.
    */
    pub fn refresh_video_timer(&self) {
        self.inner.timing.lock().timer_refresh = true;
    }

    /**
        Redraw the shown frame on the next tick even while paused.
    */
    pub fn request_refresh(&self) {
        self.inner.timing.lock().force_refresh = true;
    }

    /**
        Longest gap between two frames still treated as continuous.

        Use a short value for inputs with timestamp discontinuities.
    */
    pub fn set_max_frame_duration(&self, duration: f64) {
        self.inner.timing.lock().max_frame_duration = duration;
    }

    pub fn update_audio_clock(&self, pts: f64, time: f64) {
        self.inner.clocks.update_audio_clock(pts, time);
    }

    pub fn update_external_clock(&self, pts: f64) {
        self.inner.clocks.update_external_clock(pts);
    }

    pub fn audio_diff_clock(&self) -> f64 {
        self.inner.clocks.audio_diff_clock()
    }

    pub fn master_clock(&self) -> f64 {
        self.inner.clocks.master_clock()
    }

    /**
        Nudge the external clock speed according to how full the packet queues are.
    */
    pub fn check_external_clock_speed(&self) {
        self.inner.check_external_clock_speed();
    }

    /**
        Playback position in milliseconds, relative to the stream start.

        While a seek is pending this is the seek target.
    */
    pub fn current_position_ms(&self) -> i64 {
        let flags = self.inner.state.snapshot();
        if flags.seek_request {
            return flags.seek_pos_ms;
        }
        position_ms(&self.inner.clocks, &flags)
    }
}

impl Drop for MediaSync {
    fn drop(&mut self) {
        self.inner.run.update(|run| run.abort = true);
        if let Some(handle) = self.thread.get_mut().take() {
            let _ = handle.join();
        }
    }
}

impl SyncInner {
    fn run(&self) {
        debug!("media sync thread started");
        let mut remaining = 0.0;
        loop {
            if self.run.lock().abort || self.state.is_aborted() {
                break;
            }
            if remaining > 0.0 {
                let timeout = Duration::from_secs_f64(remaining);
                drop(self.run.wait_while_for(|run| !run.abort, timeout));
            }
            remaining = self.config.refresh_rate;

            let force_refresh = self.timing.lock().force_refresh;
            if !self.state.is_paused() || force_refresh {
                remaining = self.refresh_video(wall_time()).remaining;
            }
        }

        if let Some(device) = self.device.lock().as_mut() {
            device.terminate();
        }
        self.run.update(|run| run.exited = true);
        debug!("media sync thread exited");
    }

    fn attached(&self) -> (Option<Arc<dyn MediaDecoder>>, Option<Arc<dyn MediaDecoder>>) {
        let decoders = self.decoders.lock();
        (decoders.video.clone(), decoders.audio.clone())
    }

    fn refresh_video(&self, now: f64) -> RefreshOutcome {
        let mut outcome = RefreshOutcome {
            remaining: self.config.refresh_rate,
            presented: None,
            dropped: 0,
        };
        let flags = self.state.snapshot();
        if !flags.pause_request && flags.real_time && flags.sync_type == SyncType::External {
            self.check_external_clock_speed();
        }

        let (video, audio) = self.attached();
        let Some(frames) = video.as_deref().and_then(|video| video.frame_queue()) else {
            return outcome;
        };

        let mut timing = self.timing.lock();
        loop {
            if self.state.is_aborted() {
                break;
            }

            let view = frames.view();
            if view.size() == 0 {
                break;
            }
            let last = (view.last().pts, view.last().duration, view.last().serial);
            let (current_pts, current_duration, current_serial) =
                (view.current().pts, view.current().duration, view.current().serial);
            let next = (view.size() > 1).then(|| (view.next().pts, view.next().serial));
            drop(view);

            // First frame after a flush starts a fresh timeline
            let (last_pts, last_duration, last_serial) = last;
            if timing.timer_refresh || last_serial != current_serial {
                timing.frame_timer = now;
                timing.timer_refresh = false;
            }
            if self.state.is_paused() {
                break;
            }

            let max_frame_duration = timing.max_frame_duration;
            let gap = if last_serial == current_serial {
                frame_gap(last_pts, last_duration, current_pts, max_frame_duration)
            } else {
                0.0
            };
            let delay = self.compute_target_delay(gap, now);

            if timing.frame_timer.is_nan() || now < timing.frame_timer {
                timing.frame_timer = now;
            }
            if now < timing.frame_timer + delay {
                outcome.remaining = (timing.frame_timer + delay - now).min(outcome.remaining);
                break;
            }

            timing.frame_timer += delay;
            if delay > 0.0 && now - timing.frame_timer > self.config.sync_threshold_max {
                timing.frame_timer = now;
            }

            if !current_pts.is_nan() {
                self.clocks.video.set_clock_at(current_pts, now);
                self.clocks.external.sync_to_slave(&self.clocks.video);
            }

            if let Some((next_pts, next_serial)) = next {
                let duration = if next_serial == current_serial {
                    frame_gap(current_pts, current_duration, next_pts, max_frame_duration)
                } else {
                    0.0
                };
                let may_drop = flags.frame_drop && flags.sync_type != SyncType::Video;
                if may_drop && now > timing.frame_timer + duration {
                    trace!(pts = current_pts, "late video frame dropped before display");
                    frames.pop();
                    outcome.dropped += 1;
                    continue;
                }
            }

            frames.pop();
            timing.force_refresh = true;
            outcome.presented = Some(current_pts);
            break;
        }

        if flags.sync_type == SyncType::Video {
            post_position(&self.state, &self.clocks, &flags);
        }

        let render = !flags.display_disable && timing.force_refresh && frames.show_index();
        timing.force_refresh = false;
        drop(timing);

        if render {
            self.render_video(frames, &flags, audio.is_none());
        }
        outcome
    }

    /**
        Adjust the nominal frame delay so video converges on the master clock.

        Video behind the master shortens the delay, video ahead lengthens it,
        and only a corrected delay is clamped to `sync_threshold_max`.
    */
    fn compute_target_delay(&self, delay: f64, now: f64) -> f64 {
        if self.state.sync_type() == SyncType::Video {
            return delay;
        }
        let config = &self.config;
        let diff = self.clocks.video.get_clock_at(now) - self.clocks.master_clock_at(now);
        if diff.is_nan() || diff.abs() >= config.no_sync_threshold {
            return delay;
        }

        let sync_threshold = delay.clamp(config.sync_threshold_min, config.sync_threshold_max);
        let corrected = if diff <= -sync_threshold {
            (delay + diff).max(0.0)
        } else if diff >= sync_threshold && delay > config.frame_dup_threshold {
            delay + diff
        } else if diff >= sync_threshold {
            2.0 * delay
        } else {
            return delay;
        };
        trace!(delay, corrected, diff, "frame delay corrected");

        if corrected.abs() > config.sync_threshold_max {
            if corrected > 0.0 {
                config.sync_threshold_max
            } else {
                0.0
            }
        } else {
            corrected
        }
    }

    fn check_external_clock_speed(&self) {
        let (video, audio) = self.attached();
        let config = &self.config;
        let external = &self.clocks.external;
        let video_packets = video.as_deref().map(|d| d.packet_count());
        let audio_packets = audio.as_deref().map(|d| d.packet_count());
        let speed = external.speed();

        let starved = |n: Option<usize>| n.is_some_and(|n| n <= config.external_clock_min_frames);
        let filled = |n: Option<usize>| n.is_none_or(|n| n > config.external_clock_max_frames);

        if starved(video_packets) || starved(audio_packets) {
            external.set_speed(
                (speed - config.external_clock_speed_step).max(config.external_clock_speed_min),
            );
        } else if filled(video_packets) && filled(audio_packets) {
            external.set_speed(
                (speed + config.external_clock_speed_step).min(config.external_clock_speed_max),
            );
        } else if speed != 1.0 {
            let toward_one = (1.0 - speed) / (1.0 - speed).abs();
            external.set_speed(speed + config.external_clock_speed_step * toward_one);
        }
    }

    /**
        Hand the shown frame to the device. Pixels are uploaded once per frame,
        later calls only re-render.
    */
    fn render_video(&self, frames: &FrameQueue, flags: &ControlFlags, report_position: bool) {
        {
            let mut device = self.device.lock();
            let Some(device) = device.as_mut() else {
                return;
            };
            let mut view = frames.view();
            let frame = view.last_mut();
            let Some(picture) = frame.frame.as_ref() else {
                return;
            };

            if !frame.uploaded {
                if let Some((planes, pitches)) = picture.yuv420_planes() {
                    device.init_texture(picture.width, picture.height, picture.format);
                    device.update_yuv(planes, pitches);
                } else if picture.format.is_packed_rgba() {
                    device.init_texture(picture.width, picture.height, picture.format);
                    device.update_argb(&picture.data, picture.width as usize * 4);
                } else {
                    warn!(format = ?picture.format, "video frame not uploaded, unsupported pixel format");
                    return;
                }
                frame.uploaded = true;
            }

            device.set_timestamp(if frame.pts.is_nan() { 0.0 } else { frame.pts });
            device.request_render();
        }

        if report_position {
            post_position(&self.state, &self.clocks, flags);
        }
    }
}

/**
    Master clock in milliseconds relative to the stream start, or the seek
    position while the master clock is unknown. Never negative.
*/
pub(crate) fn position_ms(clocks: &SyncClocks, flags: &ControlFlags) -> i64 {
    let start_diff = flags.start_time_ms.max(0);
    let clock = clocks.master_clock();
    let position = if clock.is_nan() {
        flags.seek_pos_ms
    } else {
        (clock * 1000.0) as i64
    };
    if position < 0 || position < start_diff {
        0
    } else {
        position - start_diff
    }
}

pub(crate) fn post_position(state: &PlayerState, clocks: &SyncClocks, flags: &ControlFlags) {
    let position_ms = if flags.duration_ms < 0 {
        0
    } else {
        position_ms(clocks, flags)
    };
    state.post(PlayerMessage::CurrentPosition {
        position_ms,
        duration_ms: flags.duration_ms,
    });
}

/**
    Display time of the frame at `pts` given its successor at `next_pts`,
    falling back to the frame's own estimate when the gap is implausible.
*/
fn frame_gap(pts: f64, duration: f64, next_pts: f64, max_frame_duration: f64) -> f64 {
    let gap = next_pts - pts;
    if gap.is_nan() || gap <= 0.0 || gap > max_frame_duration {
        duration
    } else {
        gap
    }
}
