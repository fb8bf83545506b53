/*!
    Shared control block read by every engine thread.
*/

use std::str::FromStr;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::messages::{MessageQueue, PlayerMessage};
use crate::monitor::Monitor;

/**
    Which clock the others are synchronized to.
*/
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    #[default]
    Audio,
    Video,
    #[serde(rename = "ext")]
    External,
}

impl FromStr for SyncType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "ext" => Ok(Self::External),
            _ => Err(()),
        }
    }
}

/**
    Which timestamp the video decoder trusts for a decoded frame.
*/
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PtsReorder {
    /// The codec's best-effort guess, robust against broken timestamps.
    #[default]
    BestEffort,
    /// The decode timestamp of the packet that produced the frame.
    DecodeOrder,
}

/**
    Plain values behind a [`PlayerState`].
*/
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFlags {
    pub abort_request: bool,
    pub pause_request: bool,
    pub sync_type: SyncType,
    /// Input is a live source; enables external clock speed adaptation.
    pub real_time: bool,
    /// `None` lets the engine decide (unbounded for live sources).
    pub infinite_buffer: Option<bool>,
    pub audio_disable: bool,
    pub video_disable: bool,
    pub display_disable: bool,
    pub frame_drop: bool,
    pub reorder_video_pts: PtsReorder,
    pub auto_exit: bool,
    /// Number of times to loop, 0 for forever.
    pub loop_count: i64,
    pub mute: bool,
    pub volume: f32,
    pub playback_rate: f32,
    pub playback_pitch: f32,
    pub seek_request: bool,
    pub seek_pos_ms: i64,
    pub duration_ms: i64,
    /// Stream start offset in milliseconds.
    pub start_time_ms: i64,
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self {
            abort_request: false,
            pause_request: false,
            sync_type: SyncType::Audio,
            real_time: false,
            infinite_buffer: None,
            audio_disable: false,
            video_disable: false,
            display_disable: false,
            frame_drop: true,
            reorder_video_pts: PtsReorder::BestEffort,
            auto_exit: false,
            loop_count: 1,
            mute: false,
            volume: 1.0,
            playback_rate: 1.0,
            playback_pitch: 1.0,
            seek_request: false,
            seek_pos_ms: 0,
            duration_ms: 0,
            start_time_ms: 0,
        }
    }
}

impl ControlFlags {
    /**
        Returns true when packet queues may grow without backpressure.
    */
    pub fn is_infinite_buffer(&self) -> bool {
        self.infinite_buffer.unwrap_or(self.real_time)
    }
}

/**
    Reference-counted, internally synchronized player state.

    Owned by the controller and handed to every decoder, the scheduler and
    the resampler. Every write wakes threads waiting on the state.
    Besides the flags it carries the process-wide codec lock and the
    outgoing [`MessageQueue`].
*/
#[derive(Debug, Default)]
pub struct PlayerState {
    flags: Monitor<ControlFlags>,
    codec_lock: Mutex<()>,
    messages: MessageQueue,
}

pub type SharedState = Arc<PlayerState>;

impl PlayerState {
    pub fn new() -> SharedState {
        Arc::new(Self::default())
    }

    /**
        Copy of every flag, for callers that need a consistent set.
    */
    pub fn snapshot(&self) -> ControlFlags {
        self.flags.lock().clone()
    }

    /**
        Mutate flags and wake waiters.
    */
    pub fn update<R>(&self, f: impl FnOnce(&mut ControlFlags) -> R) -> R {
        self.flags.update(f)
    }

    /**
        Restore defaults between sources.
    */
    pub fn reset(&self) {
        self.update(|flags| *flags = ControlFlags::default());
        self.messages.flush();
    }

    /**
        Serialize codec calls across all streams.
    */
    pub fn lock_codec(&self) -> MutexGuard<'_, ()> {
        self.codec_lock.lock()
    }

    pub fn messages(&self) -> &MessageQueue {
        &self.messages
    }

    pub fn post(&self, message: PlayerMessage) {
        self.messages.post(message);
    }

    pub fn is_aborted(&self) -> bool {
        self.flags.lock().abort_request
    }

    pub fn set_abort(&self, abort: bool) {
        self.update(|flags| flags.abort_request = abort);
    }

    pub fn is_paused(&self) -> bool {
        self.flags.lock().pause_request
    }

    pub fn set_paused(&self, paused: bool) {
        self.update(|flags| flags.pause_request = paused);
    }

    pub fn sync_type(&self) -> SyncType {
        self.flags.lock().sync_type
    }

    pub fn set_sync_type(&self, sync_type: SyncType) {
        self.update(|flags| flags.sync_type = sync_type);
    }

    pub fn frame_drop(&self) -> bool {
        self.flags.lock().frame_drop
    }

    pub fn set_frame_drop(&self, enabled: bool) {
        self.update(|flags| flags.frame_drop = enabled);
    }

    pub fn set_mute(&self, mute: bool) {
        self.update(|flags| flags.mute = mute);
    }

    pub fn set_volume(&self, volume: f32) {
        self.update(|flags| flags.volume = volume.clamp(0.0, 1.0));
    }

    pub fn set_playback_rate(&self, rate: f32) {
        self.update(|flags| flags.playback_rate = rate);
    }

    pub fn set_playback_pitch(&self, pitch: f32) {
        self.update(|flags| flags.playback_pitch = pitch);
    }

    /**
        Ask the reader to seek. Decoders hold off until [`PlayerState::finish_seek`].
    */
    pub fn request_seek(&self, position_ms: i64) {
        self.update(|flags| {
            flags.seek_request = true;
            flags.seek_pos_ms = position_ms;
        });
    }

    pub fn is_seek_requested(&self) -> bool {
        self.flags.lock().seek_request
    }

    /**
        Clear the seek request, wake decoders and report the outcome.
    */
    pub fn finish_seek(&self, ok: bool) {
        let position_ms = self.update(|flags| {
            flags.seek_request = false;
            flags.seek_pos_ms
        });
        debug!(position_ms, ok, "seek finished");
        self.post(PlayerMessage::SeekComplete { position_ms, ok });
    }

    /**
        Block while a seek is pending. Returns true if playback was aborted.
    */
    pub fn wait_while_seeking(&self) -> bool {
        self.flags
            .wait_while(|flags| flags.seek_request && !flags.abort_request)
            .abort_request
    }

    /**
        Apply a player option by name, as given on a command line or in a
        settings string.
    */
    pub fn set_option(&self, key: &str, value: &str) -> EngineResult<()> {
        let invalid = || EngineError::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
        };
        let int = || value.trim().parse::<i64>().map_err(|_| invalid());

        match key {
            "sync" => {
                let sync_type = value.parse::<SyncType>().map_err(|_| invalid())?;
                self.update(|flags| flags.sync_type = sync_type);
            }
            "an" => {
                let v = int()? != 0;
                self.update(|flags| flags.audio_disable = v);
            }
            "vn" => {
                let v = int()? != 0;
                self.update(|flags| flags.video_disable = v);
            }
            "nodisp" => {
                let v = int()? != 0;
                self.update(|flags| flags.display_disable = v);
            }
            "drp" => {
                let reorder = if int()? != 0 {
                    PtsReorder::BestEffort
                } else {
                    PtsReorder::DecodeOrder
                };
                self.update(|flags| flags.reorder_video_pts = reorder);
            }
            "autoexit" => {
                let v = int()? != 0;
                self.update(|flags| flags.auto_exit = v);
            }
            "framedrop" => {
                let v = int()? != 0;
                self.update(|flags| flags.frame_drop = v);
            }
            "infbuf" => {
                let v = int()?;
                self.update(|flags| flags.infinite_buffer = (v >= 0).then_some(v > 0));
            }
            "loop" => {
                let v = int()?;
                self.update(|flags| flags.loop_count = v);
            }
            "mute" => {
                let v = int()? != 0;
                self.update(|flags| flags.mute = v);
            }
            _ => return Err(EngineError::UnknownOption(key.to_string())),
        }
        debug!(key, value, "player option set");
        Ok(())
    }
}

static_assertions::assert_impl_all!(PlayerState: Send, Sync);

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::error::QueueError;

    #[test]
    fn defaults() {
        let state = PlayerState::new();
        let flags = state.snapshot();
        assert_eq!(flags.sync_type, SyncType::Audio);
        assert!(flags.frame_drop);
        assert_eq!(flags.reorder_video_pts, PtsReorder::BestEffort);
        assert_eq!(flags.playback_rate, 1.0);
        assert!(!flags.abort_request);
    }

    #[test]
    fn options_are_parsed() {
        let state = PlayerState::new();
        state.set_option("sync", "ext").unwrap();
        state.set_option("framedrop", "0").unwrap();
        state.set_option("drp", "0").unwrap();
        state.set_option("infbuf", "1").unwrap();
        state.set_option("nodisp", "1").unwrap();

        let flags = state.snapshot();
        assert_eq!(flags.sync_type, SyncType::External);
        assert!(!flags.frame_drop);
        assert_eq!(flags.reorder_video_pts, PtsReorder::DecodeOrder);
        assert_eq!(flags.infinite_buffer, Some(true));
        assert!(flags.display_disable);
    }

    #[test]
    fn infbuf_negative_means_auto() {
        let state = PlayerState::new();
        state.set_option("infbuf", "-1").unwrap();
        assert_eq!(state.snapshot().infinite_buffer, None);

        state.update(|flags| flags.real_time = true);
        assert!(state.snapshot().is_infinite_buffer());
    }

    #[test]
    fn bad_options_are_rejected() {
        let state = PlayerState::new();
        assert!(matches!(
            state.set_option("fps", "30"),
            Err(EngineError::UnknownOption(_))
        ));
        assert!(matches!(
            state.set_option("sync", "wall"),
            Err(EngineError::InvalidOption { .. })
        ));
        assert!(matches!(
            state.set_option("framedrop", "yes"),
            Err(EngineError::InvalidOption { .. })
        ));
    }

    #[test]
    fn reset_restores_defaults() {
        let state = PlayerState::new();
        state.set_sync_type(SyncType::Video);
        state.set_abort(true);
        state.reset();
        assert_eq!(state.snapshot(), ControlFlags::default());
    }

    #[test]
    fn finish_seek_wakes_waiter_and_posts() {
        let state = PlayerState::new();
        state.request_seek(5000);
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_while_seeking())
        };
        thread::sleep(Duration::from_millis(20));
        state.finish_seek(true);

        assert!(!waiter.join().unwrap());
        assert!(!state.is_seek_requested());
        assert_eq!(
            state.messages().get(false),
            Ok(PlayerMessage::SeekComplete {
                position_ms: 5000,
                ok: true
            })
        );
        assert_eq!(state.messages().get(false), Err(QueueError::Empty));
    }

    #[test]
    fn abort_releases_seek_waiter() {
        let state = PlayerState::new();
        state.request_seek(0);
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_while_seeking())
        };
        thread::sleep(Duration::from_millis(20));
        state.set_abort(true);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn volume_is_clamped() {
        let state = PlayerState::new();
        state.set_volume(3.0);
        assert_eq!(state.snapshot().volume, 1.0);
    }
}
