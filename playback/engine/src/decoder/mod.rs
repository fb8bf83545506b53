/*!
    Decode loops that drain packet queues through a codec.

    Both decoders own a [`PacketQueue`] and a codec, and share the same
    queue, flush and backpressure contract through [`MediaDecoder`].
    [`AudioDecoder`] is pulled by the audio callback; [`VideoDecoder`] runs
    its own thread and fills a [`FrameQueue`].
*/

mod audio;
mod video;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use playback_types::Packet;

use crate::codec::CodecContext;
use crate::config::EngineConfig;
use crate::error::{EngineResult, QueueError};
use crate::frame_queue::FrameQueue;
use crate::packet_queue::PacketQueue;
use crate::state::SharedState;
use crate::sync::MasterClock;

pub use audio::{AudioDecoder, AudioSource, FrameStatus};
pub use video::VideoDecoder;

/**
    Contract shared by the audio and video decoders.
*/
pub trait MediaDecoder: Send + Sync {
    /**
        Open the packet queue and, for video, spawn the decode thread.
    */
    fn start(&self) -> EngineResult<()>;

    /**
        Abort every wait and, for video, join the decode thread.
    */
    fn stop(&self);

    /**
        Drop queued packets and the codec's buffered state together.
    */
    fn flush(&self);

    fn push_packet(&self, packet: Packet) -> Result<(), QueueError>;

    fn packet_count(&self) -> usize;

    fn has_enough_packets(&self) -> bool;

    /**
        Bytes held by the packet queue.
    */
    fn memory_size(&self) -> usize;

    fn stream_index(&self) -> usize;

    /**
        Frame queue fed by this decoder, if it has one.
    */
    fn frame_queue(&self) -> Option<&FrameQueue> {
        None
    }

    /**
        Clock that decode-time frame dropping compares against.
    */
    fn set_master_clock(&self, _clock: Option<Arc<dyn MasterClock>>) {}
}

/**
    State common to both decoders.
*/
pub(crate) struct DecoderCore<C> {
    pub(crate) state: SharedState,
    pub(crate) packets: PacketQueue,
    pub(crate) codec: Mutex<C>,
    pub(crate) stream_index: usize,
    pub(crate) attached_pic: bool,
    pub(crate) min_frames: usize,
}

impl<C: CodecContext> DecoderCore<C> {
    pub(crate) fn new(
        state: SharedState,
        codec: C,
        stream_index: usize,
        attached_pic: bool,
        config: &EngineConfig,
    ) -> Self {
        Self {
            state,
            packets: PacketQueue::new(),
            codec: Mutex::new(codec),
            stream_index,
            attached_pic,
            min_frames: config.min_frames,
        }
    }

    pub(crate) fn has_enough_packets(&self) -> bool {
        self.attached_pic || self.packets.has_enough_packets(self.min_frames)
    }

    /**
        Drop queued packets and codec buffers under the codec lock, so a
        concurrent decode attempt never sees one without the other.
    */
    pub(crate) fn flush(&self) {
        self.flush_with(|| {});
    }

    /**
        Flush, running `discard` under the same codec lock so decoder-local
        state is dropped atomically with the queue and codec.
    */
    pub(crate) fn flush_with(&self, discard: impl FnOnce()) {
        let _codec_guard = self.state.lock_codec();
        self.packets.flush();
        self.codec.lock().flush();
        discard();
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.state.is_aborted() || self.packets.is_aborted()
    }
}

/**
    Returns true when the reader should pause instead of pushing more packets.

    That is when buffering is bounded and either the queues together exceed
    `max_queue_bytes` or every present stream has enough packets.
*/
pub fn reader_should_wait(
    state: &SharedState,
    audio: Option<&dyn MediaDecoder>,
    video: Option<&dyn MediaDecoder>,
    config: &EngineConfig,
) -> bool {
    let flags = state.snapshot();
    if flags.is_infinite_buffer() {
        return false;
    }
    let audio = audio.filter(|_| !flags.audio_disable);
    let video = video.filter(|_| !flags.video_disable);
    let bytes = audio.map_or(0, |d| d.memory_size()) + video.map_or(0, |d| d.memory_size());
    bytes > config.max_queue_bytes
        || (audio.is_none_or(|d| d.has_enough_packets())
            && video.is_none_or(|d| d.has_enough_packets()))
}

/**
    What the reader should do after the demuxer reports end of file.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfStream {
    /// Buffered media is still playing, playback is paused, or nothing is configured.
    Wait,
    /// A seek back to the stream start has been requested; read the source again.
    Restart { position_ms: i64 },
    /// Playback finished and the player should shut down.
    Exit,
}

/**
    Decide how the reader continues at end of file.

    Only once every enabled stream has played out its packets (and video
    its decoded frames) does the `loop` option restart playback, consuming
    one loop if it is counted, or `autoexit` end it. A loop count of 0
    loops forever and 1 plays once.
*/
pub fn reader_at_end_of_stream(
    state: &SharedState,
    audio: Option<&dyn MediaDecoder>,
    video: Option<&dyn MediaDecoder>,
) -> EndOfStream {
    let flags = state.snapshot();
    let audio = audio.filter(|_| !flags.audio_disable);
    let video = video.filter(|_| !flags.video_disable);
    let drained = audio.is_none_or(|d| d.packet_count() == 0)
        && video.is_none_or(|d| {
            d.packet_count() == 0 && d.frame_queue().is_none_or(|frames| frames.size() == 0)
        });
    if flags.pause_request || !drained {
        return EndOfStream::Wait;
    }

    let restart = state.update(|flags| match flags.loop_count {
        1 => false,
        0 => true,
        _ => {
            flags.loop_count -= 1;
            true
        }
    });
    if restart {
        let position_ms = flags.start_time_ms.max(0);
        debug!(position_ms, loops_left = state.snapshot().loop_count, "end of stream, looping");
        state.request_seek(position_ms);
        return EndOfStream::Restart { position_ms };
    }
    if flags.auto_exit {
        debug!("end of stream, exiting");
        return EndOfStream::Exit;
    }
    EndOfStream::Wait
}
