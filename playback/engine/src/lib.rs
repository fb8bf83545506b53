/*!
    Queueing, clock and synchronization engine for media playback.

    A reader thread outside this crate demuxes packets into the per-stream
    [`PacketQueue`]s owned by the decoders. The [`VideoDecoder`] runs its own
    thread and fills a [`FrameQueue`]; the [`AudioDecoder`] is pulled from
    the audio device callback through the [`AudioResampler`]. [`MediaSync`]
    presents video frames against the master clock chosen in the shared
    [`PlayerState`].

    # Threads

    - the video decode thread, started by [`MediaDecoder::start`]
    - the presentation thread, started by [`MediaSync::start`]
    - the platform audio callback, which calls [`AudioResampler::service_callback`]

    Every blocking wait in the engine wakes up when the player is aborted.

    # Collaborators

    - [`CodecContext`] - send/receive codec, see the `ffmpeg` feature

    With the `ffmpeg` feature, [`SampleConverter`] runs on libswresample;
    without it, a built-in linear interpolator does the conversion.
    - [`VideoDevice`] - render target for presented frames
    - [`AudioDeviceSpec`] - format negotiated by the audio device
*/

mod codec;
mod config;
mod decoder;
mod device;
mod error;
mod frame_queue;
mod messages;
mod monitor;
mod packet_queue;
mod resampler;
mod state;
mod sync;

#[cfg(feature = "ffmpeg")]
mod ffmpeg;

pub use codec::CodecContext;
pub use config::{EngineConfig, FRAME_QUEUE_SIZE};
pub use decoder::{
    AudioDecoder, AudioSource, EndOfStream, FrameStatus, MediaDecoder, VideoDecoder,
    reader_at_end_of_stream, reader_should_wait,
};
pub use device::{AudioDeviceSpec, VideoDevice};
pub use error::{CodecError, EngineError, EngineResult, QueueError};
pub use frame_queue::{Frame, FrameQueue, FrameView, WritableFrame};
pub use messages::{MessageQueue, PlayerMessage};
pub use monitor::Monitor;
pub use packet_queue::PacketQueue;
pub use resampler::{AudioResampler, OlaStretch, SampleConverter, TimeStretch};
pub use state::{ControlFlags, PlayerState, PtsReorder, SharedState, SyncType};
pub use sync::{MasterClock, MediaSync, RefreshOutcome, SyncClocks};

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegAudioCodec, FfmpegVideoCodec};

pub use playback_types as types;
