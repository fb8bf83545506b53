/*!
    Shared vocabulary types for the playback engine.

    This crate defines the types that cross the boundary between the engine
    and its collaborators (demuxer, codec, output devices). It has no
    dependency on FFmpeg, so codec adapters and test doubles can depend on it
    without pulling in any bindings.

    # Core Types

    - [`Rational`] - Rational numbers for time bases and frame rates
    - [`Pts`] and [`MediaDuration`] - Timestamps in time_base units
    - [`VideoFrame`] and [`AudioFrame`] - Decoded frame data
    - [`Packet`] - Encoded packet data, including the null packet used as a drain marker
    - [`StreamType`] - Video or audio stream type

    # Format Types

    - [`PixelFormat`] - Video pixel formats
    - [`SampleFormat`] - Audio sample formats
    - [`ChannelLayout`] - Audio channel layouts

    # Stream Information

    - [`VideoStreamInfo`] and [`AudioStreamInfo`] - Stream metadata used for pacing

    # Clock

    - [`MediaClock`] - Drift-corrected playback clock
    - [`wall_time`] - Monotonic wall time in seconds, shared by every clock

    # Error Handling

    - [`Error`] and [`Result`] - Common error types

*/

mod clock;
mod error;
mod format;
mod frame;
mod packet;
mod rational;
mod stream;
mod timestamp;

pub use clock::{MediaClock, NO_SYNC_THRESHOLD, wall_time};
pub use error::{Error, Result};
pub use format::{ChannelLayout, PixelFormat, SampleFormat};
pub use frame::{AudioFrame, VideoFrame};
pub use packet::{Packet, StreamType};
pub use rational::Rational;
pub use stream::{AudioStreamInfo, VideoStreamInfo};
pub use timestamp::{MediaDuration, Pts};
