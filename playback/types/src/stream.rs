/*!
    Stream metadata used for pacing and timestamp conversion.
*/

use crate::{ChannelLayout, PixelFormat, Rational, SampleFormat};

/**
    Information about a video stream, as reported by the demuxer.
*/
#[derive(Clone, Debug, PartialEq)]
pub struct VideoStreamInfo {
    /// Index of the stream within its container.
    pub index: usize,
    /// Time base of the stream's timestamps.
    pub time_base: Rational,
    /// Guessed frame rate, `0/1` if unknown.
    pub frame_rate: Rational,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format the codec produces.
    pub format: PixelFormat,
    /// Whether the stream is a single attached picture (e.g. cover art).
    pub attached_pic: bool,
}

impl VideoStreamInfo {
    /**
        Returns the nominal duration of one frame in seconds, or 0 if
        the frame rate is unknown.
    */
    pub fn frame_duration(&self) -> f64 {
        if self.frame_rate.is_known() {
            self.frame_rate.invert().to_f64()
        } else {
            0.0
        }
    }
}

/**
    Information about an audio stream, as reported by the demuxer.
*/
#[derive(Clone, Debug, PartialEq)]
pub struct AudioStreamInfo {
    /// Index of the stream within its container.
    pub index: usize,
    /// Time base of the stream's timestamps.
    pub time_base: Rational,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel layout.
    pub channels: ChannelLayout,
    /// Sample format the codec produces.
    pub format: SampleFormat,
}
