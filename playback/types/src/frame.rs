/*!
    Decoded frame types.
*/

use crate::{ChannelLayout, PixelFormat, Pts, Rational, SampleFormat};

/**
    A decoded video frame.

    Pixel data is tightly packed: packed formats keep all data in a single
    buffer, planar formats store their planes back to back.
*/
#[derive(Clone, Debug, Default)]
pub struct VideoFrame {
    /// Raw pixel data.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of the data.
    pub format: PixelFormat,
    /// Presentation timestamp as reported by the codec.
    pub pts: Option<Pts>,
    /// Decode timestamp of the packet that produced this frame.
    pub pkt_dts: Option<Pts>,
    /// Codec's best guess of the presentation timestamp.
    pub best_effort_pts: Option<Pts>,
    /// Time base for interpreting the timestamps.
    pub time_base: Rational,
}

impl VideoFrame {
    /**
        Create a new video frame.

        Both the decode and best-effort timestamps start out equal to `pts`.
    */
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        pts: Option<Pts>,
        time_base: Rational,
    ) -> Self {
        Self {
            data,
            width,
            height,
            format,
            pts,
            pkt_dts: pts,
            best_effort_pts: pts,
            time_base,
        }
    }

    /**
        Split a planar YUV 4:2:0 frame into its Y, U and V planes
        along with their row pitches.

        Returns `None` for other formats or if the buffer is too short.
    */
    pub fn yuv420_planes(&self) -> Option<([&[u8]; 3], [usize; 3])> {
        if self.format != PixelFormat::Yuv420p {
            return None;
        }
        let w = self.width as usize;
        let h = self.height as usize;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);
        let y_len = w * h;
        let c_len = cw * ch;
        if self.data.len() < y_len + 2 * c_len {
            return None;
        }
        let (y, rest) = self.data.split_at(y_len);
        let (u, rest) = rest.split_at(c_len);
        let v = &rest[..c_len];
        Some(([y, u, v], [w, cw, cw]))
    }
}

/**
    A decoded audio frame.

    Contains raw sample data in the format specified by `format`.
    Samples are interleaved for multi-channel audio.
*/
#[derive(Clone, Debug)]
pub struct AudioFrame {
    /**
        Raw sample data as bytes.

        Interpret according to `format` and `channels`.
        For interleaved stereo F32: [L0, R0, L1, R1, ...]
    */
    pub data: Vec<u8>,
    /**
        Number of samples per channel.
    */
    pub samples: usize,
    /**
        Sample rate in Hz.
    */
    pub sample_rate: u32,
    /**
        Channel layout.
    */
    pub channels: ChannelLayout,
    /**
        Sample format.
    */
    pub format: SampleFormat,
    /**
        Presentation timestamp (None for frames without timing).
    */
    pub pts: Option<Pts>,
    /**
        Time base for interpreting the PTS.
    */
    pub time_base: Rational,
}

impl AudioFrame {
    /**
        Create a new audio frame.
    */
    pub fn new(
        data: Vec<u8>,
        samples: usize,
        sample_rate: u32,
        channels: ChannelLayout,
        format: SampleFormat,
        pts: Option<Pts>,
        time_base: Rational,
    ) -> Self {
        Self {
            data,
            samples,
            sample_rate,
            channels,
            format,
            pts,
            time_base,
        }
    }

    /**
        Returns the presentation time in seconds, if PTS is set.
    */
    pub fn pts_seconds(&self) -> Option<f64> {
        self.pts.map(|pts| pts.to_seconds(self.time_base))
    }
}

// Ensure frames are Send + Sync
static_assertions::assert_impl_all!(VideoFrame: Send, Sync);
static_assertions::assert_impl_all!(AudioFrame: Send, Sync);
