/*!
    Sample format, channel and rate conversion through libswresample.
*/

use std::fmt;

use ffmpeg_next::{
    ffi,
    format::{Sample, sample::Type as SampleType},
    software::resampling,
    util::frame::audio::Audio as FfmpegAudioFrame,
};
use tracing::warn;

use playback_types::{AudioFrame, ChannelLayout, Error, SampleFormat};

use crate::error::{EngineError, EngineResult};
use crate::ffmpeg::{channel_layout_to_ffmpeg, sample_format_to_ffmpeg};

/// Output room beyond the nominal rate ratio, taken up by compensation.
const OUTPUT_HEADROOM: usize = 256;

/**
    Converts decoded frames of one source format into interleaved S16
    at the output rate and channel count, using an swr context.

    Build a new converter when the source parameters change; see
    [`SampleConverter::matches`].
*/
pub struct SampleConverter {
    context: resampling::Context,
    format: SampleFormat,
    layout: ChannelLayout,
    in_rate: u32,
    out_rate: u32,
    out_channels: u16,
}

impl SampleConverter {
    pub fn new(
        format: SampleFormat,
        layout: ChannelLayout,
        in_rate: u32,
        out_rate: u32,
        out_channels: u16,
    ) -> EngineResult<Self> {
        if in_rate == 0 || out_rate == 0 || layout.channels() == 0 || out_channels == 0 {
            return Err(EngineError::InvalidAudioParams(format!(
                "cannot convert {in_rate} Hz x{} to {out_rate} Hz x{out_channels}",
                layout.channels()
            )));
        }
        let context = open_context(format, layout.channels(), in_rate, out_rate, out_channels)?;
        Ok(Self {
            context,
            format,
            layout,
            in_rate,
            out_rate,
            out_channels,
        })
    }

    /**
        Returns true if `frame` can be fed to this converter.
    */
    pub fn matches(&self, frame: &AudioFrame) -> bool {
        frame.format == self.format
            && frame.channels == self.layout
            && frame.sample_rate == self.in_rate
    }

    /**
        Output `delta` extra samples (fewer if negative) spread over the next
        `distance` output samples.
    */
    pub fn set_compensation(&mut self, delta: i64, distance: usize) {
        let delta = delta.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        let distance = distance.min(i32::MAX as usize) as i32;
        // SAFETY: the context pointer is owned by `self.context` and valid for its lifetime.
        let ret = unsafe { ffi::swr_set_compensation(self.context.as_mut_ptr(), delta, distance) };
        if ret < 0 {
            warn!(delta, distance, "swr_set_compensation failed: {}", ffmpeg_next::Error::from(ret));
        }
    }

    /**
        Convert one frame, appending interleaved S16 samples to `output`.
    */
    pub fn convert(&mut self, frame: &AudioFrame, output: &mut Vec<i16>) {
        if frame.samples == 0 {
            return;
        }
        if let Err(e) = self.run(frame, output) {
            warn!("audio conversion failed: {e}");
        }
    }

    fn run(&mut self, frame: &AudioFrame, output: &mut Vec<i16>) -> Result<(), ffmpeg_next::Error> {
        let in_layout =
            channel_layout_to_ffmpeg(self.layout.channels()).ok_or(ffmpeg_next::Error::InvalidData)?;
        let out_layout =
            channel_layout_to_ffmpeg(self.out_channels).ok_or(ffmpeg_next::Error::InvalidData)?;

        let mut input = FfmpegAudioFrame::new(sample_format_to_ffmpeg(self.format), frame.samples, in_layout);
        input.set_rate(self.in_rate);
        let plane = input.data_mut(0);
        let len = frame.data.len().min(plane.len());
        plane[..len].copy_from_slice(&frame.data[..len]);

        let capacity =
            frame.samples * self.out_rate as usize / self.in_rate as usize + OUTPUT_HEADROOM;
        let mut converted =
            FfmpegAudioFrame::new(Sample::I16(SampleType::Packed), capacity, out_layout);
        self.context.run(&input, &mut converted)?;

        let bytes = converted.samples() * self.out_channels as usize * 2;
        output.extend(
            converted.data(0)[..bytes]
                .chunks_exact(2)
                .map(bytemuck::pod_read_unaligned::<i16>),
        );
        Ok(())
    }

    /**
        Drop filter history and any pending compensation.
    */
    pub fn reset(&mut self) {
        match open_context(
            self.format,
            self.layout.channels(),
            self.in_rate,
            self.out_rate,
            self.out_channels,
        ) {
            Ok(context) => self.context = context,
            Err(e) => warn!("audio converter reset failed: {e}"),
        }
    }
}

fn open_context(
    format: SampleFormat,
    in_channels: u16,
    in_rate: u32,
    out_rate: u32,
    out_channels: u16,
) -> EngineResult<resampling::Context> {
    let unsupported = |channels: u16| Error::unsupported_format(format!("{channels} channels"));
    let in_layout = channel_layout_to_ffmpeg(in_channels).ok_or_else(|| unsupported(in_channels))?;
    let out_layout =
        channel_layout_to_ffmpeg(out_channels).ok_or_else(|| unsupported(out_channels))?;
    let context = resampling::Context::get(
        sample_format_to_ffmpeg(format),
        in_layout,
        in_rate,
        Sample::I16(SampleType::Packed),
        out_layout,
        out_rate,
    )
    .map_err(|e| Error::codec(format!("swr context: {e}")))?;
    Ok(context)
}

impl fmt::Debug for SampleConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleConverter")
            .field("format", &self.format)
            .field("layout", &self.layout)
            .field("in_rate", &self.in_rate)
            .field("out_rate", &self.out_rate)
            .field("out_channels", &self.out_channels)
            .finish_non_exhaustive()
    }
}

// SAFETY: the swr context is only touched through `&mut self`, and the
// converter lives behind the resampler's output mutex.
unsafe impl Send for SampleConverter {}

#[cfg(test)]
mod tests {
    use playback_types::{Pts, Rational};

    use super::*;

    fn s16_frame(samples: &[i16], layout: ChannelLayout, rate: u32) -> AudioFrame {
        AudioFrame::new(
            bytemuck::cast_slice::<i16, u8>(samples).to_vec(),
            samples.len() / layout.channels() as usize,
            rate,
            layout,
            SampleFormat::S16,
            Some(Pts(0)),
            Rational::new(1, rate as i32),
        )
    }

    fn mono(in_rate: u32, out_rate: u32) -> SampleConverter {
        SampleConverter::new(SampleFormat::S16, ChannelLayout::Mono, in_rate, out_rate, 1).unwrap()
    }

    #[test]
    fn same_format_passes_through() {
        let input: Vec<i16> = (0..64).map(|i| i * 100).collect();
        let mut conv =
            SampleConverter::new(SampleFormat::S16, ChannelLayout::Stereo, 48_000, 48_000, 2)
                .unwrap();
        let mut out = Vec::new();
        conv.convert(&s16_frame(&input, ChannelLayout::Stereo, 48_000), &mut out);
        assert_eq!(out, input);
    }

    #[test]
    fn mono_is_spread_to_both_channels() {
        let mut conv =
            SampleConverter::new(SampleFormat::S16, ChannelLayout::Mono, 48_000, 48_000, 2)
                .unwrap();
        let mut out = Vec::new();
        conv.convert(&s16_frame(&[8000; 32], ChannelLayout::Mono, 48_000), &mut out);
        assert_eq!(out.len(), 64);
        assert!(out.chunks_exact(2).all(|pair| pair[0] == pair[1] && pair[0] > 0));
    }

    #[test]
    fn upsampling_roughly_doubles_sample_count() {
        let mut conv = mono(24_000, 48_000);
        let mut out = Vec::new();
        for _ in 0..10 {
            conv.convert(&s16_frame(&[1000; 480], ChannelLayout::Mono, 24_000), &mut out);
        }
        // The filter holds back a few samples
        assert!((9500..=9600).contains(&out.len()), "{}", out.len());
    }

    #[test]
    fn compensation_changes_output_length() {
        let chunk = vec![1000i16; 1000];

        let mut longer = mono(48_000, 48_000);
        longer.set_compensation(100, 1100);
        let mut out = Vec::new();
        for _ in 0..5 {
            longer.convert(&s16_frame(&chunk, ChannelLayout::Mono, 48_000), &mut out);
        }
        assert!((5040..=5110).contains(&out.len()), "{}", out.len());

        let mut shorter = mono(48_000, 48_000);
        shorter.set_compensation(-100, 900);
        out.clear();
        for _ in 0..5 {
            shorter.convert(&s16_frame(&chunk, ChannelLayout::Mono, 48_000), &mut out);
        }
        assert!((4850..=4950).contains(&out.len()), "{}", out.len());
    }

    #[test]
    fn rejects_unusable_params() {
        assert!(
            SampleConverter::new(SampleFormat::S16, ChannelLayout::Stereo, 0, 48_000, 2).is_err()
        );
        assert!(
            SampleConverter::new(SampleFormat::S16, ChannelLayout::Discrete(12), 48_000, 48_000, 2)
                .is_err()
        );
    }

    #[test]
    fn matches_source_params() {
        let conv =
            SampleConverter::new(SampleFormat::S16, ChannelLayout::Stereo, 48_000, 44_100, 2)
                .unwrap();
        assert!(conv.matches(&s16_frame(&[0; 4], ChannelLayout::Stereo, 48_000)));
        assert!(!conv.matches(&s16_frame(&[0; 4], ChannelLayout::Stereo, 44_100)));
    }
}
