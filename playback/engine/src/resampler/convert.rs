/*!
    Streaming sample format, channel and rate conversion to interleaved S16.
*/

use playback_types::{AudioFrame, ChannelLayout, SampleFormat};

use super::interpolate::{Interpolator, to_s16};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy)]
struct Compensation {
    step: f64,
    remaining: usize,
}

/**
    Converts decoded frames of one source format into interleaved S16
    at the output rate and channel count.

    Build a new converter when the source parameters change; see
    [`SampleConverter::matches`].
*/
#[derive(Debug, Clone)]
pub struct SampleConverter {
    format: SampleFormat,
    layout: ChannelLayout,
    in_rate: u32,
    out_rate: u32,
    out_channels: u16,
    interpolator: Interpolator,
    compensation: Option<Compensation>,
    decoded: Vec<f32>,
    mixed: Vec<f32>,
    resampled: Vec<f32>,
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
        if !is_supported(format) {
            return Err(playback_types::Error::unsupported_format(format!("{format:?}")).into());
        }
        Ok(Self {
            format,
            layout,
            in_rate,
            out_rate,
            out_channels,
            interpolator: Interpolator::new(out_channels as usize),
            compensation: None,
            decoded: Vec::new(),
            mixed: Vec::new(),
            resampled: Vec::new(),
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
        if distance == 0 || delta == 0 {
            self.compensation = None;
            return;
        }
        let consumed = (distance as i64 - delta).max(1) as f64;
        self.compensation = Some(Compensation {
            step: self.base_step() * consumed / distance as f64,
            remaining: distance,
        });
    }

    fn base_step(&self) -> f64 {
        self.in_rate as f64 / self.out_rate as f64
    }

    /**
        Convert one frame, appending interleaved S16 samples to `output`.
    */
    pub fn convert(&mut self, frame: &AudioFrame, output: &mut Vec<i16>) {
        self.decoded.clear();
        decode_samples(self.format, &frame.data, &mut self.decoded);

        self.mixed.clear();
        mix_channels(
            &self.decoded,
            self.layout.channels() as usize,
            self.out_channels as usize,
            &mut self.mixed,
        );

        let pass_through = self.in_rate == self.out_rate
            && self.compensation.is_none()
            && self.interpolator.is_aligned();

        let samples = if pass_through {
            self.interpolator.pass_through(&self.mixed);
            &self.mixed
        } else {
            self.resampled.clear();
            let base = self.base_step();
            let compensation = &mut self.compensation;
            self.interpolator.process(
                &self.mixed,
                || match compensation {
                    Some(c) if c.remaining > 0 => {
                        c.remaining -= 1;
                        c.step
                    }
                    _ => {
                        *compensation = None;
                        base
                    }
                },
                &mut self.resampled,
            );
            &self.resampled
        };

        output.extend(samples.iter().map(|&s| to_s16(s)));
    }

    pub fn reset(&mut self) {
        self.interpolator.reset();
        self.compensation = None;
    }
}

fn is_supported(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::U8
            | SampleFormat::S16
            | SampleFormat::S32
            | SampleFormat::F32
            | SampleFormat::F64
    )
}

fn decode_samples(format: SampleFormat, data: &[u8], out: &mut Vec<f32>) {
    match format {
        SampleFormat::U8 => out.extend(data.iter().map(|&b| (b as f32 - 128.0) / 128.0)),
        SampleFormat::S16 => out.extend(
            data.chunks_exact(2)
                .map(|c| bytemuck::pod_read_unaligned::<i16>(c) as f32 / 32768.0),
        ),
        SampleFormat::S32 => out.extend(
            data.chunks_exact(4)
                .map(|c| bytemuck::pod_read_unaligned::<i32>(c) as f32 / 2_147_483_648.0),
        ),
        SampleFormat::F32 => {
            out.extend(data.chunks_exact(4).map(bytemuck::pod_read_unaligned::<f32>))
        }
        SampleFormat::F64 => out.extend(
            data.chunks_exact(8)
                .map(|c| bytemuck::pod_read_unaligned::<f64>(c) as f32),
        ),
        _ => {}
    }
}

/**
    Up- or down-mix interleaved frames.

    Mono is duplicated to every output channel, anything mixed down to mono
    is averaged, and other layouts map channels by index.
*/
fn mix_channels(input: &[f32], in_ch: usize, out_ch: usize, out: &mut Vec<f32>) {
    if in_ch == out_ch {
        out.extend_from_slice(input);
        return;
    }
    for frame in input.chunks_exact(in_ch) {
        if out_ch == 1 {
            out.push(frame.iter().sum::<f32>() / in_ch as f32);
        } else {
            out.extend((0..out_ch).map(|c| frame[c % in_ch]));
        }
    }
}
