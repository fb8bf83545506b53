/*!
    Audio output path.

    The platform audio callback calls [`AudioResampler::service_callback`],
    which pulls decoded frames from an [`AudioSource`], converts them to the
    device format and keeps the audio clock in step with what the device
    is actually playing.
*/

#[cfg(not(feature = "ffmpeg"))]
mod convert;
mod interpolate;
mod stretch;
#[cfg(feature = "ffmpeg")]
mod swr;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use playback_types::{AudioFrame, ChannelLayout, wall_time};

use crate::config::EngineConfig;
use crate::decoder::{AudioSource, FrameStatus};
use crate::device::AudioDeviceSpec;
use crate::error::{EngineError, EngineResult};
use crate::state::{ControlFlags, SharedState, SyncType};
use crate::sync::{SyncClocks, post_position};

#[cfg(not(feature = "ffmpeg"))]
pub use self::convert::SampleConverter;
#[cfg(feature = "ffmpeg")]
pub use self::swr::SampleConverter;
pub use self::stretch::{OlaStretch, TimeStretch};

const MIN_STRETCH_SCRATCH_FRAMES: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct OutputParams {
    sample_rate: u32,
    channels: u16,
    layout: ChannelLayout,
    frame_size: usize,
    bytes_per_sec: usize,
    hw_buf_size: usize,
}

/**
    Running average of the audio to master clock difference.
*/
#[derive(Debug, Clone, Copy)]
struct DriftAverage {
    cum: f64,
    coef: f64,
    threshold: f64,
    count: u32,
}

impl DriftAverage {
    fn reset(&mut self) {
        self.cum = 0.0;
        self.count = 0;
    }
}

struct OutputState {
    params: Option<OutputParams>,
    converter: Option<SampleConverter>,
    stretch: Option<Box<dyn TimeStretch>>,
    /// Converted samples not yet handed to the device.
    buffer: Vec<i16>,
    /// Read offset into `buffer`, in bytes.
    buffer_index: usize,
    scratch: Vec<i16>,
    /// Time at the end of the last converted frame, in seconds.
    audio_clock: f64,
    drift: DriftAverage,
}

impl OutputState {
    fn buffered_bytes(&self) -> usize {
        self.buffer.len() * 2 - self.buffer_index
    }
}

/**
    Converts decoded audio to the output device format and services the
    device callback.

    Call [`AudioResampler::set_resample_params`] once the device format is
    known; until then every callback is answered with silence.
*/
pub struct AudioResampler {
    state: SharedState,
    clocks: Arc<SyncClocks>,
    config: EngineConfig,
    source: Mutex<Option<Arc<dyn AudioSource>>>,
    output: Mutex<OutputState>,
}

impl AudioResampler {
    pub fn new(state: SharedState, clocks: Arc<SyncClocks>, config: EngineConfig) -> Self {
        Self {
            state,
            clocks,
            config,
            source: Mutex::new(None),
            output: Mutex::new(OutputState {
                params: None,
                converter: None,
                stretch: None,
                buffer: Vec::new(),
                buffer_index: 0,
                scratch: Vec::new(),
                audio_clock: f64::NAN,
                drift: DriftAverage {
                    cum: 0.0,
                    coef: 0.0,
                    threshold: 0.0,
                    count: 0,
                },
            }),
        }
    }

    pub fn set_audio_source(&self, source: Option<Arc<dyn AudioSource>>) {
        *self.source.lock() = source;
    }

    /**
        Configure the output format from what the device negotiated.

        Output is always interleaved S16 at the device rate. If the device
        did not grant the wanted channel layout, the default layout for its
        channel count is used instead.
    */
    pub fn set_resample_params(
        &self,
        spec: &AudioDeviceSpec,
        wanted: ChannelLayout,
    ) -> EngineResult<()> {
        if spec.sample_rate == 0 || spec.channels == 0 {
            return Err(EngineError::InvalidAudioParams(format!(
                "device opened at {} Hz with {} channels",
                spec.sample_rate, spec.channels
            )));
        }

        let layout = if wanted.channels() == spec.channels {
            wanted
        } else {
            ChannelLayout::from_channels(spec.channels)
        };
        let frame_size = spec.channels as usize * 2;
        let bytes_per_sec = spec.sample_rate as usize * frame_size;
        let params = OutputParams {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            layout,
            frame_size,
            bytes_per_sec,
            hw_buf_size: spec.buffer_size,
        };

        let mut output = self.output.lock();
        output.params = Some(params);
        output.converter = None;
        output.stretch = Some(Box::new(OlaStretch::new(spec.channels)));
        output.buffer.clear();
        output.buffer_index = 0;
        output.audio_clock = f64::NAN;
        output.drift = DriftAverage {
            cum: 0.0,
            coef: (0.01f64.ln() / self.config.audio_diff_avg_nb.max(1) as f64).exp(),
            threshold: spec.buffer_size as f64 / bytes_per_sec as f64,
            count: 0,
        };
        debug!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            ?layout,
            buffer_size = spec.buffer_size,
            "audio output configured"
        );
        Ok(())
    }

    /**
        Replace the built-in tempo and pitch stage.

        Takes effect until the next [`AudioResampler::set_resample_params`].
    */
    pub fn set_time_stretch(&self, stretch: Box<dyn TimeStretch>) {
        self.output.lock().stretch = Some(stretch);
    }

    /**
        Time at the end of the most recently converted frame, NaN if unknown.
    */
    pub fn audio_clock(&self) -> f64 {
        self.output.lock().audio_clock
    }

    /**
        Discard buffered audio, e.g. after a seek.
    */
    pub fn flush(&self) {
        let mut output = self.output.lock();
        output.buffer.clear();
        output.buffer_index = 0;
        output.audio_clock = f64::NAN;
        output.drift.reset();
        if let Some(converter) = output.converter.as_mut() {
            converter.reset();
        }
        if let Some(stretch) = output.stretch.as_mut() {
            stretch.clear();
        }
    }

    /**
        Fill `out` completely with device-format audio.

        Missing audio (no source, nothing decoded yet, decode errors) is
        replaced by silence; mute silences everything. Afterwards the audio
        clock is set to the time of the sample the device will play next.
    */
    pub fn service_callback(&self, out: &mut [u8]) {
        let callback_time = wall_time();
        let flags = self.state.snapshot();

        let mut guard = self.output.lock();
        let output = &mut *guard;
        let Some(params) = output.params else {
            out.fill(0);
            return;
        };

        let mut written = 0;
        while written < out.len() {
            if output.buffer_index >= output.buffer.len() * 2 {
                if self.resample_one_frame(output, &params, &flags).is_none() {
                    let silence = (self.config.audio_min_buffer_size / params.frame_size).max(1)
                        * params.frame_size;
                    output.buffer.clear();
                    output.buffer.resize(silence / 2, 0);
                }
                output.buffer_index = 0;
            }

            let bytes: &[u8] = bytemuck::cast_slice(&output.buffer);
            let len = (bytes.len() - output.buffer_index).min(out.len() - written);
            let dst = &mut out[written..written + len];
            if flags.mute {
                dst.fill(0);
            } else {
                dst.copy_from_slice(&bytes[output.buffer_index..output.buffer_index + len]);
            }
            written += len;
            output.buffer_index += len;
        }

        if !output.audio_clock.is_nan() {
            let pending = 2 * params.hw_buf_size + output.buffered_bytes();
            let clock = output.audio_clock - pending as f64 / params.bytes_per_sec as f64;
            self.clocks.update_audio_clock(clock, callback_time);
        }
        drop(guard);

        if flags.sync_type != SyncType::Video {
            post_position(&self.state, &self.clocks, &flags);
        }
    }

    /**
        Decode and convert one frame into the output buffer.

        Returns `None` if no audio could be produced right now.
    */
    fn resample_one_frame(
        &self,
        output: &mut OutputState,
        params: &OutputParams,
        flags: &ControlFlags,
    ) -> Option<()> {
        if flags.pause_request || flags.abort_request || flags.audio_disable {
            return None;
        }
        let source = self.source.lock().clone()?;
        loop {
            let frame = match source.get_audio_frame() {
                Ok(FrameStatus::Ready(frame)) => frame,
                Ok(FrameStatus::Retry) | Err(EngineError::Aborted | EngineError::Eof) => {
                    return None;
                }
                Err(e) => {
                    warn!("audio frame unavailable: {e}");
                    return None;
                }
            };

            let wanted = self.audio_synchronize(&mut output.drift, frame.samples, frame.sample_rate);
            let converter = Self::converter_for(&mut output.converter, params, &frame)?;
            if wanted != frame.samples {
                let in_rate = frame.sample_rate as i64;
                let out_rate = params.sample_rate as i64;
                let delta = (wanted as i64 - frame.samples as i64) * out_rate / in_rate;
                let distance = wanted as i64 * out_rate / in_rate;
                converter.set_compensation(delta, distance.max(0) as usize);
            }
            output.buffer.clear();
            converter.convert(&frame, &mut output.buffer);

            if flags.playback_rate != 1.0 || flags.playback_pitch != 1.0 {
                Self::time_stretch(output, params, flags);
            }

            output.audio_clock = match frame.pts_seconds() {
                Some(pts) => pts + frame.samples as f64 / frame.sample_rate as f64,
                None => f64::NAN,
            };

            if output.buffer.is_empty() {
                continue;
            }
            apply_volume(&mut output.buffer, flags.volume);
            return Some(());
        }
    }

    fn converter_for<'a>(
        converter: &'a mut Option<SampleConverter>,
        params: &OutputParams,
        frame: &AudioFrame,
    ) -> Option<&'a mut SampleConverter> {
        let rebuild = !converter
            .as_ref()
            .is_some_and(|converter| converter.matches(frame));
        if rebuild {
            match SampleConverter::new(
                frame.format,
                frame.channels,
                frame.sample_rate,
                params.sample_rate,
                params.channels,
            ) {
                Ok(rebuilt) => {
                    debug!(
                        format = ?frame.format,
                        channels = frame.channels.channels(),
                        sample_rate = frame.sample_rate,
                        out_rate = params.sample_rate,
                        out_layout = ?params.layout,
                        "audio converter rebuilt"
                    );
                    *converter = Some(rebuilt);
                }
                Err(e) => {
                    warn!("cannot convert audio frame: {e}");
                    *converter = None;
                }
            }
        }
        converter.as_mut()
    }

    /**
        Run the output buffer through the tempo and pitch stage, growing the
        scratch buffer until the stage has nothing more to give.
    */
    fn time_stretch(output: &mut OutputState, params: &OutputParams, flags: &ControlFlags) {
        let Some(stretch) = output.stretch.as_mut() else {
            return;
        };
        stretch.set_rate(flags.playback_rate);
        stretch.set_pitch(flags.playback_pitch);

        let ch = params.channels as usize;
        let wanted = (output.buffer.len() * 2).max(MIN_STRETCH_SCRATCH_FRAMES * ch);
        if output.scratch.len() < wanted {
            output.scratch.resize(wanted, 0);
        }

        let input = std::mem::take(&mut output.buffer);
        let mut fed: &[i16] = &input;
        loop {
            let frames = stretch.translate(fed, &mut output.scratch);
            fed = &[];
            output
                .buffer
                .extend_from_slice(&output.scratch[..frames * ch]);
            if frames * ch + ch > output.scratch.len() {
                let grown = output.scratch.len() * 2;
                output.scratch.resize(grown, 0);
                trace!(samples = grown, "time-stretch scratch buffer enlarged");
            } else {
                break;
            }
        }
    }

    /**
        Number of samples the next frame should play as, so that audio slowly
        converges on the master clock when audio is not the master itself.
    */
    fn audio_synchronize(&self, drift: &mut DriftAverage, samples: usize, sample_rate: u32) -> usize {
        if self.state.sync_type() == SyncType::Audio {
            return samples;
        }

        let diff = self.clocks.audio_diff_clock();
        if diff.is_nan() || diff.abs() >= self.config.no_sync_threshold {
            // Too far apart to correct gradually
            drift.reset();
            return samples;
        }

        drift.cum = diff + drift.coef * drift.cum;
        if drift.count < self.config.audio_diff_avg_nb {
            drift.count += 1;
            return samples;
        }

        let avg_diff = drift.cum * (1.0 - drift.coef);
        if avg_diff.abs() < drift.threshold {
            return samples;
        }

        let percent = self.config.sample_correction_percent_max as usize;
        let min = samples * (100 - percent.min(100)) / 100;
        let max = samples * (100 + percent) / 100;
        let wanted = samples as i64 + (diff * sample_rate as f64) as i64;
        let wanted = wanted.clamp(min as i64, max as i64) as usize;
        trace!(diff, avg_diff, samples, wanted, "audio sample count corrected");
        wanted
    }
}

fn apply_volume(samples: &mut [i16], volume: f32) {
    if volume >= 1.0 {
        return;
    }
    for sample in samples {
        *sample = (*sample as f32 * volume) as i16;
    }
}

static_assertions::assert_impl_all!(AudioResampler: Send, Sync);
