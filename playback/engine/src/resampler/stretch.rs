/*!
    Tempo and pitch change for interleaved S16 audio.
*/

use std::collections::VecDeque;
use std::f32::consts::PI;

use super::interpolate::{Interpolator, to_s16};

/**
    A time-stretch / pitch-shift stage.

    Implementations buffer internally: output that does not fit into the
    caller's buffer is kept for the next call.
*/
pub trait TimeStretch: Send {
    /// Playback speed, 1.0 is unchanged.
    fn set_rate(&mut self, rate: f32);

    /// Pitch factor, 1.0 is unchanged.
    fn set_pitch(&mut self, pitch: f32);

    /**
        Feed `input` and write as many frames as fit into `output`.

        Returns the number of frames written; 0 means more input is needed.
    */
    fn translate(&mut self, input: &[i16], output: &mut [i16]) -> usize;

    /// Drop all buffered audio.
    fn clear(&mut self);
}

const WINDOW: usize = 1024;
const HOP: usize = WINDOW / 2;

/**
    Overlap-add stretcher with a Hann window and 50% synthesis overlap.

    Pitch is shifted by stretching the tempo by `rate / pitch` and then
    resampling by `pitch`.
*/
pub struct OlaStretch {
    channels: usize,
    rate: f32,
    pitch: f32,
    window: Vec<f32>,
    input: Vec<f32>,
    /// Read offset into `input` in frames; may run past its end when speeding up.
    offset: f64,
    overlap: Vec<f32>,
    stretched: Vec<f32>,
    pitched: Vec<f32>,
    resampler: Interpolator,
    output: VecDeque<i16>,
}

impl OlaStretch {
    pub fn new(channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        // Periodic Hann sums to one at 50% overlap
        let window = (0..WINDOW)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / WINDOW as f32).cos())
            .collect();
        Self {
            channels,
            rate: 1.0,
            pitch: 1.0,
            window,
            input: Vec::new(),
            offset: 0.0,
            overlap: vec![0.0; HOP * channels],
            stretched: Vec::new(),
            pitched: Vec::new(),
            resampler: Interpolator::new(channels),
            output: VecDeque::new(),
        }
    }

    fn analysis_hop(&self) -> f64 {
        HOP as f64 * (self.rate / self.pitch) as f64
    }

    fn process(&mut self) {
        let ch = self.channels;
        let hop = self.analysis_hop();
        self.stretched.clear();

        loop {
            let start = self.offset as usize;
            if (start + WINDOW) * ch > self.input.len() {
                break;
            }
            let grain = &self.input[start * ch..(start + WINDOW) * ch];
            for i in 0..HOP {
                for c in 0..ch {
                    let head = grain[i * ch + c] * self.window[i];
                    self.stretched.push(self.overlap[i * ch + c] + head);
                    self.overlap[i * ch + c] = grain[(i + HOP) * ch + c] * self.window[i + HOP];
                }
            }
            self.offset += hop;
        }

        let consumed = (self.offset as usize).min(self.input.len() / ch);
        self.input.drain(..consumed * ch);
        self.offset -= consumed as f64;

        if self.stretched.is_empty() {
            return;
        }
        let samples = if self.pitch == 1.0 {
            &self.stretched
        } else {
            self.pitched.clear();
            let step = self.pitch as f64;
            self.resampler
                .process(&self.stretched, || step, &mut self.pitched);
            &self.pitched
        };
        self.output.extend(samples.iter().map(|&s| to_s16(s)));
    }
}

impl TimeStretch for OlaStretch {
    fn set_rate(&mut self, rate: f32) {
        if rate > 0.0 {
            self.rate = rate;
        }
    }

    fn set_pitch(&mut self, pitch: f32) {
        if pitch > 0.0 {
            self.pitch = pitch;
        }
    }

    fn translate(&mut self, input: &[i16], output: &mut [i16]) -> usize {
        self.input
            .extend(input.iter().map(|&s| s as f32 / 32768.0));
        self.process();

        let ch = self.channels;
        let frames = (output.len() / ch).min(self.output.len() / ch);
        for (dst, src) in output[..frames * ch]
            .iter_mut()
            .zip(self.output.drain(..frames * ch))
        {
            *dst = src;
        }
        frames
    }

    fn clear(&mut self) {
        self.input.clear();
        self.offset = 0.0;
        self.overlap.fill(0.0);
        self.resampler.reset();
        self.output.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stretch: &mut OlaStretch, chunks: usize, chunk_frames: usize) -> usize {
        let input = vec![1000i16; chunk_frames * 2];
        let mut output = vec![0i16; 1 << 16];
        let mut total = 0;
        for _ in 0..chunks {
            total += stretch.translate(&input, &mut output);
        }
        total
    }

    #[test]
    fn needs_a_full_window_before_output() {
        let mut stretch = OlaStretch::new(2);
        let mut output = vec![0i16; 4096];
        assert_eq!(stretch.translate(&[0; 200], &mut output), 0);
    }

    #[test]
    fn unity_keeps_duration() {
        let mut stretch = OlaStretch::new(2);
        let total = run(&mut stretch, 20, 1024);
        assert!((20 * 1024 - WINDOW..=20 * 1024).contains(&total), "{total}");
    }

    #[test]
    fn unity_reconstructs_steady_signal() {
        let mut stretch = OlaStretch::new(2);
        let input = vec![1000i16; 8192];
        let mut output = vec![0i16; 8192];
        let frames = stretch.translate(&input, &mut output);
        // Skip the first hop, which fades in from silence
        for &s in &output[HOP * 2..frames * 2] {
            assert!((s - 999).abs() <= 2, "{s}");
        }
    }

    #[test]
    fn double_rate_halves_duration() {
        let mut stretch = OlaStretch::new(2);
        stretch.set_rate(2.0);
        let total = run(&mut stretch, 40, 1024);
        assert!((20 * 1024 - WINDOW..=20 * 1024).contains(&total), "{total}");
    }

    #[test]
    fn pitch_shift_keeps_duration() {
        let mut stretch = OlaStretch::new(2);
        stretch.set_pitch(2.0);
        let total = run(&mut stretch, 20, 1024);
        assert!((20 * 1024 - 2 * WINDOW..=20 * 1024).contains(&total), "{total}");
    }

    #[test]
    fn small_output_keeps_remainder() {
        let mut stretch = OlaStretch::new(2);
        let input = vec![0i16; 4096 * 2];
        let mut small = vec![0i16; 200];
        assert_eq!(stretch.translate(&input, &mut small), 100);
        let mut rest = vec![0i16; 1 << 14];
        assert!(stretch.translate(&[], &mut rest) > 0);
    }

    #[test]
    fn clear_drops_buffered_audio() {
        let mut stretch = OlaStretch::new(2);
        let mut small = vec![0i16; 2];
        stretch.translate(&vec![0i16; 4096 * 2], &mut small);
        stretch.clear();
        let mut rest = vec![0i16; 1 << 14];
        assert_eq!(stretch.translate(&[], &mut rest), 0);
    }
}
