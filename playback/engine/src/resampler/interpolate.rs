/*!
    Linear interpolation shared by the sample converter and the time stretch.
*/

/**
    Linear interpolation over interleaved `f32` frames.

    Keeps the fractional read position and the last frame of the previous
    chunk, so consecutive chunks join without clicks.
*/
#[derive(Debug, Clone)]
pub(crate) struct Interpolator {
    channels: usize,
    /// Read position relative to the start of the next chunk; -1 is `previous`.
    position: f64,
    previous: Vec<f32>,
}

impl Interpolator {
    pub(crate) fn new(channels: usize) -> Self {
        Self {
            channels,
            position: 0.0,
            previous: vec![0.0; channels],
        }
    }

    #[cfg(not(feature = "ffmpeg"))]
    pub(crate) fn is_aligned(&self) -> bool {
        self.position == 0.0
    }

    /**
        Interpolate `input` into `output`, advancing by `step()` input frames
        per output frame.
    */
    pub(crate) fn process(
        &mut self,
        input: &[f32],
        mut step: impl FnMut() -> f64,
        output: &mut Vec<f32>,
    ) {
        let ch = self.channels;
        let frames = input.len() / ch;
        if frames == 0 {
            return;
        }

        let sample = |index: isize, c: usize| {
            if index < 0 {
                self.previous[c]
            } else {
                input[index as usize * ch + c]
            }
        };

        let mut position = self.position;
        while position < (frames - 1) as f64 {
            let index = position.floor() as isize;
            let frac = (position - index as f64) as f32;
            for c in 0..ch {
                let a = sample(index, c);
                let b = sample(index + 1, c);
                output.push(a + (b - a) * frac);
            }
            position += step();
        }

        self.position = position - frames as f64;
        self.previous
            .copy_from_slice(&input[(frames - 1) * ch..frames * ch]);
    }

    /**
        Skip interpolation for a chunk that is passed through unchanged.
    */
    #[cfg(not(feature = "ffmpeg"))]
    pub(crate) fn pass_through(&mut self, input: &[f32]) {
        let ch = self.channels;
        let frames = input.len() / ch;
        if frames > 0 {
            self.previous
                .copy_from_slice(&input[(frames - 1) * ch..frames * ch]);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.position = 0.0;
        self.previous.fill(0.0);
    }
}

pub(crate) fn to_s16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halving_the_step_doubles_the_frames() {
        let mut interpolator = Interpolator::new(1);
        let mut out = Vec::new();
        for _ in 0..4 {
            interpolator.process(&[0.25; 100], || 0.5, &mut out);
        }
        assert!((798..=800).contains(&out.len()), "{}", out.len());
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn chunks_join_through_the_previous_frame() {
        let mut interpolator = Interpolator::new(1);
        let mut out = Vec::new();
        interpolator.process(&[0.0, 1.0], || 0.75, &mut out);
        out.clear();
        interpolator.process(&[1.0, 1.0, 1.0], || 0.75, &mut out);
        // Reads start between the last frame of the previous chunk and the first of this one
        assert!(out.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn s16_conversion_saturates() {
        assert_eq!(to_s16(2.0), i16::MAX);
        assert_eq!(to_s16(-2.0), -i16::MAX);
        assert_eq!(to_s16(0.0), 0);
    }
}
