/*!
    Engine tuning parameters.

    Every threshold the queues, decoders and scheduler consult lives here,
    with defaults suited to ordinary file and network playback. Configurations
    can be stored and loaded as JSON.
*/

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// Upper bound on the number of frames a [`FrameQueue`](crate::FrameQueue) may hold.
pub const FRAME_QUEUE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Decoded video frames buffered ahead of presentation.
    pub video_queue_size: usize,
    /// Packets a stream must hold before the reader may pause.
    pub min_frames: usize,
    /// Combined packet-queue bytes at which the reader must pause.
    pub max_queue_bytes: usize,
    /// Default scheduler tick, in seconds.
    pub refresh_rate: f64,
    /// Lower clamp of the A/V correction threshold, in seconds.
    pub sync_threshold_min: f64,
    /// Upper clamp of the A/V correction threshold, in seconds.
    pub sync_threshold_max: f64,
    /// Frame delay above which a leading video adds the diff instead of doubling.
    pub frame_dup_threshold: f64,
    /// Clock differences beyond this are not corrected at all.
    pub no_sync_threshold: f64,
    /// Longest plausible gap between two frames, in seconds.
    pub max_frame_duration: f64,
    /// Packet count under which the external clock slows down.
    pub external_clock_min_frames: usize,
    /// Packet count over which the external clock speeds up.
    pub external_clock_max_frames: usize,
    pub external_clock_speed_min: f64,
    pub external_clock_speed_max: f64,
    pub external_clock_speed_step: f64,
    /// Number of diffs averaged before audio correction kicks in.
    pub audio_diff_avg_nb: u32,
    /// Maximum sample-count correction, in percent of the frame.
    pub sample_correction_percent_max: u32,
    /// Silence chunk written when the resampler has nothing to give, in bytes.
    pub audio_min_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            video_queue_size: 3,
            min_frames: 25,
            max_queue_bytes: 15 * 1024 * 1024,
            refresh_rate: 0.01,
            sync_threshold_min: 0.04,
            sync_threshold_max: 0.1,
            frame_dup_threshold: 0.1,
            no_sync_threshold: playback_types::NO_SYNC_THRESHOLD,
            max_frame_duration: 10.0,
            external_clock_min_frames: 2,
            external_clock_max_frames: 10,
            external_clock_speed_min: 0.900,
            external_clock_speed_max: 1.010,
            external_clock_speed_step: 0.001,
            audio_diff_avg_nb: 20,
            sample_correction_percent_max: 10,
            audio_min_buffer_size: 512,
        }
    }
}

impl EngineConfig {
    /**
        Parse a configuration from JSON. Missing fields keep their defaults.
    */
    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /**
        Serialize this configuration to pretty-printed JSON.
    */
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /**
        Frame queue capacity, clamped to [`FRAME_QUEUE_SIZE`].
    */
    pub fn frame_queue_capacity(&self) -> usize {
        self.video_queue_size.clamp(1, FRAME_QUEUE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "min_frames": 50 }"#).unwrap();
        assert_eq!(config.min_frames, 50);
        assert_eq!(config.video_queue_size, 3);
        assert_eq!(config.max_queue_bytes, 15 * 1024 * 1024);
    }

    #[test]
    fn json_round_trip() {
        let mut config = EngineConfig::default();
        config.max_frame_duration = 3600.0;
        let parsed = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = EngineConfig::from_json("{ min_frames").unwrap_err();
        assert!(matches!(err, crate::EngineError::Config(_)));
    }

    #[test]
    fn frame_queue_capacity_is_capped() {
        let mut config = EngineConfig::default();
        config.video_queue_size = 64;
        assert_eq!(config.frame_queue_capacity(), FRAME_QUEUE_SIZE);
    }
}
