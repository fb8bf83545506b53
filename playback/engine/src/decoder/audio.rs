/*!
    Pull-driven audio decoder.
*/

use parking_lot::Mutex;
use tracing::{debug, warn};

use playback_types::{AudioFrame, AudioStreamInfo, Packet, Pts, Rational};

use super::{DecoderCore, MediaDecoder};
use crate::codec::CodecContext;
use crate::config::EngineConfig;
use crate::error::{CodecError, EngineError, EngineResult, QueueError};
use crate::state::SharedState;

/**
    Outcome of a successful [`AudioSource::get_audio_frame`] call.
*/
#[derive(Debug)]
pub enum FrameStatus {
    /// A decoded frame, timestamped in `1/sample_rate` units.
    Ready(AudioFrame),
    /// Nothing decodable right now; ask again on the next callback.
    Retry,
}

/**
    Anything the resampler can pull decoded audio from.
*/
pub trait AudioSource: Send + Sync {
    /**
        Decode the next frame.

        Fails with [`EngineError::Aborted`] once playback is stopped and with
        [`EngineError::Eof`] once the codec has been drained.
    */
    fn get_audio_frame(&self) -> EngineResult<FrameStatus>;
}

#[derive(Debug, Default)]
struct DecodeProgress {
    /// Packet the codec refused with `Again`, resent before popping a new one.
    pending: Option<Packet>,
    /// Projected timestamp of the next frame, in `1/sample_rate` units.
    next_pts: Option<i64>,
}

/**
    Audio decoder without a thread of its own.

    It runs on whichever thread pulls frames, normally the audio device
    callback, so it never blocks on an empty queue: it reports
    [`FrameStatus::Retry`] instead.
*/
pub struct AudioDecoder<C> {
    core: DecoderCore<C>,
    info: AudioStreamInfo,
    progress: Mutex<DecodeProgress>,
}

impl<C: CodecContext<Frame = AudioFrame>> AudioDecoder<C> {
    pub fn new(state: SharedState, codec: C, info: AudioStreamInfo, config: &EngineConfig) -> Self {
        Self {
            core: DecoderCore::new(state, codec, info.index, false, config),
            info,
            progress: Mutex::new(DecodeProgress::default()),
        }
    }

    pub fn info(&self) -> &AudioStreamInfo {
        &self.info
    }

    /**
        Give every decoded frame a gap-free timestamp in `1/sample_rate` units.

        Frames with a timestamp are rescaled into sample units; frames without
        one continue from where the previous frame ended.
    */
    fn stamp(progress: &mut DecodeProgress, frame: &mut AudioFrame) {
        let Some(rate) = i32::try_from(frame.sample_rate).ok().filter(|&r| r > 0) else {
            return;
        };
        let sample_base = Rational::new(1, rate);
        let pts = match frame.pts {
            Some(pts) => Some(pts.rescale(frame.time_base, sample_base)),
            None => progress.next_pts.map(Pts),
        };
        if let Some(pts) = pts {
            progress.next_pts = Some(pts.0 + frame.samples as i64);
        }
        frame.pts = pts;
        frame.time_base = sample_base;
    }
}

impl<C: CodecContext<Frame = AudioFrame>> AudioSource for AudioDecoder<C> {
    fn get_audio_frame(&self) -> EngineResult<FrameStatus> {
        let mut progress = self.progress.lock();
        loop {
            if self.core.is_aborted() {
                return Err(EngineError::Aborted);
            }
            if self.core.state.is_seek_requested() {
                return Ok(FrameStatus::Retry);
            }

            let packet = match progress.pending.take() {
                Some(packet) => packet,
                None => match self.core.packets.pop(false) {
                    Ok(packet) => packet,
                    Err(QueueError::Empty) => return Ok(FrameStatus::Retry),
                    Err(QueueError::Aborted) => return Err(EngineError::Aborted),
                },
            };

            let received = {
                let _codec_guard = self.core.state.lock_codec();
                let mut codec = self.core.codec.lock();
                match codec.send_packet(&packet) {
                    Ok(()) => {}
                    Err(CodecError::Again) => progress.pending = Some(packet),
                    Err(CodecError::Eof) => {}
                    Err(CodecError::Failed(e)) => {
                        warn!(stream = self.core.stream_index, "audio packet rejected: {e}");
                    }
                }
                codec.receive_frame()
            };

            match received {
                Ok(mut frame) => {
                    Self::stamp(&mut progress, &mut frame);
                    return Ok(FrameStatus::Ready(frame));
                }
                Err(CodecError::Again) => continue,
                Err(CodecError::Eof) => {
                    debug!(stream = self.core.stream_index, "audio codec drained");
                    return Err(EngineError::Eof);
                }
                Err(CodecError::Failed(e)) => {
                    warn!(stream = self.core.stream_index, "audio frame dropped: {e}");
                    continue;
                }
            }
        }
    }
}

impl<C: CodecContext<Frame = AudioFrame>> MediaDecoder for AudioDecoder<C> {
    fn start(&self) -> EngineResult<()> {
        self.core.packets.start();
        debug!(stream = self.core.stream_index, "audio decoder started");
        Ok(())
    }

    fn stop(&self) {
        self.core.packets.abort();
        debug!(stream = self.core.stream_index, "audio decoder stopped");
    }

    fn flush(&self) {
        let mut progress = self.progress.lock();
        self.core.flush();
        *progress = DecodeProgress::default();
    }

    fn push_packet(&self, packet: Packet) -> Result<(), QueueError> {
        self.core.packets.push(packet)
    }

    fn packet_count(&self) -> usize {
        self.core.packets.packet_count()
    }

    fn has_enough_packets(&self) -> bool {
        self.core.has_enough_packets()
    }

    fn memory_size(&self) -> usize {
        self.core.packets.size_bytes()
    }

    fn stream_index(&self) -> usize {
        self.core.stream_index
    }
}

#[cfg(test)]
mod tests {
    use playback_types::{MediaDuration, StreamType};

    use super::*;
    use crate::decoder::testing::{OneAtATimeAudio, audio_info};
    use crate::state::PlayerState;

    static_assertions::assert_impl_all!(AudioDecoder<OneAtATimeAudio>: Send, Sync, AudioSource);

    fn packet(pts_ms: Option<i64>) -> Packet {
        Packet::new(
            1,
            vec![1; 64],
            pts_ms.map(Pts),
            pts_ms.map(Pts),
            MediaDuration(21),
            Rational::new(1, 1000),
            true,
            StreamType::Audio,
        )
    }

    fn decoder(state: &SharedState) -> AudioDecoder<OneAtATimeAudio> {
        AudioDecoder::new(
            std::sync::Arc::clone(state),
            OneAtATimeAudio::new(1024, 48000),
            audio_info(48000),
            &EngineConfig::default(),
        )
    }

    fn ready(status: EngineResult<FrameStatus>) -> AudioFrame {
        match status {
            Ok(FrameStatus::Ready(frame)) => frame,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn empty_queue_means_retry() {
        let state = PlayerState::new();
        let decoder = decoder(&state);
        assert!(matches!(decoder.get_audio_frame(), Ok(FrameStatus::Retry)));
    }

    #[test]
    fn timestamps_are_rescaled_to_samples() {
        let state = PlayerState::new();
        let decoder = decoder(&state);
        decoder.push_packet(packet(Some(500))).unwrap();

        let frame = ready(decoder.get_audio_frame());
        assert_eq!(frame.pts, Some(Pts(24000)));
        assert_eq!(frame.time_base, Rational::new(1, 48000));
        assert_eq!(frame.pts_seconds(), Some(0.5));
    }

    #[test]
    fn missing_timestamps_are_projected() {
        let state = PlayerState::new();
        let decoder = decoder(&state);
        decoder.push_packet(packet(Some(0))).unwrap();
        decoder.push_packet(packet(None)).unwrap();
        decoder.push_packet(packet(None)).unwrap();

        let pts: Vec<_> = (0..3)
            .map(|_| ready(decoder.get_audio_frame()).pts)
            .collect();
        assert_eq!(pts, vec![Some(Pts(0)), Some(Pts(1024)), Some(Pts(2048))]);
    }

    #[test]
    fn refused_packet_is_resent_not_lost() {
        let state = PlayerState::new();
        let decoder = decoder(&state);
        // Prime the codec with a packet it holds until its frame is taken
        decoder
            .core
            .codec
            .lock()
            .send_packet(&packet(Some(0)))
            .unwrap();
        decoder.push_packet(packet(Some(100))).unwrap();

        // First call: the queued packet is refused, the held frame comes out
        let first = ready(decoder.get_audio_frame());
        assert_eq!(first.pts, Some(Pts(0)));
        assert_eq!(decoder.packet_count(), 0);

        // Second call resends the refused packet
        let second = ready(decoder.get_audio_frame());
        assert_eq!(second.pts, Some(Pts(4800)));
    }

    #[test]
    fn drained_codec_reports_eof() {
        let state = PlayerState::new();
        let decoder = decoder(&state);
        decoder.push_packet(Packet::flush(1, StreamType::Audio)).unwrap();
        assert!(matches!(decoder.get_audio_frame(), Err(EngineError::Eof)));
    }

    #[test]
    fn stopped_decoder_reports_abort() {
        let state = PlayerState::new();
        let decoder = decoder(&state);
        decoder.push_packet(packet(Some(0))).unwrap();
        decoder.stop();
        assert!(matches!(decoder.get_audio_frame(), Err(EngineError::Aborted)));
    }

    #[test]
    fn pending_seek_means_retry() {
        let state = PlayerState::new();
        let decoder = decoder(&state);
        decoder.push_packet(packet(Some(0))).unwrap();
        state.request_seek(1000);
        assert!(matches!(decoder.get_audio_frame(), Ok(FrameStatus::Retry)));
        assert_eq!(decoder.packet_count(), 1);
    }

    #[test]
    fn flush_forgets_projection() {
        let state = PlayerState::new();
        let decoder = decoder(&state);
        decoder.push_packet(packet(Some(0))).unwrap();
        ready(decoder.get_audio_frame());
        decoder.flush();

        decoder.push_packet(packet(None)).unwrap();
        assert_eq!(ready(decoder.get_audio_frame()).pts, None);
    }
}
