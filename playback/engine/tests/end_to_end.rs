use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use playback_engine::types::{
    AudioFrame, AudioStreamInfo, ChannelLayout, MediaDuration, Packet, PixelFormat, Pts,
    Rational, SampleFormat, StreamType, VideoFrame, VideoStreamInfo,
};
use playback_engine::{
    AudioDecoder, AudioDeviceSpec, AudioResampler, CodecContext, CodecError, EngineConfig,
    MediaDecoder, MediaSync, PlayerState, SyncType, VideoDecoder, VideoDevice,
    reader_should_wait,
};

const TIME_BASE: Rational = Rational { num: 1, den: 1000 };

#[derive(Default)]
struct PassthroughCodec {
    pending: VecDeque<VideoFrame>,
    draining: bool,
}

impl CodecContext for PassthroughCodec {
    type Frame = VideoFrame;

    fn send_packet(&mut self, packet: &Packet) -> Result<(), CodecError> {
        if packet.is_flush() {
            self.draining = true;
        } else {
            self.pending.push_back(VideoFrame::new(
                vec![0; PixelFormat::Yuv420p.frame_size(4, 4)],
                4,
                4,
                PixelFormat::Yuv420p,
                packet.pts,
                packet.time_base,
            ));
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<VideoFrame, CodecError> {
        match self.pending.pop_front() {
            Some(frame) => Ok(frame),
            None if self.draining => Err(CodecError::Eof),
            None => Err(CodecError::Again),
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
    }
}

/**
    Turns every packet into 10 ms of 48 kHz stereo S16 at a constant level.
*/
#[derive(Default)]
struct ToneCodec {
    pending: VecDeque<AudioFrame>,
}

impl CodecContext for ToneCodec {
    type Frame = AudioFrame;

    fn send_packet(&mut self, packet: &Packet) -> Result<(), CodecError> {
        if !packet.is_flush() {
            let samples = vec![1000i16; 480 * 2];
            self.pending.push_back(AudioFrame::new(
                samples.iter().flat_map(|s| s.to_ne_bytes()).collect(),
                480,
                48_000,
                ChannelLayout::Stereo,
                SampleFormat::S16,
                packet.pts,
                packet.time_base,
            ));
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<AudioFrame, CodecError> {
        self.pending.pop_front().ok_or(CodecError::Again)
    }

    fn flush(&mut self) {
        self.pending.clear();
    }
}

struct TimestampRecorder(Arc<Mutex<Vec<f64>>>);

impl VideoDevice for TimestampRecorder {
    fn init_texture(&mut self, _width: u32, _height: u32, _format: PixelFormat) {}
    fn update_yuv(&mut self, _planes: [&[u8]; 3], _pitches: [usize; 3]) {}
    fn update_argb(&mut self, _data: &[u8], _pitch: usize) {}
    fn set_timestamp(&mut self, pts: f64) {
        self.0.lock().push(pts);
    }
    fn request_render(&mut self) {}
    fn terminate(&mut self) {}
}

fn stream_info() -> VideoStreamInfo {
    VideoStreamInfo {
        index: 0,
        time_base: TIME_BASE,
        frame_rate: Rational::new(25, 1),
        width: 4,
        height: 4,
        format: PixelFormat::Yuv420p,
        attached_pic: false,
    }
}

fn packet(index: i64) -> Packet {
    Packet::new(
        0,
        vec![0; 16],
        Some(Pts(index * 40)),
        Some(Pts(index * 40)),
        MediaDuration(40),
        TIME_BASE,
        index == 0,
        StreamType::Video,
    )
}

#[test]
fn video_plays_in_order_at_frame_rate() {
    let state = PlayerState::new();
    state.set_sync_type(SyncType::Video);
    let config = EngineConfig::default();

    let video = Arc::new(VideoDecoder::new(
        Arc::clone(&state),
        PassthroughCodec::default(),
        stream_info(),
        &config,
    ));
    for i in 0..50 {
        video.push_packet(packet(i)).unwrap();
    }
    video
        .push_packet(Packet::flush(0, StreamType::Video))
        .unwrap();

    let rendered = Arc::new(Mutex::new(Vec::new()));
    let sync = MediaSync::new(Arc::clone(&state), config);
    sync.set_video_device(Box::new(TimestampRecorder(Arc::clone(&rendered))));

    let started = Instant::now();
    video.start().unwrap();
    sync.start(Some(video.clone() as Arc<dyn MediaDecoder>), None)
        .unwrap();

    while rendered.lock().len() < 50 && started.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(10));
    }
    let elapsed = started.elapsed();
    sync.stop();
    video.stop();

    let rendered = rendered.lock().clone();
    assert_eq!(rendered.len(), 50);
    assert!(rendered.windows(2).all(|pair| pair[0] < pair[1]));
    assert!((rendered[49] - 1.96).abs() < 1e-9);
    assert!(
        elapsed >= Duration::from_millis(1700) && elapsed <= Duration::from_millis(3000),
        "took {elapsed:?}"
    );
}

#[test]
fn reader_waits_once_a_second_is_buffered() {
    let state = PlayerState::new();
    let config = EngineConfig::default();
    let video = VideoDecoder::new(
        Arc::clone(&state),
        PassthroughCodec::default(),
        stream_info(),
        &config,
    );

    for i in 0..20 {
        video.push_packet(packet(i)).unwrap();
    }
    assert!(!reader_should_wait(&state, None, Some(&video), &config));

    for i in 20..30 {
        video.push_packet(packet(i)).unwrap();
    }
    assert!(reader_should_wait(&state, None, Some(&video), &config));

    state.set_option("infbuf", "1").unwrap();
    assert!(!reader_should_wait(&state, None, Some(&video), &config));
}

#[test]
fn audio_callback_without_decoder_is_silent() {
    let state = PlayerState::new();
    let config = EngineConfig::default();
    let sync = MediaSync::new(Arc::clone(&state), config.clone());
    let resampler = AudioResampler::new(Arc::clone(&state), Arc::clone(sync.clocks()), config);
    resampler
        .set_resample_params(
            &AudioDeviceSpec {
                sample_rate: 44_100,
                channels: 2,
                buffer_size: 2048,
            },
            ChannelLayout::Stereo,
        )
        .unwrap();

    for len in [1, 511, 2048, 10_000] {
        let mut out = vec![0x55u8; len];
        resampler.service_callback(&mut out);
        assert!(out.iter().all(|&b| b == 0), "{len} bytes");
    }
    assert!(sync.clocks().audio().get_clock().is_nan());
}

fn audio_packet(index: i64) -> Packet {
    Packet::new(
        1,
        vec![0; 16],
        Some(Pts(index * 10)),
        Some(Pts(index * 10)),
        MediaDuration(10),
        TIME_BASE,
        true,
        StreamType::Audio,
    )
}

#[test]
fn paused_audio_is_silent_and_consumes_nothing() {
    let state = PlayerState::new();
    let config = EngineConfig::default();
    let sync = MediaSync::new(Arc::clone(&state), config.clone());
    let decoder = Arc::new(AudioDecoder::new(
        Arc::clone(&state),
        ToneCodec::default(),
        AudioStreamInfo {
            index: 1,
            time_base: TIME_BASE,
            sample_rate: 48_000,
            channels: ChannelLayout::Stereo,
            format: SampleFormat::S16,
        },
        &config,
    ));
    for i in 0..8 {
        decoder.push_packet(audio_packet(i)).unwrap();
    }

    let resampler = AudioResampler::new(Arc::clone(&state), Arc::clone(sync.clocks()), config);
    resampler
        .set_resample_params(
            &AudioDeviceSpec {
                sample_rate: 48_000,
                channels: 2,
                buffer_size: 1024,
            },
            ChannelLayout::Stereo,
        )
        .unwrap();
    resampler.set_audio_source(Some(decoder.clone()));

    state.set_paused(true);
    let mut out = vec![0x55u8; 1920];
    resampler.service_callback(&mut out);
    assert!(out.iter().all(|&b| b == 0));
    assert_eq!(decoder.packet_count(), 8);
    assert!(sync.clocks().audio().get_clock().is_nan());

    state.set_paused(false);
    resampler.service_callback(&mut out);
    assert!(out.iter().any(|&b| b != 0));
    assert!(decoder.packet_count() < 8);
    assert!(!sync.clocks().audio().get_clock().is_nan());
}

#[test]
fn seek_flush_drops_frames_from_before_the_seek() {
    let state = PlayerState::new();
    state.set_sync_type(SyncType::Video);
    let config = EngineConfig::default();

    let video = Arc::new(VideoDecoder::new(
        Arc::clone(&state),
        PassthroughCodec::default(),
        stream_info(),
        &config,
    ));
    video.start().unwrap();
    for i in 0..20 {
        video.push_packet(packet(i)).unwrap();
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    while video.frames().size() < video.frames().capacity() {
        assert!(Instant::now() < deadline, "decoder never filled its queue");
        thread::sleep(Duration::from_millis(2));
    }

    state.request_seek(2000);
    video.flush();
    for i in 50..55 {
        video.push_packet(packet(i)).unwrap();
    }
    state.finish_seek(true);

    let rendered = Arc::new(Mutex::new(Vec::new()));
    let sync = MediaSync::new(Arc::clone(&state), config);
    sync.set_video_device(Box::new(TimestampRecorder(Arc::clone(&rendered))));
    sync.start(Some(video.clone() as Arc<dyn MediaDecoder>), None)
        .unwrap();

    let started = Instant::now();
    while rendered.lock().len() < 5 && started.elapsed() < Duration::from_secs(3) {
        thread::sleep(Duration::from_millis(10));
    }
    sync.stop();
    video.stop();

    let rendered = rendered.lock().clone();
    assert_eq!(rendered.first().copied(), Some(2.0));
    assert!(rendered.iter().all(|&pts| pts >= 2.0), "{rendered:?}");
}
