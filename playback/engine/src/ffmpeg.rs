/*!
    [`CodecContext`] implementations backed by FFmpeg.

    Enabled with the `ffmpeg` feature.
*/

use ffmpeg_next::{
    codec::{self, decoder::Audio as FfmpegAudioDecoder, decoder::Video as FfmpegVideoDecoder},
    ffi,
    format::{Pixel, Sample},
    packet::Mut as PacketMut,
    util::frame::{audio::Audio as FfmpegAudioFrame, video::Video as FfmpegVideoFrame},
};

use playback_types::{
    AudioFrame, ChannelLayout, Error, Packet, PixelFormat, Pts, Rational, Result, SampleFormat,
    VideoFrame,
};

use crate::codec::CodecContext;
use crate::error::CodecError;

impl From<ffmpeg_next::Error> for CodecError {
    fn from(e: ffmpeg_next::Error) -> Self {
        match e {
            ffmpeg_next::Error::Other { errno } if errno == ffmpeg_next::error::EAGAIN => {
                CodecError::Again
            }
            ffmpeg_next::Error::Eof => CodecError::Eof,
            e => CodecError::Failed(Error::codec(e.to_string())),
        }
    }
}

fn open_context(parameters: codec::Parameters) -> Result<codec::decoder::Decoder> {
    ffmpeg_next::init().map_err(|e| Error::codec(e.to_string()))?;
    let context = codec::context::Context::from_parameters(parameters)
        .map_err(|e| Error::codec(e.to_string()))?;
    Ok(context.decoder())
}

/**
    Build an FFmpeg packet carrying our packet's payload and timing.

    A null packet becomes an empty FFmpeg packet, which starts draining.
*/
fn to_ffmpeg_packet(packet: &Packet) -> ffmpeg_next::Packet {
    let mut ffmpeg_pkt = if packet.is_flush() {
        ffmpeg_next::Packet::empty()
    } else {
        ffmpeg_next::Packet::copy(&packet.data)
    };
    unsafe {
        let pkt_ptr = ffmpeg_pkt.as_mut_ptr();
        (*pkt_ptr).pts = packet.pts.map_or(ffi::AV_NOPTS_VALUE, |pts| pts.0);
        (*pkt_ptr).dts = packet.dts.map_or(ffi::AV_NOPTS_VALUE, |dts| dts.0);
        (*pkt_ptr).duration = packet.duration.0;
    }
    ffmpeg_pkt
}

fn timestamp(value: i64) -> Option<Pts> {
    (value != ffi::AV_NOPTS_VALUE).then_some(Pts(value))
}

/**
    Audio codec over an FFmpeg decoder.
*/
pub struct FfmpegAudioCodec {
    decoder: FfmpegAudioDecoder,
    time_base: Rational,
}

impl FfmpegAudioCodec {
    pub fn from_parameters(parameters: codec::Parameters, time_base: Rational) -> Result<Self> {
        let decoder = open_context(parameters)?
            .audio()
            .map_err(|e| Error::codec(e.to_string()))?;
        Ok(Self { decoder, time_base })
    }

    fn convert_frame(&self, frame: &FfmpegAudioFrame) -> Result<AudioFrame> {
        let samples = frame.samples();
        let channel_count = frame.channels() as u16;
        if samples == 0 {
            return Err(Error::invalid_data("audio frame has zero samples"));
        }
        let format = sample_format_from_ffmpeg(frame.format()).ok_or_else(|| {
            Error::unsupported_format(format!("sample format {:?}", frame.format()))
        })?;
        let data = interleave_audio(frame, format, samples, channel_count);
        Ok(AudioFrame::new(
            data,
            samples,
            frame.rate(),
            ChannelLayout::from_channels(channel_count),
            format,
            frame.pts().map(Pts),
            self.time_base,
        ))
    }
}

impl CodecContext for FfmpegAudioCodec {
    type Frame = AudioFrame;

    fn send_packet(&mut self, packet: &Packet) -> std::result::Result<(), CodecError> {
        if packet.is_flush() {
            return Ok(self.decoder.send_eof()?);
        }
        Ok(self.decoder.send_packet(&to_ffmpeg_packet(packet))?)
    }

    fn receive_frame(&mut self) -> std::result::Result<AudioFrame, CodecError> {
        let mut decoded = FfmpegAudioFrame::empty();
        self.decoder.receive_frame(&mut decoded)?;
        Ok(self.convert_frame(&decoded)?)
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

/**
    Video codec over an FFmpeg decoder.

    Frames are copied out with tightly packed rows.
*/
pub struct FfmpegVideoCodec {
    decoder: FfmpegVideoDecoder,
    time_base: Rational,
}

impl FfmpegVideoCodec {
    pub fn from_parameters(parameters: codec::Parameters, time_base: Rational) -> Result<Self> {
        let decoder = open_context(parameters)?
            .video()
            .map_err(|e| Error::codec(e.to_string()))?;
        Ok(Self { decoder, time_base })
    }

    fn convert_frame(&self, frame: &FfmpegVideoFrame) -> Result<VideoFrame> {
        let format = pixel_format_from_ffmpeg(frame.format()).ok_or_else(|| {
            Error::unsupported_format(format!("pixel format {:?}", frame.format()))
        })?;
        let (width, height) = (frame.width(), frame.height());

        let mut data = Vec::with_capacity(format.frame_size(width, height));
        for (plane, (row_bytes, rows)) in plane_layout(format, width, height).into_iter().enumerate() {
            let stride = frame.stride(plane);
            let src = frame.data(plane);
            for row in 0..rows {
                data.extend_from_slice(&src[row * stride..row * stride + row_bytes]);
            }
        }

        let mut converted = VideoFrame::new(
            data,
            width,
            height,
            format,
            frame.pts().map(Pts),
            self.time_base,
        );
        converted.pkt_dts = timestamp(unsafe { (*frame.as_ptr()).pkt_dts });
        converted.best_effort_pts = frame.timestamp().map(Pts);
        Ok(converted)
    }
}

impl CodecContext for FfmpegVideoCodec {
    type Frame = VideoFrame;

    fn send_packet(&mut self, packet: &Packet) -> std::result::Result<(), CodecError> {
        if packet.is_flush() {
            return Ok(self.decoder.send_eof()?);
        }
        Ok(self.decoder.send_packet(&to_ffmpeg_packet(packet))?)
    }

    fn receive_frame(&mut self) -> std::result::Result<VideoFrame, CodecError> {
        let mut decoded = FfmpegVideoFrame::empty();
        self.decoder.receive_frame(&mut decoded)?;
        Ok(self.convert_frame(&decoded)?)
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

// SAFETY: each codec context is only ever used by one thread at a time,
// behind the decoder's codec mutex.
unsafe impl Send for FfmpegAudioCodec {}
unsafe impl Send for FfmpegVideoCodec {}

/**
    Bytes per row and row count of every plane, tightly packed.
*/
fn plane_layout(format: PixelFormat, width: u32, height: u32) -> Vec<(usize, usize)> {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    match format {
        PixelFormat::Yuv420p => vec![(w, h), (cw, ch), (cw, ch)],
        PixelFormat::Nv12 => vec![(w, h), (cw * 2, ch)],
        PixelFormat::Yuv422p => vec![(w, h), (cw, h), (cw, h)],
        PixelFormat::Yuv444p => vec![(w, h), (w, h), (w, h)],
        PixelFormat::Rgb24 => vec![(w * 3, h)],
        _ => vec![(w * 4, h)],
    }
}

/**
    Interleave planar audio; packed audio is copied as is.
*/
fn interleave_audio(
    frame: &FfmpegAudioFrame,
    format: SampleFormat,
    samples: usize,
    channels: u16,
) -> Vec<u8> {
    let bytes_per_sample = format.bytes_per_sample();
    let total_bytes = samples * channels as usize * bytes_per_sample;
    if !frame.is_planar() {
        return frame.data(0)[..total_bytes].to_vec();
    }

    let mut output = vec![0u8; total_bytes];
    for ch in 0..channels as usize {
        let plane = frame.data(ch);
        for s in 0..samples {
            let src = s * bytes_per_sample;
            let dst = (s * channels as usize + ch) * bytes_per_sample;
            output[dst..dst + bytes_per_sample].copy_from_slice(&plane[src..src + bytes_per_sample]);
        }
    }
    output
}

fn sample_format_from_ffmpeg(format: Sample) -> Option<SampleFormat> {
    match format {
        Sample::F32(_) => Some(SampleFormat::F32),
        Sample::F64(_) => Some(SampleFormat::F64),
        Sample::I16(_) => Some(SampleFormat::S16),
        Sample::I32(_) => Some(SampleFormat::S32),
        Sample::U8(_) => Some(SampleFormat::U8),
        _ => None,
    }
}

pub(crate) fn sample_format_to_ffmpeg(format: SampleFormat) -> Sample {
    let packed = ffmpeg_next::format::sample::Type::Packed;
    match format {
        SampleFormat::F32 => Sample::F32(packed),
        SampleFormat::F64 => Sample::F64(packed),
        SampleFormat::S16 => Sample::I16(packed),
        SampleFormat::S32 => Sample::I32(packed),
        SampleFormat::U8 => Sample::U8(packed),
    }
}

/**
    Default FFmpeg layout for a channel count, `None` beyond 7.1.
*/
pub(crate) fn channel_layout_to_ffmpeg(channels: u16) -> Option<ffmpeg_next::ChannelLayout> {
    use ffmpeg_next::ChannelLayout as Layout;
    match channels {
        1 => Some(Layout::MONO),
        2 => Some(Layout::STEREO),
        3 => Some(Layout::SURROUND),
        4 => Some(Layout::QUAD),
        5 => Some(Layout::_5POINT0),
        6 => Some(Layout::_5POINT1),
        7 => Some(Layout::_6POINT1),
        8 => Some(Layout::_7POINT1),
        _ => None,
    }
}

fn pixel_format_from_ffmpeg(format: Pixel) -> Option<PixelFormat> {
    match format {
        Pixel::YUV420P => Some(PixelFormat::Yuv420p),
        Pixel::NV12 => Some(PixelFormat::Nv12),
        Pixel::BGRA => Some(PixelFormat::Bgra),
        Pixel::RGBA => Some(PixelFormat::Rgba),
        Pixel::RGB24 => Some(PixelFormat::Rgb24),
        Pixel::YUV422P => Some(PixelFormat::Yuv422p),
        Pixel::YUV444P => Some(PixelFormat::Yuv444p),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eagain_maps_to_again() {
        // Built from the raw return code, as send_packet/receive_frame do
        let again = ffmpeg_next::Error::from(ffi::AVERROR(ffi::EAGAIN));
        assert!(matches!(CodecError::from(again), CodecError::Again));
        let eof = ffmpeg_next::Error::from(ffi::AVERROR_EOF);
        assert!(matches!(CodecError::from(eof), CodecError::Eof));
        let invalid = ffmpeg_next::Error::from(ffi::AVERROR(ffi::EINVAL));
        assert!(matches!(CodecError::from(invalid), CodecError::Failed(_)));
    }

    #[test]
    fn sample_formats_map_both_ways() {
        for format in [
            SampleFormat::F32,
            SampleFormat::F64,
            SampleFormat::S16,
            SampleFormat::S32,
            SampleFormat::U8,
        ] {
            assert_eq!(sample_format_from_ffmpeg(sample_format_to_ffmpeg(format)), Some(format));
        }
    }

    #[test]
    fn channel_layouts_cover_common_counts() {
        assert!((1..=8).all(|n| channel_layout_to_ffmpeg(n).is_some()));
        assert_eq!(channel_layout_to_ffmpeg(9), None);
    }

    #[test]
    fn plane_layout_matches_frame_size() {
        let planes = plane_layout(PixelFormat::Yuv420p, 4, 4);
        let total: usize = planes.iter().map(|(row, rows)| row * rows).sum();
        assert_eq!(total, PixelFormat::Yuv420p.frame_size(4, 4));
    }
}
