/*!
    Encoded packet type.
*/

use crate::{MediaDuration, Pts, Rational};

/**
    Type of media stream.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// Video stream
    Video,
    /// Audio stream
    Audio,
}

/**
    An encoded media packet.

    Contains compressed data from a single stream, with timing information.
    A packet with no data is a *null packet*: the reader pushes one at the
    end of a stream, and decoders hand it to the codec to drain it.
*/
#[derive(Clone, Debug)]
pub struct Packet {
    /// Index of the elementary stream this packet belongs to.
    pub stream_index: usize,
    /// Compressed data.
    pub data: Vec<u8>,
    /// Presentation timestamp (when to display/play).
    pub pts: Option<Pts>,
    /// Decode timestamp (may differ from PTS for B-frames).
    pub dts: Option<Pts>,
    /// Duration of this packet's content, zero if unknown.
    pub duration: MediaDuration,
    /// Time base for interpreting timestamps.
    pub time_base: Rational,
    /// Whether this is a keyframe (can be decoded independently).
    pub is_keyframe: bool,
    /// Type of stream this packet belongs to.
    pub stream_type: StreamType,
}

impl Packet {
    /**
        Create a new packet.
    */
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream_index: usize,
        data: Vec<u8>,
        pts: Option<Pts>,
        dts: Option<Pts>,
        duration: MediaDuration,
        time_base: Rational,
        is_keyframe: bool,
        stream_type: StreamType,
    ) -> Self {
        Self {
            stream_index,
            data,
            pts,
            dts,
            duration,
            time_base,
            is_keyframe,
            stream_type,
        }
    }

    /**
        Create a null packet marking the end of a stream.
    */
    pub fn flush(stream_index: usize, stream_type: StreamType) -> Self {
        Self {
            stream_index,
            data: Vec::new(),
            pts: None,
            dts: None,
            duration: MediaDuration(0),
            time_base: Rational::default(),
            is_keyframe: false,
            stream_type,
        }
    }

    /**
        Returns true if this is a null packet.
    */
    pub fn is_flush(&self) -> bool {
        self.data.is_empty()
    }

    /**
        Returns the payload size in bytes.
    */
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /**
        Returns the presentation time in seconds, if PTS is set.
    */
    pub fn pts_seconds(&self) -> Option<f64> {
        self.pts.map(|pts| pts.to_seconds(self.time_base))
    }
}

// Ensure Packet is Send + Sync
static_assertions::assert_impl_all!(Packet: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    const TB_1_1000: Rational = Rational { num: 1, den: 1000 };

    #[test]
    fn packet_construction() {
        let packet = Packet::new(
            1,
            vec![0u8; 1000],
            Some(Pts(500)),
            Some(Pts(400)),
            MediaDuration(40),
            TB_1_1000,
            true,
            StreamType::Video,
        );

        assert_eq!(packet.stream_index, 1);
        assert_eq!(packet.size(), 1000);
        assert!(packet.is_keyframe);
        assert_eq!(packet.stream_type, StreamType::Video);
        assert!(!packet.is_flush());
        assert_eq!(packet.pts_seconds(), Some(0.5));
    }

    #[test]
    fn null_packet() {
        let packet = Packet::flush(0, StreamType::Audio);
        assert!(packet.is_flush());
        assert_eq!(packet.stream_type, StreamType::Audio);
        assert_eq!(packet.size(), 0);
        assert_eq!(packet.pts_seconds(), None);
    }
}
