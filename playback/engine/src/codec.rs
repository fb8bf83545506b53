/*!
    Contract of the external codec collaborator.
*/

use playback_types::Packet;

use crate::error::CodecError;

/**
    An opened decoder, driven with send/receive semantics.

    Implementations wrap a real codec library (see the `ffmpeg` feature) or
    a test double. The engine serializes every call to a codec behind the
    process-wide codec lock, so implementations need no locking of their own.
*/
pub trait CodecContext: Send + 'static {
    type Frame: Send;

    /**
        Submit one packet. A null packet (see [`Packet::is_flush`]) starts draining.

        Returns [`CodecError::Again`] if the codec must hand out frames before
        it can take this packet; the caller keeps the packet and resends it.
    */
    fn send_packet(&mut self, packet: &Packet) -> Result<(), CodecError>;

    /**
        Take one decoded frame.

        Returns [`CodecError::Again`] when more input is needed and
        [`CodecError::Eof`] once a drain has completed.
    */
    fn receive_frame(&mut self) -> Result<Self::Frame, CodecError>;

    /**
        Drop all buffered input and output, e.g. after a seek.
    */
    fn flush(&mut self);
}
