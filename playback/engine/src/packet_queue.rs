/*!
    Per-stream FIFO of compressed packets.
*/

use std::collections::VecDeque;
use std::mem;

use playback_types::{MediaDuration, Packet, Rational, StreamType};

use crate::error::QueueError;
use crate::monitor::Monitor;

#[derive(Debug, Default)]
struct QueueState {
    packets: VecDeque<Packet>,
    size_bytes: usize,
    duration: i64,
    time_base: Option<Rational>,
    /// Bumped by every flush.
    serial: u64,
    abort: bool,
}

impl QueueState {
    fn take_front(&mut self) -> Option<Packet> {
        let packet = self.packets.pop_front()?;
        self.size_bytes -= accounted_size(&packet);
        self.duration -= packet.duration.0;
        Some(packet)
    }
}

/**
    Bytes charged to the queue for one packet: its payload plus the
    bookkeeping it carries while queued.
*/
fn accounted_size(packet: &Packet) -> usize {
    packet.size() + mem::size_of::<Packet>()
}

/**
    Thread-safe FIFO of compressed packets for one elementary stream.

    The queue is unbounded by count; instead it tracks buffered bytes and
    duration so the reader can apply backpressure (see
    [`PacketQueue::has_enough_packets`]).
*/
#[derive(Debug, Default)]
pub struct PacketQueue {
    state: Monitor<QueueState>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Append a packet. The packet is dropped if the queue is aborted.
    */
    pub fn push(&self, packet: Packet) -> Result<(), QueueError> {
        self.state.update(|state| {
            if state.abort {
                return Err(QueueError::Aborted);
            }
            state.size_bytes += accounted_size(&packet);
            state.duration += packet.duration.0;
            if !packet.is_flush() {
                state.time_base = Some(packet.time_base);
            }
            state.packets.push_back(packet);
            Ok(())
        })
    }

    /**
        Append a null packet, telling the decoder to drain its codec.
    */
    pub fn push_flush_packet(
        &self,
        stream_index: usize,
        stream_type: StreamType,
    ) -> Result<(), QueueError> {
        self.push(Packet::flush(stream_index, stream_type))
    }

    /**
        Remove the oldest packet.

        With `blocking` set this waits until a packet arrives or the queue
        is aborted; otherwise it returns [`QueueError::Empty`] right away.
    */
    pub fn pop(&self, blocking: bool) -> Result<Packet, QueueError> {
        self.pop_with_serial(blocking).map(|(packet, _)| packet)
    }

    /**
        Like [`PacketQueue::pop`], also returning the flush serial the
        packet was queued under.
    */
    pub fn pop_with_serial(&self, blocking: bool) -> Result<(Packet, u64), QueueError> {
        let mut state = self.state.lock();
        loop {
            if state.abort {
                return Err(QueueError::Aborted);
            }
            if let Some(packet) = state.take_front() {
                self.state.notify_all();
                return Ok((packet, state.serial));
            }
            if !blocking {
                return Err(QueueError::Empty);
            }
            self.state
                .wait_guard_while(&mut state, |s| !s.abort && s.packets.is_empty());
        }
    }

    /**
        Discard every queued packet and zero the counters.
    */
    pub fn flush(&self) {
        self.state.update(|state| {
            state.packets.clear();
            state.size_bytes = 0;
            state.duration = 0;
            state.serial += 1;
        });
    }

    /**
        Number of flushes so far. Anything obtained under an older serial
        predates the latest flush.
    */
    pub fn serial(&self) -> u64 {
        self.state.lock().serial
    }

    /**
        Make all current and future blocking pops return [`QueueError::Aborted`].
    */
    pub fn abort(&self) {
        self.state.update(|state| state.abort = true);
    }

    /**
        Clear the abort flag so the queue accepts packets again.
    */
    pub fn start(&self) {
        self.state.update(|state| state.abort = false);
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().abort
    }

    pub fn size_bytes(&self) -> usize {
        self.state.lock().size_bytes
    }

    pub fn packet_count(&self) -> usize {
        self.state.lock().packets.len()
    }

    /**
        Sum of the queued packet durations, in the stream time base.
    */
    pub fn duration(&self) -> MediaDuration {
        MediaDuration(self.state.lock().duration)
    }

    /**
        Returns true once the reader can stop feeding this stream for now.

        That is the case when the queue is aborted, or when it holds more
        than `min_frames` packets and either more than one second of media
        or packets of unknown duration.
    */
    pub fn has_enough_packets(&self, min_frames: usize) -> bool {
        let state = self.state.lock();
        if state.abort {
            return true;
        }
        let seconds = state
            .time_base
            .map(|tb| MediaDuration(state.duration).to_seconds(tb))
            .unwrap_or(0.0);
        state.packets.len() > min_frames && (state.duration == 0 || seconds > 1.0)
    }
}

static_assertions::assert_impl_all!(PacketQueue: Send, Sync);
