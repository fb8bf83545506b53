/*!
    Threaded video decoder feeding a frame queue.
*/

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use playback_types::{Packet, VideoFrame, VideoStreamInfo};

use super::{DecoderCore, MediaDecoder};
use crate::codec::CodecContext;
use crate::config::EngineConfig;
use crate::error::{CodecError, EngineError, EngineResult, QueueError};
use crate::frame_queue::FrameQueue;
use crate::monitor::Monitor;
use crate::state::{PtsReorder, SharedState};
use crate::sync::MasterClock;

struct VideoInner<C> {
    core: DecoderCore<C>,
    info: VideoStreamInfo,
    frames: FrameQueue,
    /// Packet the codec refused with `Again`, with its flush serial.
    pending: Mutex<Option<(Packet, u64)>>,
    master_clock: Mutex<Option<Arc<dyn MasterClock>>>,
    no_sync_threshold: f64,
    exited: Monitor<bool>,
}

/**
    Video decoder with a dedicated decode thread.

    The thread pops packets (blocking), decodes them and pushes frames into
    its [`FrameQueue`], blocking while the queue is full. Frames that are
    already late against the master clock are dropped here, before they
    ever reach the queue.
*/
pub struct VideoDecoder<C> {
    inner: Arc<VideoInner<C>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<C: CodecContext<Frame = VideoFrame>> VideoDecoder<C> {
    pub fn new(state: SharedState, codec: C, info: VideoStreamInfo, config: &EngineConfig) -> Self {
        Self {
            inner: Arc::new(VideoInner {
                core: DecoderCore::new(state, codec, info.index, info.attached_pic, config),
                frames: FrameQueue::new(config.frame_queue_capacity(), true),
                info,
                pending: Mutex::new(None),
                master_clock: Mutex::new(None),
                no_sync_threshold: config.no_sync_threshold,
                exited: Monitor::new(true),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn info(&self) -> &VideoStreamInfo {
        &self.inner.info
    }

    pub fn frames(&self) -> &FrameQueue {
        &self.inner.frames
    }
}

impl<C: CodecContext<Frame = VideoFrame>> VideoInner<C> {
    fn run(&self) {
        debug!(stream = self.core.stream_index, "video decode thread started");
        self.decode_loop();
        self.exited.update(|exited| *exited = true);
        debug!(stream = self.core.stream_index, "video decode thread exited");
    }

    fn decode_loop(&self) {
        let mut decoded = Vec::new();
        loop {
            if self.core.is_aborted() {
                return;
            }
            if self.core.state.is_seek_requested() {
                if self.core.state.wait_while_seeking() {
                    return;
                }
                continue;
            }

            let pending = self.pending.lock().take();
            let (packet, serial) = match pending {
                Some(pending) => pending,
                None => match self.core.packets.pop_with_serial(true) {
                    Ok(popped) => popped,
                    Err(QueueError::Aborted | QueueError::Empty) => return,
                },
            };

            {
                let _codec_guard = self.core.state.lock_codec();
                if self.core.packets.serial() != serial {
                    trace!(stream = self.core.stream_index, "packet from before flush discarded");
                    continue;
                }
                let mut codec = self.core.codec.lock();
                match codec.send_packet(&packet) {
                    Ok(()) | Err(CodecError::Eof) => {}
                    Err(CodecError::Again) => *self.pending.lock() = Some((packet, serial)),
                    Err(CodecError::Failed(e)) => {
                        warn!(stream = self.core.stream_index, "video packet rejected: {e}");
                    }
                }
                loop {
                    match codec.receive_frame() {
                        Ok(frame) => decoded.push(frame),
                        Err(CodecError::Again | CodecError::Eof) => break,
                        Err(CodecError::Failed(e)) => {
                            warn!(stream = self.core.stream_index, "video frame dropped: {e}");
                            break;
                        }
                    }
                }
            }

            for frame in decoded.drain(..) {
                if !self.queue_frame(frame, serial) {
                    return;
                }
            }
        }
    }

    fn frame_pts(&self, frame: &VideoFrame) -> f64 {
        let pts = match self.core.state.snapshot().reorder_video_pts {
            PtsReorder::BestEffort => frame.best_effort_pts,
            PtsReorder::DecodeOrder => frame.pkt_dts,
        };
        pts.map_or(f64::NAN, |pts| pts.to_seconds(self.info.time_base))
    }

    /**
        Decode-time drop: a frame is discarded when it is already behind
        the master clock and more packets are waiting to replace it.
    */
    fn is_late(&self, pts: f64) -> bool {
        let Some(master) = self.master_clock.lock().clone() else {
            return false;
        };
        if !self.core.state.frame_drop() || pts.is_nan() {
            return false;
        }
        let diff = pts - master.master_clock();
        !diff.is_nan()
            && diff.abs() < self.no_sync_threshold
            && diff < 0.0
            && self.core.packets.packet_count() > 0
    }

    /**
        Returns false once the frame queue is aborted.

        The serial is checked while the slot is held, so a concurrent flush
        either sees the frame in the queue or the frame sees the flush.
    */
    fn queue_frame(&self, frame: VideoFrame, serial: u64) -> bool {
        let pts = self.frame_pts(&frame);
        if self.is_late(pts) {
            trace!(pts, "late video frame dropped before queueing");
            return true;
        }
        let Some(mut slot) = self.frames.peek_writable() else {
            return false;
        };
        if self.core.packets.serial() != serial {
            return true;
        }
        slot.pts = pts;
        slot.duration = self.info.frame_duration();
        slot.width = frame.width;
        slot.height = frame.height;
        slot.format = frame.format;
        slot.uploaded = false;
        slot.serial = serial;
        slot.frame = Some(frame);
        slot.push();
        true
    }
}

impl<C: CodecContext<Frame = VideoFrame>> MediaDecoder for VideoDecoder<C> {
    fn start(&self) -> EngineResult<()> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }
        self.inner.core.packets.start();
        self.inner.frames.start();
        self.inner.exited.update(|exited| *exited = false);

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("video-decoder".into())
            .spawn(move || inner.run())
            .map_err(|source| {
                self.inner.exited.update(|exited| *exited = true);
                EngineError::Spawn {
                    name: "video decoder",
                    source,
                }
            })?;
        *thread = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        self.inner.core.packets.abort();
        self.inner.frames.abort();
        drop(self.inner.exited.wait_while(|exited| !*exited));
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("video decode thread panicked");
            }
        }
    }

    fn flush(&self) {
        self.inner.core.flush_with(|| {
            self.inner.pending.lock().take();
        });
        self.inner.frames.flush();
    }

    fn push_packet(&self, packet: Packet) -> Result<(), QueueError> {
        self.inner.core.packets.push(packet)
    }

    fn packet_count(&self) -> usize {
        self.inner.core.packets.packet_count()
    }

    fn has_enough_packets(&self) -> bool {
        self.inner.core.has_enough_packets()
    }

    fn memory_size(&self) -> usize {
        self.inner.core.packets.size_bytes()
    }

    fn stream_index(&self) -> usize {
        self.inner.core.stream_index
    }

    fn frame_queue(&self) -> Option<&FrameQueue> {
        Some(&self.inner.frames)
    }

    fn set_master_clock(&self, clock: Option<Arc<dyn MasterClock>>) {
        *self.inner.master_clock.lock() = clock;
    }
}

impl<C> Drop for VideoDecoder<C> {
    fn drop(&mut self) {
        self.inner.core.packets.abort();
        self.inner.frames.abort();
        if let Some(handle) = self.thread.get_mut().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
impl VideoDecoder<crate::decoder::testing::PassthroughVideo> {
    pub(crate) fn codec_flush_count(&self) -> usize {
        self.inner.core.codec.lock().flushed
    }
}
