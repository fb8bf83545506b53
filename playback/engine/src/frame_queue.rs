/*!
    Fixed-capacity ring of decoded video frames.
*/

use std::ops::{Deref, DerefMut};

use parking_lot::{MappedMutexGuard, MutexGuard};

use playback_types::{PixelFormat, VideoFrame};

use crate::config::FRAME_QUEUE_SIZE;
use crate::monitor::Monitor;

/**
    One slot of a [`FrameQueue`].

    Slots are allocated once with the queue and reused; popping releases
    the decoded picture but keeps the slot.
*/
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded picture, `None` once released.
    pub frame: Option<VideoFrame>,
    /// Presentation time in seconds, NaN if unknown.
    pub pts: f64,
    /// Estimated display duration in seconds, 0 if unknown.
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Set by the renderer once the picture has been handed to the device.
    pub uploaded: bool,
    /// Packet queue flush serial the picture was decoded under.
    pub serial: u64,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            frame: None,
            pts: f64::NAN,
            duration: 0.0,
            width: 0,
            height: 0,
            format: PixelFormat::default(),
            uploaded: false,
            serial: 0,
        }
    }
}

impl Frame {
    fn unref(&mut self) {
        self.frame = None;
        self.uploaded = false;
    }
}

#[derive(Debug)]
struct Ring {
    slots: Vec<Frame>,
    rindex: usize,
    windex: usize,
    size: usize,
    rindex_shown: usize,
    keep_last: bool,
    abort: bool,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn current_index(&self) -> usize {
        (self.rindex + self.rindex_shown) % self.capacity()
    }

    fn next_index(&self) -> usize {
        (self.rindex + self.rindex_shown + 1) % self.capacity()
    }

    fn remaining(&self) -> usize {
        self.size - self.rindex_shown
    }

    fn pop(&mut self) {
        if self.remaining() == 0 {
            return;
        }
        if self.keep_last && self.rindex_shown == 0 {
            self.rindex_shown = 1;
            return;
        }
        let rindex = self.rindex;
        self.slots[rindex].unref();
        self.rindex = (rindex + 1) % self.capacity();
        self.size -= 1;
    }
}

/**
    Circular buffer of decoded frames with "keep last shown" semantics.

    With `keep_last` set, the most recently presented frame stays in the
    queue (at [`FrameView::last`]) so the scheduler can measure the gap to
    the next frame and the renderer can redraw it while paused, but it no
    longer counts towards [`FrameQueue::size`].
*/
#[derive(Debug)]
pub struct FrameQueue {
    ring: Monitor<Ring>,
}

impl FrameQueue {
    /**
        Create a queue of `capacity` slots, clamped to `1..=FRAME_QUEUE_SIZE`.
    */
    pub fn new(capacity: usize, keep_last: bool) -> Self {
        let capacity = capacity.clamp(1, FRAME_QUEUE_SIZE);
        Self {
            ring: Monitor::new(Ring {
                slots: vec![Frame::default(); capacity],
                rindex: 0,
                windex: 0,
                size: 0,
                rindex_shown: 0,
                keep_last,
                abort: false,
            }),
        }
    }

    /**
        Wait for a free slot and return it for writing.

        Blocks while the queue is full; returns `None` once aborted. Nothing
        becomes visible to readers until [`WritableFrame::push`] is called.
    */
    pub fn peek_writable(&self) -> Option<WritableFrame<'_>> {
        let ring = self
            .ring
            .wait_while(|ring| ring.size >= ring.capacity() && !ring.abort);
        if ring.abort {
            return None;
        }
        Some(WritableFrame { queue: self, ring })
    }

    /**
        Consume the current frame.

        The first pop of a `keep_last` queue only marks the frame as shown.
    */
    pub fn pop(&self) {
        self.ring.update(Ring::pop);
    }

    /**
        Lock the queue for inspecting several frames at once.
    */
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            ring: self.ring.lock(),
        }
    }

    /**
        The next frame to present.
    */
    pub fn current(&self) -> MappedMutexGuard<'_, Frame> {
        MutexGuard::map(self.ring.lock(), |ring| {
            let index = ring.current_index();
            &mut ring.slots[index]
        })
    }

    /**
        The frame after [`FrameQueue::current`].
    */
    pub fn next(&self) -> MappedMutexGuard<'_, Frame> {
        MutexGuard::map(self.ring.lock(), |ring| {
            let index = ring.next_index();
            &mut ring.slots[index]
        })
    }

    /**
        The most recently shown frame.
    */
    pub fn last(&self) -> MappedMutexGuard<'_, Frame> {
        MutexGuard::map(self.ring.lock(), |ring| {
            let index = ring.rindex;
            &mut ring.slots[index]
        })
    }

    /**
        Number of frames not yet shown.
    */
    pub fn size(&self) -> usize {
        self.ring.lock().remaining()
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    /**
        Returns true once a frame has been shown from this queue.
    */
    pub fn show_index(&self) -> bool {
        self.ring.lock().rindex_shown != 0
    }

    /**
        Pop until no unshown frame remains.
    */
    pub fn flush(&self) {
        self.ring.update(|ring| {
            while ring.remaining() > 0 {
                ring.pop();
            }
        });
    }

    /**
        Wake blocked writers and make every later [`FrameQueue::peek_writable`] return `None`.
    */
    pub fn abort(&self) {
        self.ring.update(|ring| ring.abort = true);
    }

    pub fn start(&self) {
        self.ring.update(|ring| ring.abort = false);
    }

    pub fn is_aborted(&self) -> bool {
        self.ring.lock().abort
    }
}

static_assertions::assert_impl_all!(FrameQueue: Send, Sync);

/**
    A free slot obtained from [`FrameQueue::peek_writable`].

    Holds the queue lock until pushed or dropped.
*/
pub struct WritableFrame<'a> {
    queue: &'a FrameQueue,
    ring: MutexGuard<'a, Ring>,
}

impl WritableFrame<'_> {
    /**
        Commit the slot, making it visible to readers.
    */
    pub fn push(mut self) {
        let capacity = self.ring.capacity();
        self.ring.windex = (self.ring.windex + 1) % capacity;
        self.ring.size += 1;
        drop(self.ring);
        self.queue.ring.notify_all();
    }
}

impl Deref for WritableFrame<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.ring.slots[self.ring.windex]
    }
}

impl DerefMut for WritableFrame<'_> {
    fn deref_mut(&mut self) -> &mut Frame {
        let windex = self.ring.windex;
        &mut self.ring.slots[windex]
    }
}

/**
    Locked view of a [`FrameQueue`], see [`FrameQueue::view`].
*/
pub struct FrameView<'a> {
    ring: MutexGuard<'a, Ring>,
}

impl FrameView<'_> {
    pub fn current(&self) -> &Frame {
        &self.ring.slots[self.ring.current_index()]
    }

    pub fn next(&self) -> &Frame {
        &self.ring.slots[self.ring.next_index()]
    }

    pub fn last(&self) -> &Frame {
        &self.ring.slots[self.ring.rindex]
    }

    pub fn last_mut(&mut self) -> &mut Frame {
        let rindex = self.ring.rindex;
        &mut self.ring.slots[rindex]
    }

    pub fn size(&self) -> usize {
        self.ring.remaining()
    }

    pub fn show_index(&self) -> bool {
        self.ring.rindex_shown != 0
    }
}
