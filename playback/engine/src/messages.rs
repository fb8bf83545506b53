/*!
    Notifications from the engine to the controller.
*/

use std::collections::VecDeque;

use crate::error::QueueError;
use crate::monitor::Monitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerMessage {
    /// Playback progress, in milliseconds.
    CurrentPosition { position_ms: i64, duration_ms: i64 },
    /// A seek finished; `ok` is false if the reader failed to seek.
    SeekComplete { position_ms: i64, ok: bool },
}

#[derive(Debug, Default)]
struct MessageState {
    messages: VecDeque<PlayerMessage>,
    abort: bool,
}

/**
    FIFO of [`PlayerMessage`]s, posted by engine threads and drained by the controller.
*/
#[derive(Debug, Default)]
pub struct MessageQueue {
    state: Monitor<MessageState>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Queue a message. Messages posted after [`MessageQueue::abort`] are dropped.
    */
    pub fn post(&self, message: PlayerMessage) {
        self.state.update(|state| {
            if !state.abort {
                state.messages.push_back(message);
            }
        });
    }

    /**
        Take the oldest message, optionally waiting for one.
    */
    pub fn get(&self, blocking: bool) -> Result<PlayerMessage, QueueError> {
        let mut state = if blocking {
            self.state
                .wait_while(|state| !state.abort && state.messages.is_empty())
        } else {
            self.state.lock()
        };
        if state.abort {
            return Err(QueueError::Aborted);
        }
        state.messages.pop_front().ok_or(QueueError::Empty)
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) {
        self.state.update(|state| state.messages.clear());
    }

    pub fn abort(&self) {
        self.state.update(|state| state.abort = true);
    }

    pub fn start(&self) {
        self.state.update(|state| state.abort = false);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn messages_are_fifo() {
        let queue = MessageQueue::new();
        queue.post(PlayerMessage::CurrentPosition {
            position_ms: 10,
            duration_ms: 100,
        });
        queue.post(PlayerMessage::SeekComplete {
            position_ms: 50,
            ok: true,
        });
        assert!(matches!(
            queue.get(false),
            Ok(PlayerMessage::CurrentPosition { position_ms: 10, .. })
        ));
        assert!(matches!(queue.get(false), Ok(PlayerMessage::SeekComplete { .. })));
        assert_eq!(queue.get(false), Err(QueueError::Empty));
    }

    #[test]
    fn blocking_get_wakes_on_post() {
        let queue = Arc::new(MessageQueue::new());
        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get(true))
        };
        queue.post(PlayerMessage::SeekComplete {
            position_ms: 0,
            ok: true,
        });
        assert!(reader.join().unwrap().is_ok());
    }

    #[test]
    fn abort_drops_later_posts() {
        let queue = MessageQueue::new();
        queue.abort();
        queue.post(PlayerMessage::SeekComplete {
            position_ms: 0,
            ok: true,
        });
        assert_eq!(queue.get(true), Err(QueueError::Aborted));
        queue.start();
        assert!(queue.is_empty());
    }
}
