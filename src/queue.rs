// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded handoff of decode units from the receive thread to a decode thread.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::DecodeUnit;

struct State {
    items: VecDeque<DecodeUnit>,
    capacity: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

/// Why [`Queue::offer`] didn't take a unit.
pub(crate) enum OfferError {
    Full(DecodeUnit),

    /// The unit was released.
    Shutdown,
}

/// The producer side, owned by the depacketizer.
pub(crate) struct Queue(Arc<Shared>);

impl Queue {
    pub(crate) fn new(capacity: usize) -> Self {
        Queue(Arc::new(Shared {
            state: Mutex::new(State {
                items: VecDeque::new(),
                capacity,
                shutdown: false,
            }),
            available: Condvar::new(),
        }))
    }

    /// Enqueues `unit` without blocking.
    pub(crate) fn offer(&self, unit: DecodeUnit) -> Result<(), OfferError> {
        let mut l = self.0.state.lock();
        if l.shutdown {
            return Err(OfferError::Shutdown);
        }
        if l.items.len() >= l.capacity {
            return Err(OfferError::Full(unit));
        }
        l.items.push_back(unit);
        drop(l);
        self.0.available.notify_one();
        Ok(())
    }

    /// Releases everything queued, returning how many units were discarded.
    pub(crate) fn flush(&self) -> usize {
        let drained = std::mem::take(&mut self.0.state.lock().items);
        drained.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.0.state.lock().items.len()
    }

    pub(crate) fn receiver(&self) -> DecodeUnitReceiver {
        DecodeUnitReceiver(self.0.clone())
    }

    pub(crate) fn stop_handle(&self) -> StopHandle {
        StopHandle(Some(self.0.clone()))
    }

    /// Signals shutdown and releases everything queued.
    pub(crate) fn shutdown(&self) {
        let drained = {
            let mut l = self.0.state.lock();
            l.shutdown = true;
            std::mem::take(&mut l.items)
        };
        self.0.available.notify_all();
        drop(drained);
    }
}

/// The consumer side of the decode unit queue, for use on a decode thread.
///
/// Iterating yields decode units in frame order, blocking while the queue is
/// empty, and ends once the stream is stopped. Units still queued at that
/// point are discarded rather than returned.
///
/// ```no_run
/// # fn decode(_: &gamestream_video::DecodeUnit) {}
/// # fn f(receiver: gamestream_video::DecodeUnitReceiver) {
/// std::thread::spawn(move || {
///     for unit in receiver {
///         decode(&unit);
///     }
/// });
/// # }
/// ```
#[derive(Clone)]
pub struct DecodeUnitReceiver(Arc<Shared>);

impl DecodeUnitReceiver {
    /// Waits for the next decode unit, returning `None` once stopped.
    pub fn recv(&self) -> Option<DecodeUnit> {
        let mut l = self.0.state.lock();
        loop {
            if l.shutdown {
                return None;
            }
            if let Some(unit) = l.items.pop_front() {
                return Some(unit);
            }
            self.0.available.wait(&mut l);
        }
    }

    /// Returns the next decode unit if one is ready now.
    pub fn try_recv(&self) -> Option<DecodeUnit> {
        let mut l = self.0.state.lock();
        if l.shutdown {
            return None;
        }
        l.items.pop_front()
    }
}

impl Iterator for DecodeUnitReceiver {
    type Item = DecodeUnit;

    fn next(&mut self) -> Option<DecodeUnit> {
        self.recv()
    }
}

impl std::fmt::Debug for DecodeUnitReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let l = self.0.state.lock();
        f.debug_struct("DecodeUnitReceiver")
            .field("queued", &l.items.len())
            .field("shutdown", &l.shutdown)
            .finish()
    }
}

/// Stops the video stream from any thread, waking a decode thread blocked in
/// [`DecodeUnitReceiver::recv`].
///
/// Does nothing when decode units are submitted directly.
#[derive(Clone, Default)]
pub struct StopHandle(Option<Arc<Shared>>);

impl StopHandle {
    pub fn stop(&self) {
        if let Some(shared) = &self.0 {
            shared.state.lock().shutdown = true;
            shared.available.notify_all();
        }
    }

    pub fn is_stopped(&self) -> bool {
        match &self.0 {
            Some(shared) => shared.state.lock().shutdown,
            None => false,
        }
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StopHandle")
            .field(&self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use bytes::Bytes;

    use super::*;
    use crate::chain::NalChain;

    fn unit(frame_number: u32) -> DecodeUnit {
        let mut c = NalChain::default();
        c.push(Bytes::from_static(b"\x00\x00\x00\x01\x41"));
        c.finish(frame_number, Instant::now())
    }

    #[test]
    fn offer_full_and_flush() {
        let q = Queue::new(2);
        assert!(q.offer(unit(1)).is_ok());
        assert!(q.offer(unit(2)).is_ok());
        match q.offer(unit(3)) {
            Err(OfferError::Full(u)) => assert_eq!(u.frame_number(), 3),
            _ => panic!("expected full"),
        }
        assert_eq!(q.flush(), 2);
        assert_eq!(q.len(), 0);
        assert!(q.offer(unit(4)).is_ok());
        assert_eq!(q.receiver().try_recv().unwrap().frame_number(), 4);
    }

    #[test]
    fn in_order() {
        let q = Queue::new(15);
        let mut r = q.receiver();
        for i in 1..=3 {
            assert!(q.offer(unit(i)).is_ok());
        }
        assert_eq!(r.next().unwrap().frame_number(), 1);
        assert_eq!(r.recv().unwrap().frame_number(), 2);
        assert_eq!(r.try_recv().unwrap().frame_number(), 3);
        assert!(r.try_recv().is_none());
    }

    #[test]
    fn shutdown_ends_stream() {
        let q = Queue::new(15);
        let r = q.receiver();
        assert!(q.offer(unit(1)).is_ok());
        q.stop_handle().stop();
        assert!(q.stop_handle().is_stopped());

        // Units queued before shutdown are not delivered.
        assert!(r.recv().is_none());
        assert!(matches!(q.offer(unit(2)), Err(OfferError::Shutdown)));
    }

    #[test]
    fn unbounded_capacity() {
        let q = Queue::new(usize::MAX);
        for i in 1..=20 {
            assert!(q.offer(unit(i)).is_ok());
        }
        assert_eq!(q.len(), 20);
        assert_eq!(q.receiver().recv().unwrap().frame_number(), 1);
    }

    #[test]
    fn stop_wakes_blocked_consumer() {
        let q = Queue::new(15);
        let r = q.receiver();
        let stop = q.stop_handle();
        let consumer = std::thread::spawn(move || {
            let first = r.recv().map(|u| u.frame_number());
            (first, r.recv().is_none())
        });
        std::thread::sleep(Duration::from_millis(10));
        assert!(q.offer(unit(1)).is_ok());
        while q.len() > 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        stop.stop();
        assert_eq!(consumer.join().unwrap(), (Some(1), true));
    }

    #[test]
    fn direct_mode_stop_handle() {
        let h = StopHandle::default();
        h.stop();
        assert!(!h.is_stopped());
    }
}
