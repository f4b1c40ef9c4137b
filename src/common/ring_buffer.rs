//! lock free handoff between the jack callback and the network thread
//!
//! One [`FramePipe`] per stream, split into a producer and a consumer end
//! so each thread owns exactly one side.  Built on [`rtrb`]'s wait free
//! SPSC ring.  Neither side ever blocks: a full ring drops the newest item
//! (drop-newest policy) and counts an overrun, an empty ring returns
//! nothing and counts an underrun.  The counters are relaxed atomics so
//! the status reporter can read them from the control thread.
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// rings hold a few cycles of slack between the two threads
pub const DEFAULT_PIPE_CAPACITY: usize = 4;

pub struct FramePipe;

impl FramePipe {
    /// build a pipe and split it into its two ends
    pub fn build<T>(capacity: usize) -> (FrameProducer<T>, FrameConsumer<T>) {
        let (tx, rx) = RingBuffer::new(capacity);
        let overruns = Arc::new(AtomicUsize::new(0));
        let underruns = Arc::new(AtomicUsize::new(0));
        (
            FrameProducer {
                tx,
                overruns: overruns.clone(),
                underruns: underruns.clone(),
            },
            FrameConsumer {
                rx,
                overruns,
                underruns,
            },
        )
    }
}

/// write end, owned by exactly one thread
pub struct FrameProducer<T> {
    tx: Producer<T>,
    overruns: Arc<AtomicUsize>,
    underruns: Arc<AtomicUsize>,
}

impl<T> FrameProducer<T> {
    /// push an item, never blocking.  false means the ring was full and
    /// the item was dropped.
    pub fn try_push(&mut self, item: T) -> bool {
        match self.tx.push(item) {
            Ok(()) => true,
            Err(_) => {
                self.overruns.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
    /// free slots right now (consumer may free more at any time)
    pub fn slots(&self) -> usize {
        self.tx.slots()
    }
    pub fn get_overruns(&self) -> usize {
        self.overruns.load(Ordering::Relaxed)
    }
    pub fn get_underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// read end, owned by exactly one thread
pub struct FrameConsumer<T> {
    rx: Consumer<T>,
    overruns: Arc<AtomicUsize>,
    underruns: Arc<AtomicUsize>,
}

impl<T> FrameConsumer<T> {
    /// pop the oldest item, never blocking.  None means empty.
    pub fn try_pop(&mut self) -> Option<T> {
        match self.rx.pop() {
            Ok(item) => Some(item),
            Err(_) => {
                self.underruns.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
    /// items waiting right now
    pub fn slots(&self) -> usize {
        self.rx.slots()
    }
    pub fn get_overruns(&self) -> usize {
        self.overruns.load(Ordering::Relaxed)
    }
    pub fn get_underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }
    /// throw away anything still queued (used when a stream stops)
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.rx.pop().is_ok() {
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod test_frame_pipe {
    use super::*;

    #[test]
    fn push_and_pop_in_order() {
        // It should be a FIFO
        let (mut tx, mut rx) = FramePipe::build::<u32>(4);
        assert!(tx.try_push(1));
        assert!(tx.try_push(2));
        assert_eq!(rx.try_pop(), Some(1));
        assert_eq!(rx.try_pop(), Some(2));
    }

    #[test]
    fn overrun_drops_newest() {
        // capacity + 1 pushes: exactly one overrun, oldest items retained
        let (mut tx, mut rx) = FramePipe::build::<u32>(4);
        for n in 0..4 {
            assert!(tx.try_push(n));
        }
        assert!(!tx.try_push(99));
        assert_eq!(tx.get_overruns(), 1);
        for n in 0..4 {
            assert_eq!(rx.try_pop(), Some(n));
        }
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn underrun_counts() {
        // popping empty is not an error, just a counter
        let (tx, mut rx) = FramePipe::build::<u32>(2);
        assert_eq!(rx.try_pop(), None);
        assert_eq!(rx.try_pop(), None);
        assert_eq!(tx.get_underruns(), 2);
    }

    #[test]
    fn drain_empties_the_pipe() {
        let (mut tx, mut rx) = FramePipe::build::<u32>(4);
        tx.try_push(1);
        tx.try_push(2);
        assert_eq!(rx.drain(), 2);
        assert_eq!(rx.slots(), 0);
    }

    #[test]
    fn across_threads() {
        // one producer thread, one consumer thread, everything arrives once
        let (mut tx, mut rx) = FramePipe::build::<u32>(8);
        let writer = std::thread::spawn(move || {
            let mut n = 0;
            while n < 100 {
                if tx.try_push(n) {
                    n += 1;
                }
            }
        });
        let mut seen = 0;
        let mut expect = 0;
        while seen < 100 {
            if let Some(v) = rx.try_pop() {
                assert_eq!(v, expect);
                expect += 1;
                seen += 1;
            }
        }
        writer.join().unwrap();
    }
}
