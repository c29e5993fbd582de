//! Variable-length message buffer for single-reader, single-writer framing.
//!
//! A [`MessageBuffer`] stores discrete byte messages in a fixed ring. Each
//! message is stored with a two-byte little-endian length prefix, so the
//! reader always gets whole messages back, never partial ones. Like the
//! typed queues, every operation has blocking, timeout and interrupt-safe
//! forms with the crate's dual-context rules.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::context;

const PREFIX_LEN: usize = 2;

struct Ring<const N: usize> {
    data: [u8; N],
    head: usize,
    len: usize,
}

impl<const N: usize> Ring<N> {
    fn write(&mut self, bytes: &[u8]) {
        let mut at = (self.head + self.len) % N;
        for &byte in bytes {
            self.data[at] = byte;
            at = (at + 1) % N;
        }
        self.len += bytes.len();
    }

    fn read(&mut self, out: &mut [u8]) {
        for slot in out.iter_mut() {
            *slot = self.data[self.head];
            self.head = (self.head + 1) % N;
        }
        self.len -= out.len();
    }

    fn peek_prefix(&self) -> usize {
        let lo = self.data[self.head];
        let hi = self.data[(self.head + 1) % N];
        u16::from_le_bytes([lo, hi]) as usize
    }
}

/// Byte-stream buffer carrying length-prefixed messages.
pub struct MessageBuffer<const N: usize> {
    ring: Mutex<Ring<N>>,
    readable: Condvar,
    writable: Condvar,
}

impl<const N: usize> MessageBuffer<N> {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(Ring {
                data: [0; N],
                head: 0,
                len: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Total capacity in bytes, including the per-message prefixes.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes currently stored, prefixes included.
    pub fn fill_level(&self) -> usize {
        self.ring.lock().len
    }

    /// Whether any complete message is waiting.
    pub fn is_empty(&self) -> bool {
        self.fill_level() == 0
    }

    /// Writes one message, blocking while the buffer lacks room.
    ///
    /// Returns `false` for messages that can never fit (larger than the
    /// whole buffer minus the prefix) without blocking.
    pub fn send(&self, message: &[u8]) -> bool {
        self.send_deadline(message, None)
    }

    /// Writes one message, giving up after `timeout`.
    pub fn send_timeout(&self, message: &[u8], timeout: Duration) -> bool {
        self.send_deadline(message, Some(Instant::now() + timeout))
    }

    /// Writes one message only if room is free right now.
    pub fn try_send(&self, message: &[u8]) -> bool {
        if !fits::<N>(message.len()) {
            return false;
        }
        let woke;
        {
            let mut ring = self.ring.lock();
            if N - ring.len < PREFIX_LEN + message.len() {
                return false;
            }
            write_message(&mut ring, message);
            woke = self.readable.notify_one();
        }
        context::note_wakeup(woke);
        true
    }

    fn send_deadline(&self, message: &[u8], deadline: Option<Instant>) -> bool {
        if context::in_interrupt() {
            return self.try_send(message);
        }
        if !fits::<N>(message.len()) {
            return false;
        }

        let woke;
        {
            let mut ring = self.ring.lock();
            while N - ring.len < PREFIX_LEN + message.len() {
                match deadline {
                    None => self.writable.wait(&mut ring),
                    Some(at) => {
                        if self.writable.wait_until(&mut ring, at).timed_out()
                            && N - ring.len < PREFIX_LEN + message.len()
                        {
                            return false;
                        }
                    }
                }
            }
            write_message(&mut ring, message);
            woke = self.readable.notify_one();
        }
        context::note_wakeup(woke);
        true
    }

    /// Reads the next message into `out`, blocking while the buffer is
    /// empty. Returns the message length.
    ///
    /// A message longer than `out` is left in place and `0` is returned, so
    /// an undersized caller can retry with a bigger buffer.
    pub fn receive(&self, out: &mut [u8]) -> usize {
        self.receive_deadline(out, None)
    }

    /// Reads the next message, giving up after `timeout`.
    pub fn receive_timeout(&self, out: &mut [u8], timeout: Duration) -> usize {
        self.receive_deadline(out, Some(Instant::now() + timeout))
    }

    /// Reads the next message only if one is already complete.
    pub fn try_receive(&self, out: &mut [u8]) -> usize {
        let taken;
        let woke;
        {
            let mut ring = self.ring.lock();
            if ring.len == 0 {
                return 0;
            }
            taken = read_message(&mut ring, out);
            woke = if taken > 0 {
                self.writable.notify_one()
            } else {
                false
            };
        }
        context::note_wakeup(woke);
        taken
    }

    fn receive_deadline(&self, out: &mut [u8], deadline: Option<Instant>) -> usize {
        if context::in_interrupt() {
            return self.try_receive(out);
        }

        let taken;
        let woke;
        {
            let mut ring = self.ring.lock();
            while ring.len == 0 {
                match deadline {
                    None => self.readable.wait(&mut ring),
                    Some(at) => {
                        if self.readable.wait_until(&mut ring, at).timed_out() && ring.len == 0 {
                            return 0;
                        }
                    }
                }
            }
            taken = read_message(&mut ring, out);
            woke = if taken > 0 {
                self.writable.notify_one()
            } else {
                false
            };
        }
        context::note_wakeup(woke);
        taken
    }
}

impl<const N: usize> Default for MessageBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

const fn fits<const N: usize>(message_len: usize) -> bool {
    message_len <= u16::MAX as usize && PREFIX_LEN + message_len <= N
}

fn write_message<const N: usize>(ring: &mut Ring<N>, message: &[u8]) {
    let prefix = (message.len() as u16).to_le_bytes();
    ring.write(&prefix);
    ring.write(message);
}

/// Returns the message length, or 0 when `out` is too small (the message
/// stays buffered).
fn read_message<const N: usize>(ring: &mut Ring<N>, out: &mut [u8]) -> usize {
    let len = ring.peek_prefix();
    if len > out.len() {
        return 0;
    }
    let mut prefix = [0u8; PREFIX_LEN];
    ring.read(&mut prefix);
    ring.read(&mut out[..len]);
    len
}
