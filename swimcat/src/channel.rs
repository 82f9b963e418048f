use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::{Spin, Yield};

/// The byte sequence a host scans target memory for.
pub const SIGNATURE: [u8; 2] = [b'S', 0xB9];

/// Capacity assumed by a scanner when no size indicator follows the signature.
pub const DEFAULT_CAPACITY: usize = 8;

/// Smallest supported capacity (3 bits).
pub const MIN_CAPACITY: usize = 8;

/// Largest supported capacity (7 bits). Both cursors must fit in one byte.
pub const MAX_CAPACITY: usize = 128;

/// High bit of the size indicator byte. The low bits hold log2 of the capacity.
pub const SIZE_INDICATOR: u8 = 0x80;

/// Flag bit: block the writer instead of dropping bytes when the buffer is full.
pub const FLAG_BLOCK: u8 = 1 << 0;

/// Returned when a byte is dropped because the buffer is full and blocking is disabled.
///
/// This is the "no listener" outcome: either no host is attached or it has not drained the buffer
/// yet. The firmware is expected to carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dropped;

impl fmt::Display for Dropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("swimcat buffer full, byte dropped")
    }
}

/// A single-producer, single-consumer byte ring living in static memory.
///
/// The producer is the firmware, calling [`write_byte`](Self::write_byte). The consumer is a host
/// reading target memory through a debug probe: it locates the channel by its [`SIGNATURE`],
/// copies bytes out of the storage and advances the read cursor in target RAM.
///
/// `N` is the capacity in bytes, a power of two between [`MIN_CAPACITY`] and [`MAX_CAPACITY`].
/// `Y` is called on every iteration of a spin-wait, see [`Yield`].
///
/// # Cursors
///
/// Both cursors count modulo `2 * N`, one bit more than a slot index needs. Equal cursors always
/// mean "empty", and a full buffer has cursors that point at the same slot but differ in that
/// extra bit. No slot is wasted and no separate count is needed.
#[repr(C)]
pub struct RingChannel<const N: usize = DEFAULT_CAPACITY, Y: Yield = Spin> {
    // `[0, 'S', 0xB9]` for the default capacity, `['S', 0xB9, size indicator]` otherwise.
    preamble: [u8; 3],
    read_cursor: AtomicU8,
    write_cursor: AtomicU8,
    storage: UnsafeCell<[u8; N]>,
    flags: AtomicU8,
    _yield: PhantomData<fn() -> Y>,
}

// SAFETY: Storage is written by the single producer only, in the slot at the write cursor, which is
// never part of the range the host may read. Cursors and flags are atomics.
unsafe impl<const N: usize, Y: Yield> Sync for RingChannel<N, Y> {}

impl<const N: usize, Y: Yield> RingChannel<N, Y> {
    const VALID: () = assert!(
        N.is_power_of_two() && N >= MIN_CAPACITY && N <= MAX_CAPACITY,
        "swimcat capacity must be a power of two between 8 and 128"
    );

    const BITS: u8 = N.trailing_zeros() as u8;
    const SLOT_MASK: u8 = (N - 1) as u8;
    const CURSOR_MASK: u8 = (2 * N - 1) as u8;

    const PREAMBLE: [u8; 3] = if N == DEFAULT_CAPACITY {
        [0, SIGNATURE[0], SIGNATURE[1]]
    } else {
        [SIGNATURE[0], SIGNATURE[1], SIZE_INDICATOR | Self::BITS]
    };

    /// The capacity in bytes.
    pub const CAPACITY: usize = N;

    /// Offset of the signature from the start of the struct.
    pub const SIGNATURE_OFFSET: usize = if N == DEFAULT_CAPACITY { 1 } else { 0 };

    /// Creates an empty channel. Meant to initialize a `static`.
    ///
    /// `blocking` sets the initial value of [`FLAG_BLOCK`]. A host may change it later.
    ///
    /// A capacity outside the supported range fails to compile.
    pub const fn new(blocking: bool) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID;

        Self {
            preamble: Self::PREAMBLE,
            read_cursor: AtomicU8::new(0),
            write_cursor: AtomicU8::new(0),
            storage: UnsafeCell::new([0; N]),
            flags: AtomicU8::new(if blocking { FLAG_BLOCK } else { 0 }),
            _yield: PhantomData,
        }
    }

    /// Returns the capacity in bytes.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Returns the size indicator byte following the signature, or `None` for the default
    /// capacity, which has none.
    pub const fn size_indicator(&self) -> Option<u8> {
        if N == DEFAULT_CAPACITY {
            None
        } else {
            Some(SIZE_INDICATOR | Self::BITS)
        }
    }

    /// Returns the address of the signature in memory, which is where a host scan finds the
    /// channel.
    pub fn signature_ptr(&self) -> *const u8 {
        self.preamble[Self::SIGNATURE_OFFSET..].as_ptr()
    }

    /// Returns `true` if writes block when the buffer is full.
    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & FLAG_BLOCK != 0
    }

    /// Returns the number of bytes written and not yet drained by the host.
    #[inline]
    pub fn occupied(&self) -> usize {
        let (write, read) = self.cursors();
        Self::occupied_between(write, read)
    }

    /// Returns the number of bytes that can be written without dropping or blocking.
    #[inline]
    pub fn free(&self) -> usize {
        let (write, read) = self.cursors();
        Self::free_between(write, read)
    }

    /// Returns `true` once the host has drained everything written so far.
    #[inline]
    pub fn is_empty(&self) -> bool {
        let (write, read) = self.cursors();
        write == read
    }

    /// Writes one byte.
    ///
    /// When the buffer is full and blocking is disabled the byte is dropped and [`Dropped`] is
    /// returned. When blocking is enabled this spins, calling [`Yield::yield_now`] on every
    /// iteration, until the host frees a slot. That wait is unbounded: only enable blocking when a
    /// host is guaranteed to drain the buffer.
    ///
    /// Returns the byte on success. Only one execution context may write to a channel.
    pub fn write_byte(&self, byte: u8) -> Result<u8, Dropped> {
        let write = loop {
            // The host mutates the read cursor and the flags behind our back, reload both on every
            // iteration.
            let (write, read) = self.cursors();
            if Self::free_between(write, read) > 0 {
                break write;
            }
            if !self.is_blocking() {
                return Err(Dropped);
            }
            Y::yield_now();
        };

        // SAFETY: Single producer. The slot at the write cursor lies outside `read..write`, so the
        // host does not read it until the cursor below is published.
        unsafe {
            let slot = (self.storage.get() as *mut u8).add((write & Self::SLOT_MASK) as usize);
            slot.write_volatile(byte);
        }

        self.write_cursor.store(
            write.wrapping_add(1) & Self::CURSOR_MASK,
            Ordering::Release,
        );

        Ok(byte)
    }

    /// Writes bytes until one is dropped and returns how many were written.
    pub fn write_bytes(&self, bytes: &[u8]) -> usize {
        bytes
            .iter()
            .take_while(|&&byte| self.write_byte(byte).is_ok())
            .count()
    }

    /// Waits until the host has drained the buffer.
    ///
    /// Does nothing unless blocking is enabled: without a cooperating host there is no way to know
    /// when the buffer is drained. The flag is re-read on every iteration, so a host that clears it
    /// releases a pending flush.
    pub fn flush(&self) {
        while self.is_blocking() && !self.is_empty() {
            Y::yield_now();
        }
    }

    #[inline]
    fn cursors(&self) -> (u8, u8) {
        (
            self.write_cursor.load(Ordering::Relaxed),
            // Pairs with the host finishing its copy before it advances the cursor.
            self.read_cursor.load(Ordering::Acquire),
        )
    }

    #[inline]
    fn occupied_between(write: u8, read: u8) -> usize {
        (write.wrapping_sub(read) & Self::CURSOR_MASK) as usize
    }

    #[inline]
    fn free_between(write: u8, read: u8) -> usize {
        // A read cursor the host corrupted can make this exceed the capacity. Treat that as full.
        N.saturating_sub(Self::occupied_between(write, read))
    }
}

impl<const N: usize, Y: Yield> Default for RingChannel<N, Y> {
    fn default() -> Self {
        Self::new(false)
    }
}

impl<const N: usize, Y: Yield> fmt::Debug for RingChannel<N, Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (write, read) = self.cursors();
        f.debug_struct("RingChannel")
            .field("capacity", &N)
            .field("read_cursor", &read)
            .field("write_cursor", &write)
            .field("flags", &self.flags.load(Ordering::Relaxed))
            .finish()
    }
}

/// Formatting sink. Like `printf` on top of `putchar`, bytes that do not fit are lost and
/// formatting carries on.
impl<const N: usize, Y: Yield> fmt::Write for &RingChannel<N, Y> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            let _ = self.write_byte(byte);
        }
        Ok(())
    }
}

#[cfg(test)]
impl<const N: usize, Y: Yield> RingChannel<N, Y> {
    /// Plays the host: copies `count` bytes out and advances the read cursor past them.
    pub(crate) fn drain(&self, count: usize) -> Vec<u8> {
        let read = self.read_cursor.load(Ordering::Relaxed);
        let bytes = (0..count)
            .map(|i| self.slot(read.wrapping_add(i as u8)))
            .collect();
        self.read_cursor.store(
            read.wrapping_add(count as u8) & Self::CURSOR_MASK,
            Ordering::Relaxed,
        );
        bytes
    }

    pub(crate) fn slot(&self, cursor: u8) -> u8 {
        // SAFETY: in bounds thanks to the mask; a single byte read does not tear.
        unsafe {
            (self.storage.get() as *const u8)
                .add((cursor & Self::SLOT_MASK) as usize)
                .read_volatile()
        }
    }

    pub(crate) fn set_flags(&self, flags: u8) {
        self.flags.store(flags, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::NoYield;

    use core::fmt::Write;
    use core::mem::{offset_of, size_of};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(1)]
    #[test_case(5)]
    #[test_case(8)]
    fn bytes_come_out_in_order(count: u8) {
        let channel = RingChannel::<8>::new(false);
        let input: Vec<u8> = (0..count).map(|i| b'a' + i).collect();

        assert_eq!(channel.write_bytes(&input), input.len());
        assert_eq!(channel.occupied(), input.len());
        assert_eq!(channel.drain(input.len()), input);
        assert!(channel.is_empty());
    }

    #[test]
    fn ninth_byte_is_dropped_without_host() {
        let channel = RingChannel::<8>::new(false);

        for byte in 0..8 {
            assert_eq!(channel.write_byte(byte), Ok(byte));
        }
        assert_eq!(channel.write_byte(8), Err(Dropped));

        assert_eq!(channel.occupied(), 8);
        assert_eq!(channel.free(), 0);
        assert_eq!(channel.drain(8), (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn write_bytes_stops_at_first_drop() {
        let channel = RingChannel::<8>::new(false);
        assert_eq!(channel.write_bytes(b"0123456789"), 8);
        assert_eq!(channel.drain(8), b"01234567");
    }

    fn full_is_not_empty<const N: usize>() {
        let channel = RingChannel::<N>::new(false);
        for i in 0..N {
            channel.write_byte(i as u8).unwrap();
        }

        let (write, read) = channel.cursors();
        assert_eq!(write as usize, N);
        assert_eq!(read, 0);
        assert_eq!(write & RingChannel::<N>::SLOT_MASK, read & RingChannel::<N>::SLOT_MASK);
        assert_eq!(channel.occupied(), N);
        assert!(!channel.is_empty());
        assert_eq!(channel.write_byte(0xff), Err(Dropped));
    }

    #[test]
    fn full_is_not_empty_8() {
        full_is_not_empty::<8>();
    }

    #[test]
    fn full_is_not_empty_128() {
        full_is_not_empty::<128>();
    }

    #[test]
    fn occupied_stays_within_capacity_across_wraps() {
        let channel = RingChannel::<16>::new(false);
        let mut expected = std::collections::VecDeque::new();
        let mut next = 0u8;

        // Uneven write and drain batches, enough to wrap both cursors several times.
        for round in 0..200usize {
            for _ in 0..(round % 7 + 3) {
                match channel.write_byte(next) {
                    Ok(_) => expected.push_back(next),
                    Err(Dropped) => assert_eq!(channel.occupied(), 16),
                }
                next = next.wrapping_add(1);
                assert!(channel.occupied() <= 16);
            }

            let count = round % 5 + 1;
            let count = count.min(channel.occupied());
            let drained = channel.drain(count);
            let wanted: Vec<u8> = expected.drain(..count).collect();
            assert_eq!(drained, wanted);
            assert!(channel.occupied() <= 16);
            assert_eq!(channel.occupied(), expected.len());
        }
    }

    static BLOCKED: RingChannel<8, DrainOnYield> = RingChannel::new(true);
    static DRAIN_YIELDS: AtomicUsize = AtomicUsize::new(0);

    /// A host that drains one byte whenever the producer yields.
    struct DrainOnYield;

    impl Yield for DrainOnYield {
        fn yield_now() {
            DRAIN_YIELDS.fetch_add(1, Ordering::SeqCst);
            BLOCKED.drain(1);
        }
    }

    #[test]
    fn blocked_write_resumes_after_one_cycle() {
        for byte in 0..8 {
            BLOCKED.write_byte(byte).unwrap();
        }
        assert_eq!(DRAIN_YIELDS.load(Ordering::SeqCst), 0);

        assert_eq!(BLOCKED.write_byte(8), Ok(8));
        assert_eq!(DRAIN_YIELDS.load(Ordering::SeqCst), 1);
        assert_eq!(BLOCKED.occupied(), 8);
        // The ninth byte took the slot the host just freed.
        assert_eq!(BLOCKED.slot(0), 8);
    }

    static FLUSHED: RingChannel<8, DrainOnFlushYield> = RingChannel::new(true);
    static FLUSH_YIELDS: AtomicUsize = AtomicUsize::new(0);

    struct DrainOnFlushYield;

    impl Yield for DrainOnFlushYield {
        fn yield_now() {
            FLUSH_YIELDS.fetch_add(1, Ordering::SeqCst);
            FLUSHED.drain(1);
        }
    }

    #[test]
    fn blocking_flush_waits_until_drained() {
        FLUSHED.write_bytes(b"hello");
        FLUSHED.flush();

        assert!(FLUSHED.is_empty());
        assert_eq!(FLUSH_YIELDS.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn non_blocking_flush_returns_immediately() {
        let channel = RingChannel::<8, NoYield>::new(false);
        channel.write_bytes(b"12345678");

        channel.flush();

        assert_eq!(channel.occupied(), 8);
    }

    #[test]
    fn blocked_writer_waits_for_host_thread() {
        let channel = RingChannel::<8>::new(true);
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            let writer = s.spawn(|| {
                for byte in 0..9 {
                    channel.write_byte(byte).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            });

            while channel.occupied() < 8 {
                thread::yield_now();
            }
            thread::sleep(Duration::from_millis(20));
            assert!(!done.load(Ordering::SeqCst));

            assert_eq!(channel.drain(1), vec![0u8]);
            writer.join().unwrap();
        });

        assert!(done.load(Ordering::SeqCst));
        assert_eq!(channel.drain(8), (1..9).collect::<Vec<u8>>());
    }

    #[test]
    fn host_can_switch_to_blocking() {
        let channel = RingChannel::<8>::new(false);
        assert!(!channel.is_blocking());

        channel.set_flags(FLAG_BLOCK);
        assert!(channel.is_blocking());

        channel.set_flags(0);
        assert!(!channel.is_blocking());
    }

    #[test]
    fn default_layout() {
        type Channel = RingChannel<8>;
        let channel = Channel::new(true);

        assert_eq!(size_of::<Channel>(), 8 + 6);
        assert_eq!(channel.preamble, [0, b'S', 0xB9]);
        assert_eq!(Channel::SIGNATURE_OFFSET, 1);
        assert_eq!(channel.size_indicator(), None);
        assert_eq!(offset_of!(Channel, read_cursor), 3);
        assert_eq!(offset_of!(Channel, write_cursor), 4);
        assert_eq!(offset_of!(Channel, storage), 5);
        assert_eq!(offset_of!(Channel, flags), 5 + 8);
        assert_eq!(channel.flags.load(Ordering::Relaxed), FLAG_BLOCK);
    }

    #[test_case(16, 0x84)]
    #[test_case(32, 0x85)]
    #[test_case(128, 0x87)]
    fn sized_layout(capacity: usize, indicator: u8) {
        fn check<const N: usize>(indicator: u8) {
            let channel = RingChannel::<N>::new(false);
            let base = &channel as *const _ as usize;
            let offset = |field: &AtomicU8| field as *const AtomicU8 as usize - base;

            assert_eq!(size_of::<RingChannel<N>>(), N + 6);
            assert_eq!(channel.preamble, [b'S', 0xB9, indicator]);
            assert_eq!(channel.size_indicator(), Some(indicator));
            assert_eq!(RingChannel::<N>::SIGNATURE_OFFSET, 0);
            assert_eq!(offset(&channel.read_cursor), 3);
            assert_eq!(offset(&channel.write_cursor), 4);
            assert_eq!(offset(&channel.flags), 5 + N);
        }

        match capacity {
            16 => check::<16>(indicator),
            32 => check::<32>(indicator),
            128 => check::<128>(indicator),
            _ => unreachable!(),
        }
    }

    #[test]
    fn signature_pointer_points_at_signature() {
        let channel = RingChannel::<8>::new(false);
        let sig = unsafe { core::slice::from_raw_parts(channel.signature_ptr(), 2) };
        assert_eq!(sig, SIGNATURE);
    }

    #[test]
    fn formatting_drops_overflow_and_keeps_going() {
        let channel = RingChannel::<8>::new(false);
        let mut sink = &channel;

        write!(sink, "{}-{}", 12, "abcdefgh").unwrap();

        assert_eq!(channel.drain(8), b"12-abcde");
    }
}
