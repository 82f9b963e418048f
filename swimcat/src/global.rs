//! The process-wide channel.
//!
//! Firmware usually wants exactly one channel, living for the whole run of the program. Enabling
//! the `global` feature provides it as [`SWIMCAT`], configured at build time:
//!
//! - `capacity-16`, `capacity-32`, `capacity-64`, `capacity-128` select the capacity. Without any
//!   of them it is 8 bytes, the size a host assumes when there is no size indicator. If several are
//!   enabled the largest one wins.
//! - `blocking` makes the channel start in blocking mode.
//! - `extern-yield` makes spin-waits call the firmware's `swimcat_yield()`.
//!
//! ```no_run
//! swimcat::sprintln!("booted, {} sensors found", 3);
//! swimcat::flush();
//! ```

use core::fmt;

use crate::{Dropped, RingChannel};

/// Capacity of [`SWIMCAT`] in bytes.
#[cfg(feature = "capacity-128")]
pub const CAPACITY: usize = 128;
/// Capacity of [`SWIMCAT`] in bytes.
#[cfg(all(feature = "capacity-64", not(feature = "capacity-128")))]
pub const CAPACITY: usize = 64;
/// Capacity of [`SWIMCAT`] in bytes.
#[cfg(all(
    feature = "capacity-32",
    not(any(feature = "capacity-64", feature = "capacity-128"))
))]
pub const CAPACITY: usize = 32;
/// Capacity of [`SWIMCAT`] in bytes.
#[cfg(all(
    feature = "capacity-16",
    not(any(
        feature = "capacity-32",
        feature = "capacity-64",
        feature = "capacity-128"
    ))
))]
pub const CAPACITY: usize = 16;
/// Capacity of [`SWIMCAT`] in bytes.
#[cfg(not(any(
    feature = "capacity-16",
    feature = "capacity-32",
    feature = "capacity-64",
    feature = "capacity-128"
)))]
pub const CAPACITY: usize = crate::DEFAULT_CAPACITY;

/// Whether [`SWIMCAT`] starts in blocking mode.
pub const BLOCKING: bool = cfg!(feature = "blocking");

#[cfg(feature = "extern-yield")]
type GlobalYield = crate::ExternYield;
#[cfg(not(feature = "extern-yield"))]
type GlobalYield = crate::Spin;

/// The channel a host finds when it scans this firmware's RAM.
///
/// `#[used]` and an unmangled name keep it in the image and easy to spot in the symbol table even
/// when nothing in the firmware writes to it yet.
#[used]
#[no_mangle]
pub static SWIMCAT: RingChannel<CAPACITY, GlobalYield> = RingChannel::new(BLOCKING);

/// Writes one byte to [`SWIMCAT`].
#[inline]
pub fn putchar(byte: u8) -> Result<u8, Dropped> {
    SWIMCAT.write_byte(byte)
}

/// Waits until the host has drained [`SWIMCAT`], if it is in blocking mode.
#[inline]
pub fn flush() {
    SWIMCAT.flush()
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let _ = fmt::Write::write_fmt(&mut &SWIMCAT, args);
}

/// Prints to the global swimcat channel.
#[macro_export]
macro_rules! sprint {
    ($($arg:tt)*) => {
        $crate::global::_print(format_args!($($arg)*))
    };
}

/// Prints to the global swimcat channel, with a newline.
#[macro_export]
macro_rules! sprintln {
    () => {
        $crate::sprint!("\n")
    };
    ($($arg:tt)*) => {
        $crate::global::_print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn global_channel_is_discoverable_and_writable() {
        let sig = unsafe { core::slice::from_raw_parts(SWIMCAT.signature_ptr(), 2) };
        assert_eq!(sig, crate::SIGNATURE);
        assert_eq!(SWIMCAT.capacity(), CAPACITY);
        assert_eq!(SWIMCAT.is_blocking(), BLOCKING);

        if !BLOCKING {
            crate::sprint!("ok");
            assert_eq!(SWIMCAT.drain(2), b"ok");
            assert_eq!(putchar(b'!'), Ok(b'!'));
            flush();
            assert_eq!(SWIMCAT.drain(1), b"!");
        }
    }
}
