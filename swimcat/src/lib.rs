//! Target side of the swimcat output channel.
//!
//! swimcat gives firmware a character output on microcontrollers that have no serial port, USB
//! stack or filesystem to spare. The firmware keeps a small ring buffer in its own RAM and tags it
//! with a signature. A debug probe that can read target memory without the firmware's help scans
//! RAM for the signature, finds the buffer and drains it. Nothing else is needed on the target: no
//! peripheral, no interrupt, no handshake.
//!
//! The host side lives in the `swimcat-host` crate.
//!
//! ## Example
//!
//! ```
//! use swimcat::RingChannel;
//!
//! static CHANNEL: RingChannel = RingChannel::new(false);
//!
//! for byte in b"hi\n" {
//!     // Nobody drains the buffer here, so bytes past the capacity would be dropped.
//!     CHANNEL.write_byte(*byte).ok();
//! }
//! CHANNEL.flush();
//!
//! assert_eq!(CHANNEL.occupied(), 3);
//! ```
//!
//! ## Memory layout
//!
//! The layout is an ABI shared with every host-side scanner. All fields are single bytes. Relative
//! to the signature `53 B9` it is:
//!
//! | field          | size  | notes                                                  |
//! |----------------|-------|--------------------------------------------------------|
//! | signature      | 2     | `b'S', 0xB9`                                           |
//! | size indicator | 0 / 1 | `0x80 \| log2(capacity)`, absent for capacity 8        |
//! | read cursor    | 1     | written by the host only                               |
//! | write cursor   | 1     | written by the firmware only                           |
//! | storage        | N     |                                                        |
//! | flags          | 1     | bit 0: block when full                                 |
//!
//! With the default capacity the signature is preceded by one zero byte, so the struct has the same
//! size whether or not the size indicator is present. Both cursors count modulo `2 * capacity`.
//! Any change to this layout needs a new signature.

#![cfg_attr(not(test), no_std)]

mod channel;
pub use channel::*;

mod yielding;
pub use yielding::*;

#[cfg(feature = "global")]
pub mod global;
#[cfg(feature = "global")]
pub use global::{flush, putchar, SWIMCAT};
