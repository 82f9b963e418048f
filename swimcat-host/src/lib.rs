//! Host side of the swimcat output channel.
//!
//! Firmware using the `swimcat` crate keeps a small ring buffer in RAM, tagged with a signature.
//! This crate finds that buffer in target memory, reads what the firmware wrote and hands the
//! space back by advancing the read cursor in target RAM. Target memory is anything implementing
//! [`TargetMemory`]: a RAM [`Snapshot`], or a live probe-rs core with the `probe-rs` feature.
//!
//! ## Example
//!
//! ```no_run
//! use swimcat_host::{Channel, ScanRegion, Snapshot};
//!
//! let ram = std::fs::read("ram.bin")?;
//! let mut memory = Snapshot::new(0x2000_0000, ram);
//!
//! let channel = Channel::attach_region(&mut memory, &ScanRegion::Ram)?;
//!
//! let mut buf = [0u8; 128];
//! let count = channel.read(&mut memory, &mut buf)?;
//! println!("{}", String::from_utf8_lossy(&buf[..count]));
//!
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod channel;
pub use channel::*;

mod memory;
pub use memory::*;

mod scan;
pub use scan::*;

/// Error type for swimcat host operations.
#[derive(thiserror::Error, Debug, docsplay::Display)]
pub enum Error {
    /// There is no memory region to scan for the channel.
    NoScanRanges,

    /// swimcat channel not found in target memory.
    /// - Make sure the firmware links the channel and has started, so that RAM holds its initialized statics.
    /// - Make sure the scanned region covers the RAM that holds the firmware's statics.
    ChannelNotFound,

    /// Multiple swimcat channels found in target memory: {display_list(_0)}.
    MultipleChannelsFound(Vec<u64>),

    /// The channel at {address:#010x} is corrupted: {reason}
    ChannelCorrupted {
        /// Address of the channel's signature.
        address: u64,
        /// What is wrong with it.
        reason: String,
    },

    /// Cannot read {len} bytes at {address:#010x}, outside of target memory.
    MemoryRead {
        /// First address of the access.
        address: u64,
        /// Length of the access.
        len: usize,
    },

    /// Cannot write at {address:#010x}, outside of target memory.
    MemoryWrite {
        /// Address of the access.
        address: u64,
    },

    /// Malformed channel header.
    Parse(#[from] scroll::Error),

    /// Error communicating with the probe.
    #[cfg(feature = "probe-rs")]
    Probe(#[from] probe_rs::Error),
}

fn display_list(list: &[u64]) -> String {
    list.iter()
        .map(|ptr| format!("{ptr:#010x}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn multiple_channels_are_listed() {
        let error = Error::MultipleChannelsFound(vec![0x2000_0010, 0x2000_0400]);
        assert_eq!(
            error.to_string(),
            "Multiple swimcat channels found in target memory: 0x20000010, 0x20000400."
        );
    }

    #[test]
    fn corrupted_channel_names_address() {
        let error = Error::ChannelCorrupted {
            address: 0x100,
            reason: "read cursor is 40".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "The channel at 0x00000100 is corrupted: read cursor is 40"
        );
    }
}
