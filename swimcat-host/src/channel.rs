use std::cmp::min;

use scroll::{Pread, LE};
use swimcat::{
    DEFAULT_CAPACITY, FLAG_BLOCK, MAX_CAPACITY, MIN_CAPACITY, SIGNATURE, SIZE_INDICATOR,
};

use crate::{Error, TargetMemory};

/// A swimcat channel found in target memory.
///
/// Created by [`Channel::attach_at`] or one of the scanning constructors. All methods take the
/// target memory explicitly and read the cursors afresh, so the same `Channel` can be polled for as
/// long as the firmware keeps running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    ptr: u64,
    capacity: usize,
    size_indicator: bool,
}

// A channel must follow this layout, relative to the signature, to be found and drained:
//
// struct swimcat {
//     uint8_t signature[2];  // 'S', 0xB9
//     uint8_t size;          // 0x80 | log2(capacity), only if capacity != 8
//     uint8_t read;          // Next byte to read, modulo 2 * capacity. Owned by the host.
//     uint8_t write;         // Next byte to write, modulo 2 * capacity. Owned by the firmware.
//     uint8_t storage[capacity];
//     uint8_t flags;         // Bit 0: block when full.
// };

impl Channel {
    /// Number of bytes needed to decode the header: signature, size indicator and both cursors.
    pub(crate) const HEADER_LEN: usize = 5;

    // Offsets from the signature, size indicator excluded.
    const O_SIZE: usize = 2;
    const O_READ: usize = 2;
    const O_WRITE: usize = 3;
    const O_STORAGE: usize = 4;

    /// Mask of the size indicator's capacity bits.
    const SIZE_BITS: u8 = 0x07;

    /// Decodes the header found at `ptr`. `mem` holds target memory starting at `ptr`.
    pub(crate) fn from_header(ptr: u64, mem: &[u8]) -> Result<Channel, Error> {
        let signature = mem.get(..SIGNATURE.len());
        if signature != Some(&SIGNATURE[..]) {
            tracing::trace!(
                "Expected channel to start with signature {:02x?}, got {:02x?}",
                SIGNATURE,
                signature
            );
            return Err(Error::ChannelNotFound);
        }

        let size: u8 = mem.pread_with(Self::O_SIZE, LE).map_err(Error::Parse)?;
        if size & SIZE_INDICATOR == 0 {
            // No size indicator: this is already the read cursor.
            return Ok(Channel {
                ptr,
                capacity: DEFAULT_CAPACITY,
                size_indicator: false,
            });
        }

        let capacity = 1usize << (size & Self::SIZE_BITS);
        if size & !(SIZE_INDICATOR | Self::SIZE_BITS) != 0 || capacity < MIN_CAPACITY {
            return Err(Error::ChannelCorrupted {
                address: ptr,
                reason: format!("invalid size indicator {size:#04x}"),
            });
        }
        debug_assert!(capacity <= MAX_CAPACITY);

        Ok(Channel {
            ptr,
            capacity,
            size_indicator: true,
        })
    }

    /// Attaches to the channel whose signature is at `ptr`.
    ///
    /// The header is validated, including the current cursors, to reject stray signature bytes.
    pub fn attach_at(mem: &mut impl TargetMemory, ptr: u64) -> Result<Channel, Error> {
        let mut header = [0u8; Self::HEADER_LEN];
        mem.read(ptr, &mut header)?;

        let channel = Self::from_header(ptr, &header)?;
        channel.read_cursors(mem)?;

        tracing::debug!(
            "Attached to channel at {:#010x} with capacity {}",
            ptr,
            channel.capacity
        );

        Ok(channel)
    }

    /// Returns the address of the signature in target memory.
    pub fn address(&self) -> u64 {
        self.ptr
    }

    /// Returns the buffer capacity in bytes. All of it is usable.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if a size indicator byte follows the signature.
    pub fn has_size_indicator(&self) -> bool {
        self.size_indicator
    }

    /// Returns the number of bytes the channel occupies from the signature on.
    pub fn size_in_memory(&self) -> usize {
        self.cursor_offset() + Self::O_STORAGE + self.capacity + 1
    }

    fn cursor_offset(&self) -> usize {
        usize::from(self.size_indicator)
    }

    fn read_address(&self) -> u64 {
        self.ptr + (self.cursor_offset() + Self::O_READ) as u64
    }

    fn storage_address(&self) -> u64 {
        self.ptr + (self.cursor_offset() + Self::O_STORAGE) as u64
    }

    fn flags_address(&self) -> u64 {
        self.storage_address() + self.capacity as u64
    }

    /// Validates a cursor pair and returns how many bytes are pending.
    pub(crate) fn check_cursors(&self, read: u8, write: u8) -> Result<usize, Error> {
        let modulus = 2 * self.capacity;

        let validate = |which, value: u8| {
            if usize::from(value) >= modulus {
                Err(Error::ChannelCorrupted {
                    address: self.ptr,
                    reason: format!(
                        "{which} cursor is {value} while the capacity is {}",
                        self.capacity
                    ),
                })
            } else {
                Ok(())
            }
        };

        validate("read", read)?;
        validate("write", write)?;

        let pending = (usize::from(write) + modulus - usize::from(read)) % modulus;
        if pending > self.capacity {
            return Err(Error::ChannelCorrupted {
                address: self.ptr,
                reason: format!(
                    "{pending} bytes pending in a buffer of {} (read {read}, write {write})",
                    self.capacity
                ),
            });
        }

        Ok(pending)
    }

    /// Validates the cursors in `mem`, target memory starting at the signature, and returns how
    /// many bytes are pending.
    pub(crate) fn pending_in(&self, mem: &[u8]) -> Result<usize, Error> {
        let offset = self.cursor_offset();
        let read: u8 = mem
            .pread_with(offset + Self::O_READ, LE)
            .map_err(Error::Parse)?;
        let write: u8 = mem
            .pread_with(offset + Self::O_WRITE, LE)
            .map_err(Error::Parse)?;
        self.check_cursors(read, write)
    }

    /// Reads both cursors in one access, so they are consistent with each other. Returns the read
    /// cursor and the number of pending bytes.
    fn read_cursors(&self, mem: &mut impl TargetMemory) -> Result<(u8, usize), Error> {
        let mut cursors = [0u8; 2];
        mem.read(self.read_address(), &mut cursors)?;

        let [read, write] = cursors;
        let pending = self.check_cursors(read, write)?;

        Ok((read, pending))
    }

    /// Returns the number of bytes written by the firmware and not read yet.
    pub fn pending(&self, mem: &mut impl TargetMemory) -> Result<usize, Error> {
        Ok(self.read_cursors(mem)?.1)
    }

    fn read_core(
        &self,
        mem: &mut impl TargetMemory,
        mut buf: &mut [u8],
    ) -> Result<(u8, usize), Error> {
        let (read, pending) = self.read_cursors(mem)?;

        let modulus = 2 * self.capacity;
        let mut cursor = usize::from(read);
        let mut remaining = min(pending, buf.len());
        let mut total = 0;

        // Copy while data is pending and the output has space (maximum of two iterations).
        while remaining > 0 {
            let slot = cursor % self.capacity;
            let count = min(self.capacity - slot, remaining);

            mem.read(self.storage_address() + slot as u64, &mut buf[..count])?;

            total += count;
            remaining -= count;
            cursor = (cursor + count) % modulus;
            buf = &mut buf[count..];
        }

        // `cursor` is below `modulus`, which is at most 256.
        Ok((cursor as u8, total))
    }

    /// Reads pending bytes into `buf` and returns how many were read.
    ///
    /// The read cursor is written back to the target, which frees the space for the firmware and
    /// releases a writer blocked on a full buffer. This does not wait for data, and may read fewer
    /// bytes than fit in `buf`.
    pub fn read(&self, mem: &mut impl TargetMemory, buf: &mut [u8]) -> Result<usize, Error> {
        let (read, total) = self.read_core(mem, buf)?;

        if total > 0 {
            mem.write_u8(self.read_address(), read)?;
        }

        Ok(total)
    }

    /// Copies pending bytes into `buf` like [`read`](Channel::read), but leaves them in the
    /// channel.
    pub fn peek(&self, mem: &mut impl TargetMemory, buf: &mut [u8]) -> Result<usize, Error> {
        Ok(self.read_core(mem, buf)?.1)
    }

    /// Reads the flags byte from the target.
    pub fn flags(&self, mem: &mut impl TargetMemory) -> Result<u8, Error> {
        let mut flags = [0u8];
        mem.read(self.flags_address(), &mut flags)?;
        Ok(flags[0])
    }

    /// Returns `true` if the firmware blocks when the buffer is full.
    pub fn is_blocking(&self, mem: &mut impl TargetMemory) -> Result<bool, Error> {
        Ok(self.flags(mem)? & FLAG_BLOCK != 0)
    }

    /// Switches the firmware between blocking and dropping when the buffer is full.
    ///
    /// Only enable blocking while something keeps draining the channel, or the firmware stalls on
    /// its next write to a full buffer.
    pub fn set_blocking(&self, mem: &mut impl TargetMemory, blocking: bool) -> Result<(), Error> {
        let flags = self.flags(mem)?;

        let new_flags = if blocking {
            flags | FLAG_BLOCK
        } else {
            flags & !FLAG_BLOCK
        };

        if new_flags != flags {
            tracing::debug!("Setting channel flags to {:#04x}", new_flags);
            mem.write_u8(self.flags_address(), new_flags)?;
        }

        Ok(())
    }
}
