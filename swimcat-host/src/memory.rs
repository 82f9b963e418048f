use std::ops::Range;

use crate::Error;

/// Access to the memory of a target.
///
/// The scanner only ever reads memory and writes single bytes: the read cursor and the flags.
pub trait TargetMemory {
    /// Reads `data.len()` bytes starting at `address`.
    fn read(&mut self, address: u64, data: &mut [u8]) -> Result<(), Error>;

    /// Writes one byte at `address`.
    fn write_u8(&mut self, address: u64, value: u8) -> Result<(), Error>;

    /// The RAM ranges scanned by [`ScanRegion::Ram`](crate::ScanRegion::Ram). Empty if unknown.
    fn ram_ranges(&self) -> Vec<Range<u64>> {
        Vec::new()
    }
}

impl<T: TargetMemory + ?Sized> TargetMemory for &mut T {
    fn read(&mut self, address: u64, data: &mut [u8]) -> Result<(), Error> {
        (**self).read(address, data)
    }

    fn write_u8(&mut self, address: u64, value: u8) -> Result<(), Error> {
        (**self).write_u8(address, value)
    }

    fn ram_ranges(&self) -> Vec<Range<u64>> {
        (**self).ram_ranges()
    }
}

/// A copy of target RAM, starting at `base`.
///
/// Writes land in the copy only. Useful for post-mortem dumps and for testing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    base: u64,
    bytes: Vec<u8>,
}

impl Snapshot {
    /// Creates a snapshot of `bytes` as found at `base` in target memory.
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    /// Returns the target address of the first byte.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Returns the range of target addresses covered.
    pub fn range(&self) -> Range<u64> {
        self.base..self.base + self.bytes.len() as u64
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn offset(&self, address: u64, len: usize) -> Option<usize> {
        let start = usize::try_from(address.checked_sub(self.base)?).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.bytes.len()).then_some(start)
    }
}

impl TargetMemory for Snapshot {
    fn read(&mut self, address: u64, data: &mut [u8]) -> Result<(), Error> {
        let len = data.len();
        let start = self
            .offset(address, len)
            .ok_or(Error::MemoryRead { address, len })?;
        data.copy_from_slice(&self.bytes[start..start + len]);
        Ok(())
    }

    fn write_u8(&mut self, address: u64, value: u8) -> Result<(), Error> {
        let start = self
            .offset(address, 1)
            .ok_or(Error::MemoryWrite { address })?;
        self.bytes[start] = value;
        Ok(())
    }

    fn ram_ranges(&self) -> Vec<Range<u64>> {
        vec![self.range()]
    }
}

/// A live target, accessed through a probe-rs core.
#[cfg(feature = "probe-rs")]
pub struct ProbeMemory<'a, 'probe> {
    core: &'a mut probe_rs::Core<'probe>,
    ram: Vec<Range<u64>>,
}

#[cfg(feature = "probe-rs")]
impl<'a, 'probe> ProbeMemory<'a, 'probe> {
    /// Wraps `core`. The RAM regions of `memory_map` are what [`ScanRegion::Ram`] scans.
    ///
    /// [`ScanRegion::Ram`]: crate::ScanRegion::Ram
    pub fn new(
        core: &'a mut probe_rs::Core<'probe>,
        memory_map: &[probe_rs::config::MemoryRegion],
    ) -> Self {
        let ram = memory_map
            .iter()
            .filter_map(|region| match region {
                probe_rs::config::MemoryRegion::Ram(ram) => Some(ram.range.clone()),
                _ => None,
            })
            .collect();

        Self { core, ram }
    }
}

#[cfg(feature = "probe-rs")]
impl TargetMemory for ProbeMemory<'_, '_> {
    fn read(&mut self, address: u64, data: &mut [u8]) -> Result<(), Error> {
        probe_rs::MemoryInterface::read(&mut *self.core, address, data)?;
        Ok(())
    }

    fn write_u8(&mut self, address: u64, value: u8) -> Result<(), Error> {
        probe_rs::MemoryInterface::write_word_8(&mut *self.core, address, value)?;
        Ok(())
    }

    fn ram_ranges(&self) -> Vec<Range<u64>> {
        self.ram.clone()
    }
}
