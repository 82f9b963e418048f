use std::ops::Range;
use std::thread;
use std::time::{Duration, Instant};

use swimcat::SIGNATURE;

use crate::{Channel, Error, TargetMemory};

/// Used to specify which memory regions to scan for the channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ScanRegion {
    /// Scans all RAM regions known to the [`TargetMemory`]. This is the default. If the target has
    /// a lot of RAM, scanning all of it is slow.
    #[default]
    Ram,

    /// Limit scanning to the memory addresses covered by all of the given ranges. It is up to the
    /// user to ensure that reading from these ranges will not read from undefined memory.
    Ranges(Vec<Range<u64>>),

    /// Expects the signature at this exact address.
    Exact(u64),
}

impl ScanRegion {
    /// Creates a new `ScanRegion` that scans the given memory range.
    pub fn range(range: Range<u64>) -> Self {
        Self::Ranges(vec![range])
    }
}

/// Stop collecting candidates after this many, the result is ambiguous anyway.
const MAX_CANDIDATES: usize = 5;

/// Finds the address of the channel's signature in the specified region.
///
/// The signature is only two bytes long, so every occurrence is checked against the layout: the
/// size indicator must be valid, both cursors in range and the whole channel inside the scanned
/// range. Exactly one plausible channel must remain.
pub fn find_channel(mem: &mut impl TargetMemory, region: &ScanRegion) -> Result<u64, Error> {
    let ranges = match region {
        ScanRegion::Exact(addr) => {
            tracing::debug!("Scanning at exact address: {:#010x}", addr);

            return Ok(*addr);
        }
        ScanRegion::Ram => {
            tracing::debug!("Scanning whole RAM");

            mem.ram_ranges()
        }
        ScanRegion::Ranges(ranges) => {
            tracing::debug!("Scanning regions: {:#010x?}", ranges);

            ranges.clone()
        }
    };

    if ranges.is_empty() {
        return Err(Error::NoScanRanges);
    }

    let mut instances = Vec::new();

    for range in ranges {
        let Some(range_len) = range.end.checked_sub(range.start) else {
            tracing::warn!("Ignoring inverted range {:#010x?}", range);
            continue;
        };
        let Ok(range_len) = usize::try_from(range_len) else {
            tracing::warn!("Region too long ({} bytes), ignoring", range_len);
            continue;
        };

        let mut buf = vec![0; range_len];
        if let Err(error) = mem.read(range.start, &mut buf) {
            tracing::warn!("Skipping unreadable region {:#010x?}: {}", range, error);
            continue;
        }

        instances.extend(
            candidates(&buf)
                .into_iter()
                .map(|offset| range.start + offset as u64)
                .take(MAX_CANDIDATES - instances.len()),
        );

        if instances.len() >= MAX_CANDIDATES {
            break;
        }
    }

    match instances.len() {
        0 => Err(Error::ChannelNotFound),
        1 => Ok(instances.remove(0)),
        _ => Err(Error::MultipleChannelsFound(instances)),
    }
}

/// Offsets in `mem` where a plausible channel starts.
///
/// Storage may hold any byte values, including the signature. Signatures inside a channel that was
/// already accepted are payload and are skipped.
fn candidates(mem: &[u8]) -> Vec<usize> {
    let mut found = Vec::new();
    let mut offset = 0;

    while let Some(pos) = mem[offset..]
        .windows(SIGNATURE.len())
        .position(|window| window == SIGNATURE)
    {
        let start = offset + pos;

        match plausible(start as u64, &mem[start..]) {
            Ok(Some(len)) => {
                found.push(start);
                offset = start + len;
            }
            Ok(None) => offset = start + 1,
            Err(error) => {
                tracing::trace!("Rejecting signature at offset {start:#x}: {error}");
                offset = start + 1;
            }
        }
    }

    found
}

/// Returns the size of the channel starting at `tail`, or `None` if it does not fit.
fn plausible(ptr: u64, tail: &[u8]) -> Result<Option<usize>, Error> {
    let channel = Channel::from_header(ptr, tail)?;

    if tail.len() < channel.size_in_memory() {
        tracing::debug!("Channel at {ptr:#x} doesn't fit in scanned memory region.");
        return Ok(None);
    }

    channel.pending_in(tail)?;

    Ok(Some(channel.size_in_memory()))
}

impl Channel {
    /// Attempts to find the channel in the specified region and attaches to it.
    pub fn attach_region(
        mem: &mut impl TargetMemory,
        region: &ScanRegion,
    ) -> Result<Channel, Error> {
        let ptr = find_channel(mem, region)?;
        Self::attach_at(mem, ptr)
    }

    /// Attempts to find the channel anywhere in the target RAM and attaches to it.
    pub fn attach(mem: &mut impl TargetMemory) -> Result<Channel, Error> {
        Self::attach_region(mem, &ScanRegion::default())
    }
}

fn try_attach_inner(
    mut try_attach_once: impl FnMut() -> Result<Channel, Error>,
    timeout: Duration,
) -> Result<Channel, Error> {
    let t = Instant::now();
    let mut attempt = 1;
    loop {
        tracing::debug!("Looking for the channel (attempt {attempt})...");

        match try_attach_once() {
            err @ Err(Error::NoScanRanges) => return err,
            Err(_) if t.elapsed() < timeout => {
                attempt += 1;
                tracing::debug!("Failed to attach. Retrying until timeout.");
                thread::sleep(Duration::from_millis(50));
            }
            other => return other,
        }
    }
}

/// Tries to attach to the channel until `timeout` has passed.
///
/// The firmware may not have initialized its RAM yet right after a reset, so an early scan can
/// come up empty.
pub fn try_attach(
    mem: &mut impl TargetMemory,
    region: &ScanRegion,
    timeout: Duration,
) -> Result<Channel, Error> {
    try_attach_inner(|| Channel::attach_region(&mut *mem, region), timeout)
}
