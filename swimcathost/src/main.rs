use std::io::{self, Write};
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use swimcat_host::{Channel, ScanRegion, Snapshot, TargetMemory};

#[cfg(feature = "probe")]
mod probe;

fn parse_address(src: &str) -> Result<u64, ParseIntError> {
    let src = src.trim();
    if let Some(hex) = src.strip_prefix("0x").or_else(|| src.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        src.parse()
    }
}

fn parse_scan_region(
    mut src: &str,
) -> Result<ScanRegion, Box<dyn std::error::Error + Send + Sync + 'static>> {
    src = src.trim();
    if src.is_empty() {
        return Ok(ScanRegion::Ram);
    }

    let parts = src
        .split("..")
        .map(parse_address)
        .collect::<Result<Vec<_>, _>>()?;

    match *parts.as_slice() {
        [addr] => Ok(ScanRegion::Exact(addr)),
        [start, end] if start < end => Ok(ScanRegion::range(start..end)),
        [_, _] => Err("Invalid range: start must be below end".into()),
        _ => Err("Invalid range: multiple '..'s".into()),
    }
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "swimcathost",
    about = "Prints what a microcontroller writes to its swimcat channel, read through a debug probe or from a RAM dump.",
    version
)]
struct Opts {
    #[clap(long, help = "Read target RAM from this dump instead of a probe.")]
    snapshot: Option<PathBuf>,

    #[clap(
        long,
        default_value = "0x20000000",
        value_parser = parse_address,
        help = "Target address of the first byte of the RAM dump."
    )]
    base: u64,

    #[cfg(feature = "probe")]
    #[clap(
        short,
        long,
        default_value = "0",
        help = "Specify probe number or 'list' to list probes."
    )]
    probe: probe::ProbeInfo,

    #[cfg(feature = "probe")]
    #[clap(
        short,
        long,
        help = "Target chip type. Leave unspecified to auto-detect."
    )]
    chip: Option<String>,

    #[clap(short, long, help = "Show the channel and exit.")]
    list: bool,

    #[clap(
        long,
        help = "Make the firmware block on a full buffer instead of dropping output."
    )]
    block: bool,

    #[clap(
        long,
        default_value = "",
        value_parser = parse_scan_region,
        help = "Memory region to scan for the channel. You can specify either an exact signature address '0x1000' or a range such as '0x0000..0x1000'. Both decimal and hex are accepted. Defaults to all RAM."
    )]
    scan_region: ScanRegion,

    #[clap(
        long,
        default_value = "1",
        help = "Milliseconds to wait between polls while the channel is empty."
    )]
    poll_interval: u64,

    #[clap(
        long,
        default_value = "1000",
        help = "Milliseconds to keep looking for the channel after attaching to the target."
    )]
    attach_timeout: u64,
}

#[cfg_attr(not(feature = "probe"), allow(dead_code))]
impl Opts {
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout)
    }
}

fn main() {
    pretty_env_logger::init();

    std::process::exit(match run(Opts::parse()) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    });
}

fn run(opts: Opts) -> anyhow::Result<()> {
    if let Some(path) = &opts.snapshot {
        return run_snapshot(&opts, path);
    }

    #[cfg(feature = "probe")]
    return probe::run(&opts);

    #[cfg(not(feature = "probe"))]
    anyhow::bail!("No target given. Pass --snapshot, or build with the `probe` feature to use a debug probe.");
}

/// Drains whatever a RAM dump holds and exits.
fn run_snapshot(opts: &Opts, path: &Path) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut mem = Snapshot::new(opts.base, bytes);

    let channel = Channel::attach_region(&mut mem, &opts.scan_region)
        .context("Failed to find the channel in the RAM dump")?;

    if opts.list {
        println!("{}", describe(&channel, &mut mem)?);
        return Ok(());
    }

    if opts.block {
        tracing::warn!("--block has no effect on a RAM dump");
    }

    let mut stdout = io::stdout().lock();
    while pump(&channel, &mut mem, &mut stdout)? > 0 {}

    Ok(())
}

/// Attaches to the channel on a live target, then copies its output to stdout until an error
/// occurs.
#[cfg_attr(not(feature = "probe"), allow(dead_code))]
fn stream(opts: &Opts, mem: &mut impl TargetMemory) -> anyhow::Result<()> {
    let channel = swimcat_host::try_attach(&mut *mem, &opts.scan_region, opts.attach_timeout())
        .context("Failed to attach to the channel")?;

    eprintln!("Found channel at {:#010x}", channel.address());

    if opts.list {
        println!("{}", describe(&channel, &mut *mem)?);
        return Ok(());
    }

    if opts.block {
        channel.set_blocking(&mut *mem, true)?;
    }

    let mut stdout = io::stdout().lock();
    loop {
        if pump(&channel, &mut *mem, &mut stdout)? == 0 {
            std::thread::sleep(opts.poll_interval());
        }
    }
}

/// Moves pending bytes from the channel to `out` and returns how many there were.
fn pump(
    channel: &Channel,
    mem: &mut impl TargetMemory,
    out: &mut impl Write,
) -> anyhow::Result<usize> {
    let mut buf = [0u8; 256];

    let count = channel
        .read(mem, &mut buf)
        .context("Failed to read from the channel")?;

    if count > 0 {
        out.write_all(&buf[..count])
            .and_then(|()| out.flush())
            .context("Failed to write to stdout")?;
    }

    Ok(count)
}

fn describe(channel: &Channel, mem: &mut impl TargetMemory) -> anyhow::Result<String> {
    Ok(format!(
        "Channel at {:#010x}: {} bytes{}, {} pending, {}",
        channel.address(),
        channel.capacity(),
        if channel.has_size_indicator() {
            ""
        } else {
            " (default)"
        },
        channel.pending(mem)?,
        if channel.is_blocking(mem)? {
            "blocking"
        } else {
            "dropping when full"
        }
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("", ScanRegion::Ram; "empty is all ram")]
    #[test_case("0x2000", ScanRegion::Exact(0x2000); "hex address")]
    #[test_case("4096", ScanRegion::Exact(4096); "decimal address")]
    #[test_case("0x20000000..0x20004000", ScanRegion::range(0x2000_0000..0x2000_4000); "hex range")]
    #[test_case(" 0..1024 ", ScanRegion::range(0..1024); "decimal range")]
    fn scan_region_parses(src: &str, expected: ScanRegion) {
        assert_eq!(parse_scan_region(src).unwrap(), expected);
    }

    #[test_case("0x10..0x8"; "inverted")]
    #[test_case("1..2..3"; "too many parts")]
    #[test_case("ram"; "not a number")]
    fn scan_region_rejects(src: &str) {
        assert!(parse_scan_region(src).is_err());
    }

    fn ram() -> Snapshot {
        // Default capacity, read 0, write 3.
        let mut ram = vec![0u8; 64];
        ram[8..21].copy_from_slice(&[b'S', 0xB9, 0, 3, b'a', b'b', b'c', 0, 0, 0, 0, 0, 1]);
        Snapshot::new(0x100, ram)
    }

    #[test]
    fn pump_moves_pending_bytes() {
        let mut mem = ram();
        let channel = Channel::attach(&mut mem).unwrap();
        let mut out = Vec::new();

        assert_eq!(pump(&channel, &mut mem, &mut out).unwrap(), 3);
        assert_eq!(pump(&channel, &mut mem, &mut out).unwrap(), 0);
        assert_eq!(out, b"abc");
    }

    #[test]
    fn describe_reports_layout_and_state() {
        let mut mem = ram();
        let channel = Channel::attach(&mut mem).unwrap();

        assert_eq!(
            describe(&channel, &mut mem).unwrap(),
            "Channel at 0x00000108: 8 bytes (default), 3 pending, blocking"
        );
    }
}
