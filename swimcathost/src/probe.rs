use std::io::Write;

use anyhow::Context;
use probe_rs::config::TargetSelector;
use probe_rs::probe::list::Lister;
use probe_rs::probe::DebugProbeInfo;
use probe_rs::Permissions;
use swimcat_host::ProbeMemory;

use crate::Opts;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ProbeInfo {
    Number(usize),
    List,
}

impl std::str::FromStr for ProbeInfo {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<ProbeInfo, &'static str> {
        if s == "list" {
            Ok(ProbeInfo::List)
        } else if let Ok(n) = s.parse::<usize>() {
            Ok(ProbeInfo::Number(n))
        } else {
            Err("Invalid probe number.")
        }
    }
}

pub fn run(opts: &Opts) -> anyhow::Result<()> {
    let probes = Lister::new().list_all();

    if probes.is_empty() {
        anyhow::bail!("No debug probes available. Make sure your probe is plugged in, supported and up-to-date.");
    }

    let probe_number = match opts.probe {
        ProbeInfo::List => {
            list_probes(std::io::stdout(), &probes);
            return Ok(());
        }
        ProbeInfo::Number(i) => i,
    };

    let Some(probe_info) = probes.get(probe_number) else {
        list_probes(std::io::stderr(), &probes);
        anyhow::bail!("Probe {probe_number} does not exist.");
    };

    let probe = probe_info.open().context("Error opening probe")?;

    let target_selector = opts
        .chip
        .clone()
        .map(TargetSelector::Unspecified)
        .unwrap_or(TargetSelector::Auto);

    let mut session = match probe.attach(target_selector, Permissions::default()) {
        Ok(session) => session,
        Err(err) => {
            if opts.chip.is_none() {
                if let probe_rs::Error::ChipNotFound(_) = err {
                    eprintln!("Hint: Use '--chip' to specify the target chip type manually");
                }
            }

            return Err(err).context("Error creating debug session");
        }
    };

    let memory_map = session.target().memory_map.clone();

    let mut core = session.core(0).context("Error attaching to core # 0")?;

    eprintln!("Attaching to swimcat...");

    let mut mem = ProbeMemory::new(&mut core, &memory_map);

    crate::stream(opts, &mut mem)
}

fn list_probes(mut stream: impl Write, probes: &[DebugProbeInfo]) {
    writeln!(stream, "Available probes:").ok();

    for (i, probe) in probes.iter().enumerate() {
        writeln!(
            stream,
            "{}: {} {}",
            i,
            probe.identifier,
            probe.serial_number.as_deref().unwrap_or("")
        )
        .ok();
    }
}
