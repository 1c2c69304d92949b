use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use recomp_runtime::{DispatchTable, Machine, ResolutionReport, RuntimeConfig, SlotKind};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "recomp",
    about = "Load a recompiled image into the simulated address space and resolve its kernel imports."
)]
struct Args {
    /// Original executable image (raw file bytes)
    #[arg(long, value_name = "PATH")]
    image: PathBuf,

    /// Print one line per import slot
    #[arg(long, action = clap::ArgAction::SetTrue)]
    report: bool,

    /// Kernel calls traced individually before the bridge goes quiet (overrides
    /// RECOMP_BRIDGE_LOG_LIMIT)
    #[arg(long, value_name = "CALLS")]
    log_limit: Option<u32>,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    run(args)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("RECOMP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = RuntimeConfig::from_env().context("read runtime config")?;
    if let Some(limit) = args.log_limit {
        config.bridge_log_limit = limit;
    }

    let image =
        fs::read(&args.image).with_context(|| format!("read image {}", args.image.display()))?;
    tracing::info!(path = %args.image.display(), bytes = image.len(), "image read");

    // No translated functions are linked into this tool; only the hand-written ones resolve.
    let (mut m, report) = Machine::boot(&image, DispatchTable::default(), config)
        .with_context(|| format!("boot {}", args.image.display()))?;

    print_summary(&m, &report);
    if args.report {
        print_slots(&m);
    }

    m.shutdown();
    Ok(())
}

fn print_summary(m: &Machine, report: &ResolutionReport) {
    println!(
        "address space: host base {:#x}, {} MiB mapped",
        m.mem.base(),
        m.mem.size() / (1024 * 1024)
    );
    println!(
        "import table:  {:#010x}, {} slots",
        m.bridge().table_va(),
        report.resolved
    );
    println!(
        "  data {}, bridged {}, unbridged {}, unknown {}, mismatched {}",
        report.data, report.bridged, report.unbridged, report.unknown, report.mismatched
    );
    println!(
        "  synthetic range {:#010x}..{:#010x}",
        report.synthetic_range.start, report.synthetic_range.end
    );
    println!(
        "heap:          {} KiB used, {} KiB free",
        m.mem.heap_used() / 1024,
        m.mem.heap_remaining() / 1024
    );
}

fn print_slots(m: &Machine) {
    for info in m.bridge().slots() {
        let kind = match info.kind {
            SlotKind::Data(field) => format!("data({field:?})"),
            SlotKind::Bridged => "bridged".to_string(),
            SlotKind::Unbridged => "unbridged".to_string(),
            SlotKind::Unknown => "unknown".to_string(),
        };
        println!(
            "{:>3}  {:>3}  {:<34} {:<28} {:#010x}  {:?}",
            info.slot,
            info.ordinal,
            info.name.unwrap_or("?"),
            kind,
            info.resolved,
            info.convention,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_flags() {
        let args = Args::parse_from(["recomp", "--image", "game.xbe", "--report", "--log-limit", "5"]);
        assert_eq!(args.image, PathBuf::from("game.xbe"));
        assert!(args.report);
        assert_eq!(args.log_limit, Some(5));

        let args = Args::parse_from(["recomp", "--image", "game.xbe"]);
        assert!(!args.report);
        assert_eq!(args.log_limit, None);
    }
}
