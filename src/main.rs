use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rv32ima_emu::console::Console;
use rv32ima_emu::emulator::{Config, Emulator, Exit, RunError};
use rv32ima_emu::image::DtbSource;

/// Accepts decimal, `0x` hex, `0b` binary and leading-zero octal.
fn parse_number(arg: &str) -> Result<u64, String> {
    let (digits, radix) = if let Some(hex) = arg.strip_prefix("0x") {
        (hex, 16)
    } else if let Some(bin) = arg.strip_prefix("0b") {
        (bin, 2)
    } else if arg.len() > 1 && arg.starts_with('0') {
        (&arg[1..], 8)
    } else {
        (arg, 10)
    };
    u64::from_str_radix(digits, radix).map_err(|e| format!("invalid number {arg:?}: {e}"))
}

fn parse_size(arg: &str) -> Result<usize, String> {
    let n = parse_number(arg)?;
    usize::try_from(n).map_err(|_| format!("{arg} is too large"))
}

#[derive(Parser, Debug)]
#[command(about = "RV32IMA machine-mode emulator")]
struct Args {
    /// RAM size in bytes
    #[arg(short = 'm', long = "ram", value_parser = parse_size, default_value = "0x4000000")]
    ram: usize,

    /// Image to run: flat binary loaded at 0x80000000, or an ELF
    #[arg(short = 'f', long, default_value = "Image")]
    image: PathBuf,

    /// Kernel command line for the built-in device tree
    #[arg(short = 'k', long)]
    cmdline: Option<String>,

    /// Device tree blob, or "disable" to boot without one
    #[arg(short = 'b', long)]
    dtb: Option<String>,

    /// Stop after N instructions
    #[arg(short = 'c', long, value_parser = parse_number)]
    max_insns: Option<u64>,

    /// Single step, dumping processor state before every instruction
    #[arg(short = 's', long, default_value_t = false)]
    single_step: bool,

    /// Divide the time base by this
    #[arg(short = 't', long, value_parser = parse_number, default_value = "1")]
    time_divisor: u64,

    /// Lock the time base to the instruction count
    #[arg(short = 'l', long, default_value_t = false)]
    lock_time: bool,

    /// Busy-wait instead of sleeping on WFI
    #[arg(short = 'p', long, default_value_t = false)]
    no_sleep: bool,

    /// Stop on the first fault instead of trapping
    #[arg(short = 'd', long, default_value_t = false)]
    fail_on_all_faults: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            ram_size: args.ram,
            image: args.image,
            dtb: args.dtb.as_deref().map_or(DtbSource::Builtin, DtbSource::from),
            cmdline: args.cmdline,
            max_insns: args.max_insns,
            time_divisor: args.time_divisor,
            lock_time: args.lock_time,
            single_step: args.single_step,
            sleep_on_wfi: !args.no_sleep,
            fail_on_all_faults: args.fail_on_all_faults,
        }
    }
}

fn run(config: Config) -> Result<Exit, RunError> {
    let console = Console::new()?;
    let mut emu = Emulator::new(config, console)?;
    emu.run()
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args.into()) {
        Ok(Exit::PowerOff) | Ok(Exit::InstructionLimit) => ExitCode::SUCCESS,
        Ok(Exit::Fault(_)) => ExitCode::from(3),
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
