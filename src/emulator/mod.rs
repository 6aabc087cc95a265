//! Host driver: boots an image and feeds the hart batches of instructions
//! with elapsed time until it powers off, faults or runs out of budget.

use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::console::Terminal;
use crate::cpu::trap::Trap;
use crate::cpu::{Cpu, Machine, StepResult};
use crate::csr::MAX_RESERVATION_OFFSET;
use crate::debug;
use crate::image::{self, DtbSource, LoadError};
use crate::platform::StdPlatform;

/// Instructions per `step` call in normal running.
pub const BATCH: u32 = 1024;

const IDLE_SLEEP: Duration = Duration::from_micros(500);

/// Largest RAM whose every word the LR/SC reservation can name.
pub const MAX_RAM: usize = MAX_RESERVATION_OFFSET as usize + 4;

const A0: usize = 10;
const A1: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub ram_size: usize,
    pub image: PathBuf,
    pub dtb: DtbSource,
    pub cmdline: Option<String>,
    /// Stop after this many instructions.
    pub max_insns: Option<u64>,
    pub time_divisor: u64,
    /// Derive time from the cycle counter instead of the wall clock.
    pub lock_time: bool,
    pub single_step: bool,
    pub sleep_on_wfi: bool,
    pub fail_on_all_faults: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ram_size: 64 * 1024 * 1024,
            image: PathBuf::from("Image"),
            dtb: DtbSource::Builtin,
            cmdline: None,
            max_insns: None,
            time_divisor: 1,
            lock_time: false,
            single_step: false,
            sleep_on_wfi: true,
            fail_on_all_faults: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("RAM size {0:#x} is not between 4 bytes and {max:#x}", max = MAX_RAM)]
    RamSize(usize),

    #[error("time divisor must be nonzero")]
    TimeDivisor,

    #[error("could not start console: {0}")]
    Console(#[from] io::Error),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Load(err) => err.exit_code(),
            RunError::RamSize(_) | RunError::TimeDivisor => 1,
            RunError::Console(_) => 4,
        }
    }
}

/// Why the run loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    PowerOff,
    InstructionLimit,
    Fault(Option<Trap>),
}

pub struct Emulator<T> {
    pub machine: Machine<StdPlatform<T>>,
    config: Config,
}

impl<T: Terminal> Emulator<T> {
    pub fn new(config: Config, term: T) -> Result<Self, RunError> {
        if !(4..=MAX_RAM).contains(&config.ram_size) {
            return Err(RunError::RamSize(config.ram_size));
        }
        if config.time_divisor == 0 {
            return Err(RunError::TimeDivisor);
        }
        let platform = StdPlatform::new(term, config.fail_on_all_faults);
        let mut emu = Self {
            machine: Machine::new(config.ram_size, platform),
            config,
        };
        emu.boot()?;
        Ok(emu)
    }

    /// Load the image and device tree into cleared RAM and reset the hart.
    pub fn boot(&mut self) -> Result<(), LoadError> {
        let mem = &mut self.machine.mem;
        mem.clear();
        let entry = image::load_image(&self.config.image, mem)?;
        let dtb = image::place_dtb(mem, &self.config.dtb, self.config.cmdline.as_deref())?;

        let mut cpu = Cpu::new(entry);
        cpu.set_reg(A0, 0); // hart id
        cpu.set_reg(A1, dtb.unwrap_or(0));
        self.machine.cpu = cpu;
        log::info!("booting at 0x{entry:08x}");
        Ok(())
    }

    pub fn run(&mut self) -> Result<Exit, RunError> {
        let divisor = self.config.time_divisor;
        let lock_time = self.config.lock_time;
        let batch = if self.config.single_step { 1 } else { BATCH };
        let clock = Instant::now();
        let now = |cpu: &Cpu| {
            if lock_time {
                cpu.csrs.cycle / divisor
            } else {
                clock.elapsed().as_micros() as u64 / divisor
            }
        };

        let mut last_time = now(&self.machine.cpu);
        let mut retired: u64 = 0;

        let exit = loop {
            if self.config.max_insns.is_some_and(|limit| retired > limit) {
                break Exit::InstructionLimit;
            }

            let current = now(&self.machine.cpu);
            let elapsed = time_slice(current, last_time);
            last_time = current;

            if self.config.single_step {
                debug::dump_state(&self.machine.cpu, &self.machine.mem);
            }

            match self.machine.step(elapsed, batch) {
                StepResult::Normal => {}
                StepResult::Idle => {
                    if self.config.sleep_on_wfi {
                        thread::sleep(IDLE_SLEEP);
                    }
                    let csrs = &mut self.machine.cpu.csrs;
                    csrs.cycle = csrs.cycle.wrapping_add(batch as u64);
                }
                StepResult::Shutdown => {
                    let cycle = self.machine.cpu.csrs.cycle;
                    println!("POWEROFF@0x{:08x}{:08x}", cycle >> 32, cycle as u32);
                    return Ok(Exit::PowerOff);
                }
                StepResult::Restart => {
                    log::info!("restarting");
                    self.boot()?;
                    continue;
                }
                StepResult::Fault => {
                    let fault = self.machine.platform.last_fault;
                    match fault {
                        Some(trap) => eprintln!("FAULT: {trap}"),
                        None => eprintln!("FAULT"),
                    }
                    break Exit::Fault(fault);
                }
            }
            retired += batch as u64;
        };

        debug::dump_state(&self.machine.cpu, &self.machine.mem);
        Ok(exit)
    }
}

/// Time units between two readings, saturated to what one `step` accepts.
fn time_slice(now: u64, last: u64) -> u32 {
    u32::try_from(now.wrapping_sub(last)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::BufferedTerminal;

    #[test]
    fn long_host_stalls_saturate_instead_of_wrapping() {
        assert_eq!(time_slice(1_500, 1_000), 500);
        assert_eq!(time_slice(u32::MAX as u64 + 10, 5), u32::MAX);
        assert_eq!(time_slice(1 << 40, 0), u32::MAX);
    }

    #[test]
    fn rejects_ram_the_reservation_cannot_cover() {
        let config = Config {
            ram_size: MAX_RAM + 4,
            ..Config::default()
        };
        let err = Emulator::new(config, BufferedTerminal::default()).err();
        assert!(matches!(err, Some(RunError::RamSize(_))));
    }

    #[test]
    fn rejects_zero_divisor() {
        let config = Config {
            time_divisor: 0,
            ..Config::default()
        };
        let err = Emulator::new(config, BufferedTerminal::default()).err();
        assert!(matches!(err, Some(RunError::TimeDivisor)));
    }

    #[test]
    fn missing_image_keeps_its_exit_code() {
        let config = Config {
            ram_size: 0x1000,
            image: PathBuf::from("/nonexistent/Image"),
            ..Config::default()
        };
        let err = Emulator::new(config, BufferedTerminal::default()).err();
        assert_eq!(err.map(|e| e.exit_code()), Some(5));
    }
}
