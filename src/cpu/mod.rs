pub mod decode;
pub mod exec;
pub mod timer;
pub mod trap;

use std::ops::ControlFlow;

use crate::csr::CsrFile;
use crate::mem::{Memory, RAM_BASE};
use crate::platform::{HostControl, Platform};
use exec::Flow;
use timer::Timer;
use trap::{Trap, WithPc};

/// Outcome of one [`step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// The batch ran, or a trap was taken.
    Normal,
    /// The hart is parked on WFI.
    Idle,
    /// The guest asked to power off.
    Shutdown,
    /// The guest asked to reboot.
    Restart,
    /// The post-execution hook stopped the run.
    Fault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpu {
    pub regs: [u32; 32],
    pub pc: u32,
    pub csrs: CsrFile,
    pub timer: Timer,
}

impl Cpu {
    /// Fresh hart in machine mode about to execute `entry`.
    pub fn new(entry: u32) -> Self {
        Self {
            regs: [0; 32],
            pc: entry,
            csrs: CsrFile::new(),
            timer: Timer::default(),
        }
    }

    pub fn reg(&self, idx: usize) -> u32 {
        self.regs[idx]
    }

    pub fn set_reg(&mut self, idx: usize, value: u32) {
        if idx != 0 {
            self.regs[idx] = value;
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new(RAM_BASE)
    }
}

fn fetch(mem: &Memory, pc: u32) -> Result<u32, Trap> {
    if !mem.contains(pc, 4) {
        return Err(Trap::InstructionAccessFault { pc });
    }
    if pc & 0b11 != 0 {
        return Err(Trap::InstructionMisaligned { pc });
    }
    mem.read_u32(pc)
        .map_err(|_| Trap::InstructionAccessFault { pc })
}

/// Advance the timer by `elapsed` and run up to `max_insns` instructions.
///
/// A pending timer interrupt is taken instead of running the batch. A trap
/// ends the batch early, and so do WFI and host control stores. When the
/// post-execution hook swallows a trap, the faulting instruction is skipped.
pub fn step<P: Platform>(
    cpu: &mut Cpu,
    mem: &mut Memory,
    host: &mut P,
    elapsed: u32,
    max_insns: u32,
) -> StepResult {
    if cpu.timer.advance(elapsed) {
        cpu.csrs.set_timer_interrupt();
        cpu.csrs.set_waiting(false);
    } else {
        cpu.csrs.clear_timer_interrupt();
    }

    if cpu.csrs.is_waiting() {
        return StepResult::Idle;
    }

    if cpu.csrs.check_pending_interrupt().is_some() {
        let irq = Trap::MachineTimerInterrupt { pc: cpu.pc };
        trap::take_trap(cpu, &irq);
        return StepResult::Normal;
    }

    for _ in 0..max_insns {
        let pc = cpu.pc;
        cpu.csrs.cycle = cpu.csrs.cycle.wrapping_add(1);

        let (inst, outcome) = match fetch(mem, pc) {
            Ok(inst) => {
                let outcome = decode::decode(inst).with_pc(pc).and_then(|instr| {
                    log::trace!("0x{pc:08x}: {inst:08x} {instr:?}");
                    exec::execute(cpu, mem, host, instr)
                });
                (inst, outcome)
            }
            Err(trap) => (0, Err(trap)),
        };

        let raised = outcome.as_ref().err().copied();
        let raised = match host.post_exec(pc, inst, raised) {
            ControlFlow::Continue(raised) => raised,
            ControlFlow::Break(()) => {
                cpu.pc = pc;
                return StepResult::Fault;
            }
        };

        if let Some(trap) = raised {
            trap::take_trap(cpu, &trap);
            break;
        }

        match outcome {
            Ok(Flow::Next) => {}
            Ok(Flow::Wait) => return StepResult::Idle,
            Ok(Flow::Host(HostControl::Shutdown)) => return StepResult::Shutdown,
            Ok(Flow::Host(HostControl::Restart)) => return StepResult::Restart,
            // swallowed by the hook
            Err(_) => cpu.pc = pc.wrapping_add(4),
        }
    }

    StepResult::Normal
}

/// A hart, its RAM and the host it talks to.
pub struct Machine<P> {
    pub cpu: Cpu,
    pub mem: Memory,
    pub platform: P,
}

impl<P: Platform> Machine<P> {
    pub fn new(ram_bytes: usize, platform: P) -> Self {
        Self {
            cpu: Cpu::default(),
            mem: Memory::new(ram_bytes),
            platform,
        }
    }

    pub fn step(&mut self, elapsed: u32, max_insns: u32) -> StepResult {
        step(
            &mut self.cpu,
            &mut self.mem,
            &mut self.platform,
            elapsed,
            max_insns,
        )
    }
}
