use crate::cpu::Cpu;
use crate::csr::{MSTATUS_MIE, MSTATUS_MPIE, PrivMode};
use crate::mem::MemError;
use thiserror::Error;

/// Exception cause codes (RISC-V privileged architecture)
pub mod causes {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: u32 = 0;
    pub const INSTRUCTION_ACCESS_FAULT: u32 = 1;
    pub const ILLEGAL_INSTRUCTION: u32 = 2;
    pub const BREAKPOINT: u32 = 3;
    pub const LOAD_ACCESS_FAULT: u32 = 5;
    pub const STORE_ADDRESS_MISALIGNED: u32 = 6;
    pub const STORE_ACCESS_FAULT: u32 = 7;
    pub const ECALL_U: u32 = 8;
    pub const ECALL_M: u32 = 11;

    // Interrupt causes (high bit set when interrupt)
    pub const MTI: u32 = 7;

    /// mcause bit marking an asynchronous trap.
    pub const INTERRUPT: u32 = 1 << 31;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    #[error("instruction address misaligned at pc=0x{pc:08x}")]
    InstructionMisaligned { pc: u32 },

    #[error("instruction access fault at pc=0x{pc:08x}")]
    InstructionAccessFault { pc: u32 },

    #[error("illegal instruction at pc=0x{pc:08x} inst=0x{inst:08x}")]
    IllegalInstruction { pc: u32, inst: u32 },

    #[error("breakpoint at pc=0x{pc:08x}")]
    Breakpoint { pc: u32 },

    #[error("load access fault at pc=0x{pc:08x}, addr=0x{addr:08x}")]
    LoadAccessFault { pc: u32, addr: u32 },

    #[error("store/AMO address misaligned at pc=0x{pc:08x}, addr=0x{addr:08x}")]
    StoreMisaligned { pc: u32, addr: u32 },

    #[error("store/AMO access fault at pc=0x{pc:08x}, addr=0x{addr:08x}")]
    StoreAccessFault { pc: u32, addr: u32 },

    #[error("user environment call at pc=0x{pc:08x}")]
    EcallFromU { pc: u32 },

    #[error("machine environment call at pc=0x{pc:08x}")]
    EcallFromM { pc: u32 },

    #[error("machine timer interrupt")]
    MachineTimerInterrupt { pc: u32 },
}

impl Trap {
    /// Returns the exception/interrupt cause code
    pub fn cause(&self) -> u32 {
        match self {
            Trap::InstructionMisaligned { .. } => causes::INSTRUCTION_ADDRESS_MISALIGNED,
            Trap::InstructionAccessFault { .. } => causes::INSTRUCTION_ACCESS_FAULT,
            Trap::IllegalInstruction { .. } => causes::ILLEGAL_INSTRUCTION,
            Trap::Breakpoint { .. } => causes::BREAKPOINT,
            Trap::LoadAccessFault { .. } => causes::LOAD_ACCESS_FAULT,
            Trap::StoreMisaligned { .. } => causes::STORE_ADDRESS_MISALIGNED,
            Trap::StoreAccessFault { .. } => causes::STORE_ACCESS_FAULT,
            Trap::EcallFromU { .. } => causes::ECALL_U,
            Trap::EcallFromM { .. } => causes::ECALL_M,
            Trap::MachineTimerInterrupt { .. } => causes::MTI,
        }
    }

    /// Returns true if this is an interrupt (vs synchronous exception)
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Trap::MachineTimerInterrupt { .. })
    }

    /// The value written to mcause.
    pub fn mcause(&self) -> u32 {
        if self.is_interrupt() {
            causes::INTERRUPT | self.cause()
        } else {
            self.cause()
        }
    }

    /// Returns the trap value (mtval): the faulting address for data access
    /// faults, zero for interrupts, the faulting pc otherwise.
    pub fn tval(&self) -> u32 {
        match self {
            Trap::LoadAccessFault { addr, .. } => *addr,
            Trap::StoreMisaligned { addr, .. } => *addr,
            Trap::StoreAccessFault { addr, .. } => *addr,
            Trap::MachineTimerInterrupt { .. } => 0,
            _ => self.pc(),
        }
    }

    /// Returns the PC where the trap occurred. For interrupts this is the
    /// instruction that had not run yet.
    pub fn pc(&self) -> u32 {
        match self {
            Trap::InstructionMisaligned { pc } => *pc,
            Trap::InstructionAccessFault { pc } => *pc,
            Trap::IllegalInstruction { pc, .. } => *pc,
            Trap::Breakpoint { pc } => *pc,
            Trap::LoadAccessFault { pc, .. } => *pc,
            Trap::StoreMisaligned { pc, .. } => *pc,
            Trap::StoreAccessFault { pc, .. } => *pc,
            Trap::EcallFromU { pc } => *pc,
            Trap::EcallFromM { pc } => *pc,
            Trap::MachineTimerInterrupt { pc } => *pc,
        }
    }
}

/// Trait for adding PC context to errors that can become Traps
pub trait WithPc<T> {
    fn with_pc(self, pc: u32) -> Result<T, Trap>;
}

impl<T> WithPc<T> for Result<T, crate::cpu::decode::DecodeError> {
    fn with_pc(self, pc: u32) -> Result<T, Trap> {
        self.map_err(|err| match err {
            crate::cpu::decode::DecodeError::InvalidOpcode { inst } => {
                Trap::IllegalInstruction { pc, inst }
            }
            crate::cpu::decode::DecodeError::InvalidFunct { inst } => {
                Trap::IllegalInstruction { pc, inst }
            }
        })
    }
}

/// Turns a RAM access error into the access fault for its direction.
pub trait FaultAt<T> {
    fn load_fault(self, pc: u32) -> Result<T, Trap>;
    fn store_fault(self, pc: u32) -> Result<T, Trap>;
}

impl<T> FaultAt<T> for Result<T, MemError> {
    fn load_fault(self, pc: u32) -> Result<T, Trap> {
        self.map_err(|MemError::Oob(addr)| Trap::LoadAccessFault { pc, addr })
    }

    fn store_fault(self, pc: u32) -> Result<T, Trap> {
        self.map_err(|MemError::Oob(addr)| Trap::StoreAccessFault { pc, addr })
    }
}

/// Enter the machine-mode trap handler.
///
/// Saves the cause, value and return address, stacks MIE into MPIE and the
/// current privilege into MPP, switches to machine mode with interrupts
/// disabled and jumps to the direct-mode base of mtvec.
pub fn take_trap(cpu: &mut Cpu, trap: &Trap) {
    let csrs = &mut cpu.csrs;
    log::trace!("{trap}; vectoring to 0x{:08x}", csrs.mtvec);

    csrs.mcause = trap.mcause();
    csrs.mtval = trap.tval();
    csrs.mepc = trap.pc();

    let mpie = (csrs.mstatus & MSTATUS_MIE) << 4;
    csrs.mstatus = (csrs.mstatus & !(MSTATUS_MIE | MSTATUS_MPIE)) | mpie;
    let prev = csrs.priv_mode();
    csrs.set_mpp(prev);
    csrs.set_priv_mode(PrivMode::Machine);
    csrs.set_waiting(false);

    let vector = csrs.mtvec & !0b11;
    cpu.pc = vector;
}
