//! Host capabilities the hart calls out to: MMIO devices, CSRs the core
//! does not implement, and a hook after every instruction.

mod devices;

pub use devices::{StdPlatform, SYSCON_POWEROFF, SYSCON_REBOOT};

use std::ops::ControlFlow;

use crate::cpu::Cpu;
use crate::cpu::trap::Trap;
use crate::mem::Memory;

/// Start of the device window.
pub const MMIO_BASE: u32 = 0x1000_0000;
/// First address past the device window.
pub const MMIO_END: u32 = 0x1200_0000;

pub fn is_mmio(addr: u32) -> bool {
    (MMIO_BASE..MMIO_END).contains(&addr)
}

/// Requests a device store can make of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostControl {
    Shutdown,
    Restart,
}

pub trait Platform {
    /// Load from the device window. The engine narrows the result to the
    /// access width.
    fn mmio_load(&mut self, _cpu: &Cpu, addr: u32) -> u32 {
        log::debug!("unhandled MMIO load at 0x{addr:08x}");
        0
    }

    /// Store to the device window, already masked to the access width. The
    /// hart's pc points past the store when this runs.
    fn mmio_store(&mut self, _cpu: &mut Cpu, addr: u32, value: u32) -> Option<HostControl> {
        log::debug!("unhandled MMIO store 0x{value:08x} at 0x{addr:08x}");
        None
    }

    fn csr_read(&mut self, _mem: &Memory, _csr: u16) -> u32 {
        0
    }

    fn csr_write(&mut self, _mem: &Memory, _csr: u16, _value: u32) {}

    /// Sees every retired or faulting instruction. `inst` is 0 when the
    /// fetch itself failed. May replace the trap, or break to stop the run.
    fn post_exec(&mut self, _pc: u32, _inst: u32, trap: Option<Trap>) -> ControlFlow<(), Option<Trap>> {
        ControlFlow::Continue(trap)
    }
}

/// No devices at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlatform;

impl Platform for NullPlatform {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_window_bounds() {
        assert!(!is_mmio(0x0fff_ffff));
        assert!(is_mmio(MMIO_BASE));
        assert!(is_mmio(0x11ff_ffff));
        assert!(!is_mmio(MMIO_END));
    }
}
