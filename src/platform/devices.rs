use std::ops::ControlFlow;

use super::{HostControl, Platform};
use crate::console::Terminal;
use crate::cpu::Cpu;
use crate::cpu::trap::Trap;
use crate::mem::Memory;

// 16550 UART
const UART_DATA: u32 = 0x1000_0000;
const UART_LSR: u32 = 0x1000_0005;
const LSR_THRE_TEMT: u32 = 0x60;

// CLINT
const MTIMECMP_LO: u32 = 0x1100_4000;
const MTIMECMP_HI: u32 = 0x1100_4004;
const MTIME_LO: u32 = 0x1100_bff8;
const MTIME_HI: u32 = 0x1100_bffc;

// syscon
const SYSCON: u32 = 0x1110_0000;
pub const SYSCON_POWEROFF: u32 = 0x5555;
pub const SYSCON_REBOOT: u32 = 0x7777;

// Debug channel CSRs
const CSR_PRINT_DEC: u16 = 0x136;
const CSR_PRINT_HEX: u16 = 0x137;
const CSR_PRINT_STR: u16 = 0x138;
const CSR_PRINT_CHAR: u16 = 0x139;
const CSR_READ_KEY: u16 = 0x140;

/// UART, CLINT timer and syscon over a host terminal, plus the debug CSRs.
pub struct StdPlatform<T> {
    pub term: T,
    /// Stop the run on the first synchronous fault instead of trapping.
    pub fail_on_all_faults: bool,
    /// The fault that stopped the run, if any.
    pub last_fault: Option<Trap>,
}

impl<T: Terminal> StdPlatform<T> {
    pub fn new(term: T, fail_on_all_faults: bool) -> Self {
        Self {
            term,
            fail_on_all_faults,
            last_fault: None,
        }
    }
}

impl<T: Terminal> Platform for StdPlatform<T> {
    fn mmio_load(&mut self, cpu: &Cpu, addr: u32) -> u32 {
        match addr {
            UART_LSR => LSR_THRE_TEMT | self.term.has_input() as u32,
            UART_DATA => self.term.read_byte().map_or(0, u32::from),
            MTIME_LO => cpu.timer.time_low(),
            MTIME_HI => cpu.timer.time_high(),
            _ => {
                log::debug!("unmapped MMIO load at 0x{addr:08x}");
                0
            }
        }
    }

    fn mmio_store(&mut self, cpu: &mut Cpu, addr: u32, value: u32) -> Option<HostControl> {
        match addr {
            UART_DATA => self.term.write_bytes(&[value as u8]),
            MTIMECMP_LO => cpu.timer.set_compare_low(value),
            MTIMECMP_HI => cpu.timer.set_compare_high(value),
            SYSCON => match value {
                SYSCON_POWEROFF => {
                    log::info!("guest requested power off");
                    return Some(HostControl::Shutdown);
                }
                SYSCON_REBOOT => {
                    log::info!("guest requested reboot");
                    return Some(HostControl::Restart);
                }
                _ => log::debug!("ignored syscon value 0x{value:x}"),
            },
            _ => log::debug!("unmapped MMIO store 0x{value:08x} at 0x{addr:08x}"),
        }
        None
    }

    fn csr_read(&mut self, _mem: &Memory, csr: u16) -> u32 {
        match csr {
            CSR_READ_KEY => self.term.read_byte().map_or(u32::MAX, u32::from),
            _ => {
                log::debug!("read of unknown CSR 0x{csr:03x}");
                0
            }
        }
    }

    fn csr_write(&mut self, mem: &Memory, csr: u16, value: u32) {
        match csr {
            CSR_PRINT_DEC => self.term.write_bytes((value as i32).to_string().as_bytes()),
            CSR_PRINT_HEX => self.term.write_bytes(format!("{value:08x}").as_bytes()),
            CSR_PRINT_STR => match mem.read_cstr(value) {
                Ok(text) => self.term.write_bytes(text),
                Err(err) => log::warn!("debug string pointer: {err}"),
            },
            CSR_PRINT_CHAR => self.term.write_bytes(&[value as u8]),
            _ => log::debug!("write of unknown CSR 0x{csr:03x} = 0x{value:08x}"),
        }
    }

    fn post_exec(&mut self, pc: u32, inst: u32, trap: Option<Trap>) -> ControlFlow<(), Option<Trap>> {
        match trap {
            Some(fault) if self.fail_on_all_faults && !fault.is_interrupt() => {
                log::error!("{fault} (inst 0x{inst:08x} at 0x{pc:08x})");
                self.last_fault = Some(fault);
                ControlFlow::Break(())
            }
            _ => ControlFlow::Continue(trap),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::BufferedTerminal;
    use crate::mem::RAM_BASE;

    fn platform(input: &[u8]) -> StdPlatform<BufferedTerminal> {
        StdPlatform::new(BufferedTerminal::with_input(input), false)
    }

    #[test]
    fn uart_status_reflects_pending_input() {
        let mut host = platform(b"k");
        let cpu = Cpu::default();
        assert_eq!(host.mmio_load(&cpu, UART_LSR), 0x61);
        assert_eq!(host.mmio_load(&cpu, UART_DATA), u32::from(b'k'));
        assert_eq!(host.mmio_load(&cpu, UART_LSR), 0x60);
        assert_eq!(host.mmio_load(&cpu, UART_DATA), 0);
    }

    #[test]
    fn clint_halves_map_onto_the_timer() {
        let mut host = platform(b"");
        let mut cpu = Cpu::default();
        cpu.timer.time = 0x0000_0002_0000_0010;
        assert_eq!(host.mmio_load(&cpu, MTIME_LO), 0x10);
        assert_eq!(host.mmio_load(&cpu, MTIME_HI), 2);

        assert_eq!(host.mmio_store(&mut cpu, MTIMECMP_HI, 3), None);
        assert_eq!(host.mmio_store(&mut cpu, MTIMECMP_LO, 0x40), None);
        assert_eq!(cpu.timer.compare, 0x0000_0003_0000_0040);
    }

    #[test]
    fn syscon_codes() {
        let mut host = platform(b"");
        let mut cpu = Cpu::default();
        assert_eq!(
            host.mmio_store(&mut cpu, SYSCON, SYSCON_POWEROFF),
            Some(HostControl::Shutdown)
        );
        assert_eq!(
            host.mmio_store(&mut cpu, SYSCON, SYSCON_REBOOT),
            Some(HostControl::Restart)
        );
        assert_eq!(host.mmio_store(&mut cpu, SYSCON, 1), None);
    }

    #[test]
    fn debug_csrs_print_to_terminal() {
        let mut host = platform(b"");
        let mut mem = Memory::new(16);
        mem.write_bytes(RAM_BASE + 4, b"hey\0").unwrap();

        host.csr_write(&mem, CSR_PRINT_DEC, (-12i32) as u32);
        host.csr_write(&mem, CSR_PRINT_CHAR, u32::from(b' '));
        host.csr_write(&mem, CSR_PRINT_HEX, 0xbeef);
        host.csr_write(&mem, CSR_PRINT_STR, RAM_BASE + 4);
        host.csr_write(&mem, CSR_PRINT_STR, 0x10);

        assert_eq!(host.term.output_str(), "-12 0000beefhey");
    }

    #[test]
    fn key_csr_returns_minus_one_when_empty() {
        let mut host = platform(b"z");
        let mem = Memory::new(4);
        assert_eq!(host.csr_read(&mem, CSR_READ_KEY), u32::from(b'z'));
        assert_eq!(host.csr_read(&mem, CSR_READ_KEY), u32::MAX);
    }

    #[test]
    fn fail_fast_stops_on_exceptions_only() {
        let mut host = StdPlatform::new(BufferedTerminal::default(), true);
        let irq = Trap::MachineTimerInterrupt { pc: RAM_BASE };
        assert_eq!(host.post_exec(RAM_BASE, 0, Some(irq)), ControlFlow::Continue(Some(irq)));
        assert_eq!(host.post_exec(RAM_BASE, 0x13, None), ControlFlow::Continue(None));

        let fault = Trap::Breakpoint { pc: RAM_BASE };
        assert_eq!(host.post_exec(RAM_BASE, 0x0010_0073, Some(fault)), ControlFlow::Break(()));
        assert_eq!(host.last_fault, Some(fault));
    }
}
