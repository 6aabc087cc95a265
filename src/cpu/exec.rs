use super::decode::Instr;
use super::trap::{FaultAt, Trap};
use crate::cpu::Cpu;
use crate::csr::{MSTATUS_MIE, PrivMode};
use crate::mem::{MemError, Memory};
use crate::platform::{self, HostControl, Platform};

/// What the step loop does once an instruction has retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Next,
    /// WFI parked the hart.
    Wait,
    /// An MMIO store asked the host to stop.
    Host(HostControl),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Byte,
    Half,
    Word,
}

impl Width {
    fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }

    fn mask(self, value: u32) -> u32 {
        match self {
            Width::Byte => value & 0xff,
            Width::Half => value & 0xffff,
            Width::Word => value,
        }
    }

    fn extend(self, value: u32, signed: bool) -> u32 {
        match (self, signed) {
            (Width::Byte, true) => value as u8 as i8 as i32 as u32,
            (Width::Half, true) => value as u16 as i16 as i32 as u32,
            _ => self.mask(value),
        }
    }

    fn read(self, mem: &Memory, addr: u32) -> Result<u32, MemError> {
        match self {
            Width::Byte => mem.read_u8(addr).map(u32::from),
            Width::Half => mem.read_u16(addr).map(u32::from),
            Width::Word => mem.read_u32(addr),
        }
    }

    fn write(self, mem: &mut Memory, addr: u32, value: u32) -> Result<(), MemError> {
        match self {
            Width::Byte => mem.write_u8(addr, value as u8),
            Width::Half => mem.write_u16(addr, value as u16),
            Width::Word => mem.write_u32(addr, value),
        }
    }
}

fn in_mmio(mem: &Memory, addr: u32, width: Width) -> bool {
    !mem.contains(addr, width.bytes()) && platform::is_mmio(addr)
}

fn load<P: Platform>(
    cpu: &Cpu,
    mem: &Memory,
    host: &mut P,
    pc: u32,
    addr: u32,
    width: Width,
    signed: bool,
) -> Result<u32, Trap> {
    let raw = if in_mmio(mem, addr, width) {
        host.mmio_load(cpu, addr)
    } else {
        width.read(mem, addr).load_fault(pc)?
    };
    Ok(width.extend(raw, signed))
}

fn store<P: Platform>(
    cpu: &mut Cpu,
    mem: &mut Memory,
    host: &mut P,
    pc: u32,
    addr: u32,
    width: Width,
    value: u32,
) -> Result<Flow, Trap> {
    let value = width.mask(value);
    if in_mmio(mem, addr, width) {
        return Ok(host
            .mmio_store(cpu, addr, value)
            .map_or(Flow::Next, Flow::Host));
    }
    width.write(mem, addr, value).store_fault(pc)?;
    Ok(Flow::Next)
}

/// RAM offset of an AMO operand. AMOs never reach MMIO.
fn amo_offset(mem: &Memory, pc: u32, addr: u32) -> Result<u32, Trap> {
    if !mem.contains(addr, 4) {
        return Err(Trap::StoreAccessFault { pc, addr });
    }
    if addr & 0b11 != 0 {
        return Err(Trap::StoreMisaligned { pc, addr });
    }
    mem.offset_of(addr)
        .ok_or(Trap::StoreAccessFault { pc, addr })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsrOp {
    Write,
    Set,
    Clear,
}

fn read_csr<P: Platform>(cpu: &Cpu, mem: &Memory, host: &mut P, csr: u16) -> u32 {
    match cpu.csrs.read(csr) {
        Ok(value) => value,
        Err(err) => {
            log::debug!("{err}, asking platform");
            host.csr_read(mem, csr)
        }
    }
}

fn write_csr<P: Platform>(cpu: &mut Cpu, mem: &Memory, host: &mut P, csr: u16, value: u32) {
    if let Err(err) = cpu.csrs.write(csr, value) {
        log::debug!("{err}, forwarding 0x{value:08x} to platform");
        host.csr_write(mem, csr, value);
    }
}

/// Shared body of the six Zicsr instructions. `source` is the rs1 index or
/// the immediate; when it is zero, set/clear leave the CSR untouched, and a
/// write with rd = x0 skips the read.
#[allow(clippy::too_many_arguments)]
fn csr_access<P: Platform>(
    cpu: &mut Cpu,
    mem: &Memory,
    host: &mut P,
    rd: u8,
    csr: u16,
    op: CsrOp,
    source: u8,
    operand: u32,
) -> u32 {
    let old = if op == CsrOp::Write && rd == 0 {
        0
    } else {
        read_csr(cpu, mem, host, csr)
    };
    let new = match op {
        CsrOp::Write => Some(operand),
        CsrOp::Set => (source != 0).then_some(old | operand),
        CsrOp::Clear => (source != 0).then_some(old & !operand),
    };
    if let Some(value) = new {
        write_csr(cpu, mem, host, csr, value);
    }
    old
}

pub fn execute<P: Platform>(
    cpu: &mut Cpu,
    mem: &mut Memory,
    host: &mut P,
    instr: Instr,
) -> Result<Flow, Trap> {
    let pc = cpu.pc;

    let r = |cpu: &Cpu, idx: u8| -> u32 { cpu.regs[idx as usize] };
    let w = |cpu: &mut Cpu, idx: u8, val: u32| {
        if idx != 0 {
            cpu.regs[idx as usize] = val;
        } // x0 hardwired
    };

    let mut flow = Flow::Next;

    match instr {
        Instr::Lui { rd, imm } => {
            w(cpu, rd, imm);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Auipc { rd, imm } => {
            w(cpu, rd, pc.wrapping_add(imm));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Jal { rd, off } => {
            w(cpu, rd, pc.wrapping_add(4));
            cpu.pc = pc.wrapping_add(off as u32);
        }
        Instr::Jalr { rd, rs1, off } => {
            let target = r(cpu, rs1).wrapping_add(off as u32) & !1;
            w(cpu, rd, pc.wrapping_add(4));
            cpu.pc = target;
        }
        Instr::Beq { rs1, rs2, off } => {
            cpu.pc = if r(cpu, rs1) == r(cpu, rs2) {
                pc.wrapping_add(off as u32)
            } else {
                pc.wrapping_add(4)
            };
        }
        Instr::Bne { rs1, rs2, off } => {
            cpu.pc = if r(cpu, rs1) != r(cpu, rs2) {
                pc.wrapping_add(off as u32)
            } else {
                pc.wrapping_add(4)
            };
        }
        Instr::Blt { rs1, rs2, off } => {
            cpu.pc = if (r(cpu, rs1) as i32) < (r(cpu, rs2) as i32) {
                pc.wrapping_add(off as u32)
            } else {
                pc.wrapping_add(4)
            };
        }
        Instr::Bge { rs1, rs2, off } => {
            cpu.pc = if (r(cpu, rs1) as i32) >= (r(cpu, rs2) as i32) {
                pc.wrapping_add(off as u32)
            } else {
                pc.wrapping_add(4)
            };
        }
        Instr::Bltu { rs1, rs2, off } => {
            cpu.pc = if r(cpu, rs1) < r(cpu, rs2) {
                pc.wrapping_add(off as u32)
            } else {
                pc.wrapping_add(4)
            };
        }
        Instr::Bgeu { rs1, rs2, off } => {
            cpu.pc = if r(cpu, rs1) >= r(cpu, rs2) {
                pc.wrapping_add(off as u32)
            } else {
                pc.wrapping_add(4)
            };
        }
        Instr::LB { rd, rs1, off } => {
            let addr = r(cpu, rs1).wrapping_add(off as u32);
            let value = load(cpu, mem, host, pc, addr, Width::Byte, true)?;
            w(cpu, rd, value);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::LBU { rd, rs1, off } => {
            let addr = r(cpu, rs1).wrapping_add(off as u32);
            let value = load(cpu, mem, host, pc, addr, Width::Byte, false)?;
            w(cpu, rd, value);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::LH { rd, rs1, off } => {
            let addr = r(cpu, rs1).wrapping_add(off as u32);
            let value = load(cpu, mem, host, pc, addr, Width::Half, true)?;
            w(cpu, rd, value);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::LHU { rd, rs1, off } => {
            let addr = r(cpu, rs1).wrapping_add(off as u32);
            let value = load(cpu, mem, host, pc, addr, Width::Half, false)?;
            w(cpu, rd, value);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::LW { rd, rs1, off } => {
            let addr = r(cpu, rs1).wrapping_add(off as u32);
            let value = load(cpu, mem, host, pc, addr, Width::Word, false)?;
            w(cpu, rd, value);
            cpu.pc = pc.wrapping_add(4);
        }
        // The pc moves on before the store so an MMIO handler may redirect it.
        Instr::SB { rs1, rs2, off } => {
            let addr = r(cpu, rs1).wrapping_add(off as u32);
            let value = r(cpu, rs2);
            cpu.pc = pc.wrapping_add(4);
            flow = store(cpu, mem, host, pc, addr, Width::Byte, value)?;
        }
        Instr::SH { rs1, rs2, off } => {
            let addr = r(cpu, rs1).wrapping_add(off as u32);
            let value = r(cpu, rs2);
            cpu.pc = pc.wrapping_add(4);
            flow = store(cpu, mem, host, pc, addr, Width::Half, value)?;
        }
        Instr::SW { rs1, rs2, off } => {
            let addr = r(cpu, rs1).wrapping_add(off as u32);
            let value = r(cpu, rs2);
            cpu.pc = pc.wrapping_add(4);
            flow = store(cpu, mem, host, pc, addr, Width::Word, value)?;
        }
        Instr::Addi { rd, rs1, imm } => {
            w(cpu, rd, r(cpu, rs1).wrapping_add(imm as u32));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Slti { rd, rs1, imm } => {
            w(cpu, rd, ((r(cpu, rs1) as i32) < imm) as u32);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Sltiu { rd, rs1, imm } => {
            w(cpu, rd, (r(cpu, rs1) < imm as u32) as u32);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Xori { rd, rs1, imm } => {
            w(cpu, rd, r(cpu, rs1) ^ (imm as u32));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Ori { rd, rs1, imm } => {
            w(cpu, rd, r(cpu, rs1) | (imm as u32));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Andi { rd, rs1, imm } => {
            w(cpu, rd, r(cpu, rs1) & (imm as u32));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Slli { rd, rs1, shamt } => {
            w(cpu, rd, r(cpu, rs1).wrapping_shl(shamt as u32));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Srli { rd, rs1, shamt } => {
            w(cpu, rd, r(cpu, rs1).wrapping_shr(shamt as u32));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Srai { rd, rs1, shamt } => {
            w(cpu, rd, (r(cpu, rs1) as i32).wrapping_shr(shamt as u32) as u32);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Add { rd, rs1, rs2 } => {
            w(cpu, rd, r(cpu, rs1).wrapping_add(r(cpu, rs2)));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Sub { rd, rs1, rs2 } => {
            w(cpu, rd, r(cpu, rs1).wrapping_sub(r(cpu, rs2)));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Sll { rd, rs1, rs2 } => {
            w(cpu, rd, r(cpu, rs1).wrapping_shl(r(cpu, rs2) & 0x1f));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Slt { rd, rs1, rs2 } => {
            w(cpu, rd, ((r(cpu, rs1) as i32) < (r(cpu, rs2) as i32)) as u32);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Sltu { rd, rs1, rs2 } => {
            w(cpu, rd, (r(cpu, rs1) < r(cpu, rs2)) as u32);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Xor { rd, rs1, rs2 } => {
            w(cpu, rd, r(cpu, rs1) ^ r(cpu, rs2));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Srl { rd, rs1, rs2 } => {
            w(cpu, rd, r(cpu, rs1).wrapping_shr(r(cpu, rs2) & 0x1f));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Sra { rd, rs1, rs2 } => {
            w(
                cpu,
                rd,
                (r(cpu, rs1) as i32).wrapping_shr(r(cpu, rs2) & 0x1f) as u32,
            );
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Or { rd, rs1, rs2 } => {
            w(cpu, rd, r(cpu, rs1) | r(cpu, rs2));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::And { rd, rs1, rs2 } => {
            w(cpu, rd, r(cpu, rs1) & r(cpu, rs2));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Mul { rd, rs1, rs2 } => {
            w(cpu, rd, r(cpu, rs1).wrapping_mul(r(cpu, rs2)));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Mulh { rd, rs1, rs2 } => {
            let a = r(cpu, rs1) as i32 as i64;
            let b = r(cpu, rs2) as i32 as i64;
            w(cpu, rd, (a.wrapping_mul(b) >> 32) as u32);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Mulhsu { rd, rs1, rs2 } => {
            let a = r(cpu, rs1) as i32 as i64;
            let b = r(cpu, rs2) as u64 as i64;
            w(cpu, rd, (a.wrapping_mul(b) >> 32) as u32);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Mulhu { rd, rs1, rs2 } => {
            let a = r(cpu, rs1) as u64;
            let b = r(cpu, rs2) as u64;
            w(cpu, rd, (a.wrapping_mul(b) >> 32) as u32);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Div { rd, rs1, rs2 } => {
            let (a, b) = (r(cpu, rs1) as i32, r(cpu, rs2) as i32);
            // MIN / -1 wraps back to MIN
            let value = if b == 0 { u32::MAX } else { a.wrapping_div(b) as u32 };
            w(cpu, rd, value);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Divu { rd, rs1, rs2 } => {
            let (a, b) = (r(cpu, rs1), r(cpu, rs2));
            w(cpu, rd, a.checked_div(b).unwrap_or(u32::MAX));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Rem { rd, rs1, rs2 } => {
            let (a, b) = (r(cpu, rs1) as i32, r(cpu, rs2) as i32);
            // MIN % -1 wraps to 0
            let value = if b == 0 { a } else { a.wrapping_rem(b) };
            w(cpu, rd, value as u32);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Remu { rd, rs1, rs2 } => {
            let (a, b) = (r(cpu, rs1), r(cpu, rs2));
            w(cpu, rd, a.checked_rem(b).unwrap_or(a));
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Fence | Instr::FenceI => {
            // Single in-order hart without caches: nothing to order
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Ecall => {
            return Err(match cpu.csrs.priv_mode() {
                PrivMode::Machine => Trap::EcallFromM { pc },
                PrivMode::User => Trap::EcallFromU { pc },
            });
        }
        Instr::Ebreak => {
            return Err(Trap::Breakpoint { pc });
        }
        Instr::Mret => {
            cpu.pc = cpu.csrs.mret();
        }
        Instr::Wfi => {
            cpu.csrs.mstatus |= MSTATUS_MIE;
            cpu.csrs.set_waiting(true);
            cpu.pc = pc.wrapping_add(4);
            flow = Flow::Wait;
        }
        Instr::Csrrw { rd, csr, rs1 } => {
            let operand = r(cpu, rs1);
            let old = csr_access(cpu, mem, host, rd, csr, CsrOp::Write, rs1, operand);
            w(cpu, rd, old);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Csrrs { rd, csr, rs1 } => {
            let operand = r(cpu, rs1);
            let old = csr_access(cpu, mem, host, rd, csr, CsrOp::Set, rs1, operand);
            w(cpu, rd, old);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Csrrc { rd, csr, rs1 } => {
            let operand = r(cpu, rs1);
            let old = csr_access(cpu, mem, host, rd, csr, CsrOp::Clear, rs1, operand);
            w(cpu, rd, old);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Csrrwi { rd, csr, uimm } => {
            let old = csr_access(cpu, mem, host, rd, csr, CsrOp::Write, uimm, uimm as u32);
            w(cpu, rd, old);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Csrrsi { rd, csr, uimm } => {
            let old = csr_access(cpu, mem, host, rd, csr, CsrOp::Set, uimm, uimm as u32);
            w(cpu, rd, old);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Csrrci { rd, csr, uimm } => {
            let old = csr_access(cpu, mem, host, rd, csr, CsrOp::Clear, uimm, uimm as u32);
            w(cpu, rd, old);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::LrW { rd, rs1 } => {
            let addr = r(cpu, rs1);
            let offset = amo_offset(mem, pc, addr)?;
            let loaded = mem.read_u32(addr).store_fault(pc)?;
            cpu.csrs.set_reservation(Some(offset));
            w(cpu, rd, loaded);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::ScW { rd, rs1, rs2 } => {
            let addr = r(cpu, rs1);
            let offset = amo_offset(mem, pc, addr)?;
            mem.read_u32(addr).store_fault(pc)?;
            let reserved = cpu.csrs.reservation() == Some(offset);
            cpu.csrs.set_reservation(None);
            if reserved {
                mem.write_u32(addr, r(cpu, rs2)).store_fault(pc)?;
            }
            w(cpu, rd, !reserved as u32);
            cpu.pc = pc.wrapping_add(4);
        }
        Instr::Amo { op, rd, rs1, rs2 } => {
            let addr = r(cpu, rs1);
            amo_offset(mem, pc, addr)?;
            let loaded = mem.read_u32(addr).store_fault(pc)?;
            mem.write_u32(addr, op.apply(loaded, r(cpu, rs2)))
                .store_fault(pc)?;
            w(cpu, rd, loaded);
            cpu.pc = pc.wrapping_add(4);
        }
    }

    // Keep x0 pinned (extra safety)
    cpu.regs[0] = 0;
    Ok(flow)
}
