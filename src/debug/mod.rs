use std::fmt::Write;

use crate::cpu::Cpu;
use crate::mem::Memory;

const ABI_NAMES: [&str; 32] = [
    "Z", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
    "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4", "t5",
    "t6",
];

/// One-line register dump: pc, the word at pc, then every GPR by ABI name.
pub fn format_state(cpu: &Cpu, mem: &Memory) -> String {
    let mut out = format!("PC: {:08x} ", cpu.pc);
    match mem.read_u32(cpu.pc) {
        Ok(ir) => {
            let _ = write!(out, "[{ir:08x}] ");
        }
        Err(_) => out.push_str("[xxxxxxxxxx] "),
    }
    for (name, value) in ABI_NAMES.iter().zip(cpu.regs.iter()) {
        let _ = write!(out, "{name}:{value:08x} ");
    }
    out.pop();
    out
}

pub fn dump_state(cpu: &Cpu, mem: &Memory) {
    println!("{}", format_state(cpu, mem));
}
