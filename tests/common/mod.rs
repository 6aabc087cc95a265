//! Tiny RV32IMA assembler for hand-written test programs.
#![allow(dead_code)]

use rv32ima_emu::cpu::Machine;
use rv32ima_emu::mem::RAM_BASE;
use rv32ima_emu::platform::Platform;

pub const ZERO: u32 = 0;
pub const RA: u32 = 1;
pub const SP: u32 = 2;
pub const T0: u32 = 5;
pub const T1: u32 = 6;
pub const T2: u32 = 7;
pub const A0: u32 = 10;
pub const A1: u32 = 11;
pub const A2: u32 = 12;
pub const A3: u32 = 13;
pub const A4: u32 = 14;
pub const A5: u32 = 15;

pub const MSTATUS: u32 = 0x300;
pub const MIE: u32 = 0x304;
pub const MTVEC: u32 = 0x305;
pub const MSCRATCH: u32 = 0x340;
pub const MEPC: u32 = 0x341;
pub const MCAUSE: u32 = 0x342;
pub const CYCLE: u32 = 0xC00;

fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn i_type(imm: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    ((imm as u32 & 0xfff) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn s_type(imm: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
    let imm = imm as u32;
    (((imm >> 5) & 0x7f) << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | ((imm & 0x1f) << 7) | 0x23
}

fn b_type(off: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
    let imm = off as u32;
    (((imm >> 12) & 1) << 31)
        | (((imm >> 5) & 0x3f) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | (((imm >> 1) & 0xf) << 8)
        | (((imm >> 11) & 1) << 7)
        | 0x63
}

pub fn lui(rd: u32, imm: u32) -> u32 {
    (imm & 0xffff_f000) | (rd << 7) | 0x37
}

pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0, rd, 0x13)
}

/// `lui` + `addi` pair loading any 32-bit constant.
pub fn li(rd: u32, value: u32) -> [u32; 2] {
    let upper = value.wrapping_add(0x800) & 0xffff_f000;
    let lower = value.wrapping_sub(upper) as i32;
    [lui(rd, upper), addi(rd, rd, lower)]
}

pub fn auipc(rd: u32, imm: u32) -> u32 {
    (imm & 0xffff_f000) | (rd << 7) | 0x17
}

pub fn slti(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 2, rd, 0x13)
}

pub fn sltiu(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 3, rd, 0x13)
}

pub fn xori(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 4, rd, 0x13)
}

pub fn ori(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 6, rd, 0x13)
}

pub fn andi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 7, rd, 0x13)
}

pub fn slli(rd: u32, rs1: u32, shamt: u32) -> u32 {
    r_type(0, shamt, rs1, 1, rd, 0x13)
}

pub fn srli(rd: u32, rs1: u32, shamt: u32) -> u32 {
    r_type(0, shamt, rs1, 5, rd, 0x13)
}

pub fn srai(rd: u32, rs1: u32, shamt: u32) -> u32 {
    r_type(0x20, shamt, rs1, 5, rd, 0x13)
}

pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 0, rd, 0x33)
}

pub fn sll(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 1, rd, 0x33)
}

pub fn slt(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 2, rd, 0x33)
}

pub fn sltu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 3, rd, 0x33)
}

pub fn xor(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 4, rd, 0x33)
}

pub fn srl(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 5, rd, 0x33)
}

pub fn sra(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x20, rs2, rs1, 5, rd, 0x33)
}

pub fn or(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 6, rd, 0x33)
}

pub fn and(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 7, rd, 0x33)
}

pub fn mul(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(1, rs2, rs1, 0, rd, 0x33)
}

pub fn mulh(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(1, rs2, rs1, 1, rd, 0x33)
}

pub fn mulhsu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(1, rs2, rs1, 2, rd, 0x33)
}

pub fn mulhu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(1, rs2, rs1, 3, rd, 0x33)
}

pub fn div(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(1, rs2, rs1, 4, rd, 0x33)
}

pub fn divu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(1, rs2, rs1, 5, rd, 0x33)
}

pub fn rem(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(1, rs2, rs1, 6, rd, 0x33)
}

pub fn remu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(1, rs2, rs1, 7, rd, 0x33)
}

pub fn lb(rd: u32, rs1: u32, off: i32) -> u32 {
    i_type(off, rs1, 0, rd, 0x03)
}

pub fn lh(rd: u32, rs1: u32, off: i32) -> u32 {
    i_type(off, rs1, 1, rd, 0x03)
}

pub fn lw(rd: u32, rs1: u32, off: i32) -> u32 {
    i_type(off, rs1, 2, rd, 0x03)
}

pub fn lbu(rd: u32, rs1: u32, off: i32) -> u32 {
    i_type(off, rs1, 4, rd, 0x03)
}

pub fn lhu(rd: u32, rs1: u32, off: i32) -> u32 {
    i_type(off, rs1, 5, rd, 0x03)
}

pub fn sb(rs2: u32, rs1: u32, off: i32) -> u32 {
    s_type(off, rs2, rs1, 0)
}

pub fn sh(rs2: u32, rs1: u32, off: i32) -> u32 {
    s_type(off, rs2, rs1, 1)
}

pub fn sw(rs2: u32, rs1: u32, off: i32) -> u32 {
    s_type(off, rs2, rs1, 2)
}

pub fn beq(rs1: u32, rs2: u32, off: i32) -> u32 {
    b_type(off, rs2, rs1, 0)
}

pub fn bne(rs1: u32, rs2: u32, off: i32) -> u32 {
    b_type(off, rs2, rs1, 1)
}

pub fn blt(rs1: u32, rs2: u32, off: i32) -> u32 {
    b_type(off, rs2, rs1, 4)
}

pub fn bge(rs1: u32, rs2: u32, off: i32) -> u32 {
    b_type(off, rs2, rs1, 5)
}

pub fn bltu(rs1: u32, rs2: u32, off: i32) -> u32 {
    b_type(off, rs2, rs1, 6)
}

pub fn bgeu(rs1: u32, rs2: u32, off: i32) -> u32 {
    b_type(off, rs2, rs1, 7)
}

pub fn jal(rd: u32, off: i32) -> u32 {
    let imm = off as u32;
    (((imm >> 20) & 1) << 31)
        | (((imm >> 1) & 0x3ff) << 21)
        | (((imm >> 11) & 1) << 20)
        | (((imm >> 12) & 0xff) << 12)
        | (rd << 7)
        | 0x6f
}

pub fn jalr(rd: u32, rs1: u32, off: i32) -> u32 {
    i_type(off, rs1, 0, rd, 0x67)
}

pub fn csrrw(rd: u32, csr: u32, rs1: u32) -> u32 {
    (csr << 20) | (rs1 << 15) | (1 << 12) | (rd << 7) | 0x73
}

pub fn csrrs(rd: u32, csr: u32, rs1: u32) -> u32 {
    (csr << 20) | (rs1 << 15) | (2 << 12) | (rd << 7) | 0x73
}

pub fn csrrc(rd: u32, csr: u32, rs1: u32) -> u32 {
    (csr << 20) | (rs1 << 15) | (3 << 12) | (rd << 7) | 0x73
}

pub fn csrrsi(rd: u32, csr: u32, uimm: u32) -> u32 {
    (csr << 20) | (uimm << 15) | (6 << 12) | (rd << 7) | 0x73
}

pub fn csrrci(rd: u32, csr: u32, uimm: u32) -> u32 {
    (csr << 20) | (uimm << 15) | (7 << 12) | (rd << 7) | 0x73
}

pub fn csrrwi(rd: u32, csr: u32, uimm: u32) -> u32 {
    (csr << 20) | (uimm << 15) | (5 << 12) | (rd << 7) | 0x73
}

pub const ECALL: u32 = 0x0000_0073;
pub const EBREAK: u32 = 0x0010_0073;
pub const MRET: u32 = 0x3020_0073;
pub const WFI: u32 = 0x1050_0073;
pub const FENCE: u32 = 0x0ff0_000f;
pub const FENCE_I: u32 = 0x0000_100f;

fn amo(funct5: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
    (funct5 << 27) | (rs2 << 20) | (rs1 << 15) | (2 << 12) | (rd << 7) | 0x2f
}

pub fn lr_w(rd: u32, rs1: u32) -> u32 {
    amo(0b00010, rd, rs1, 0)
}

pub fn sc_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    amo(0b00011, rd, rs1, rs2)
}

pub fn amoadd_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    amo(0b00000, rd, rs1, rs2)
}

pub fn amoswap_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    amo(0b00001, rd, rs1, rs2)
}

pub fn amoxor_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    amo(0b00100, rd, rs1, rs2)
}

pub fn amoor_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    amo(0b01000, rd, rs1, rs2)
}

pub fn amoand_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    amo(0b01100, rd, rs1, rs2)
}

pub fn amomin_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    amo(0b10000, rd, rs1, rs2)
}

pub fn amomax_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    amo(0b10100, rd, rs1, rs2)
}

pub fn amominu_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    amo(0b11000, rd, rs1, rs2)
}

pub fn amomaxu_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    amo(0b11100, rd, rs1, rs2)
}

/// Little-endian image of `words`.
pub fn program(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Copy `words` to the start of RAM and point the hart at them.
pub fn load<P: Platform>(machine: &mut Machine<P>, words: &[u32]) {
    machine
        .mem
        .write_bytes(RAM_BASE, &program(words))
        .expect("program fits in RAM");
    machine.cpu.pc = RAM_BASE;
}
