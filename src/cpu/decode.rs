use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid opcode: 0x{inst:08x}")]
    InvalidOpcode { inst: u32 },
    #[error("invalid function: 0x{inst:08x}")]
    InvalidFunct { inst: u32 },
}

/// Read-modify-write operation of an A-extension AMO.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmoOp {
    Swap,
    Add,
    Xor,
    And,
    Or,
    Min,
    Max,
    Minu,
    Maxu,
}

impl AmoOp {
    /// Value written back to memory given the loaded word and rs2.
    pub fn apply(self, loaded: u32, src: u32) -> u32 {
        match self {
            AmoOp::Swap => src,
            AmoOp::Add => loaded.wrapping_add(src),
            AmoOp::Xor => loaded ^ src,
            AmoOp::And => loaded & src,
            AmoOp::Or => loaded | src,
            AmoOp::Min => (loaded as i32).min(src as i32) as u32,
            AmoOp::Max => (loaded as i32).max(src as i32) as u32,
            AmoOp::Minu => loaded.min(src),
            AmoOp::Maxu => loaded.max(src),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instr {
    // R-type (0b0110011)
    Add { rd: u8, rs1: u8, rs2: u8 },
    Sub { rd: u8, rs1: u8, rs2: u8 },
    Xor { rd: u8, rs1: u8, rs2: u8 },
    Or { rd: u8, rs1: u8, rs2: u8 },
    And { rd: u8, rs1: u8, rs2: u8 },
    Sll { rd: u8, rs1: u8, rs2: u8 },
    Srl { rd: u8, rs1: u8, rs2: u8 },
    Sra { rd: u8, rs1: u8, rs2: u8 },
    Slt { rd: u8, rs1: u8, rs2: u8 },
    Sltu { rd: u8, rs1: u8, rs2: u8 },
    // M extension, R-type with funct7 = 1
    Mul { rd: u8, rs1: u8, rs2: u8 },
    Mulh { rd: u8, rs1: u8, rs2: u8 },
    Mulhsu { rd: u8, rs1: u8, rs2: u8 },
    Mulhu { rd: u8, rs1: u8, rs2: u8 },
    Div { rd: u8, rs1: u8, rs2: u8 },
    Divu { rd: u8, rs1: u8, rs2: u8 },
    Rem { rd: u8, rs1: u8, rs2: u8 },
    Remu { rd: u8, rs1: u8, rs2: u8 },
    // I-type arithmetic (0b0010011)
    Addi { rd: u8, rs1: u8, imm: i32 },
    Xori { rd: u8, rs1: u8, imm: i32 },
    Ori { rd: u8, rs1: u8, imm: i32 },
    Andi { rd: u8, rs1: u8, imm: i32 },
    Slli { rd: u8, rs1: u8, shamt: u8 },
    Srli { rd: u8, rs1: u8, shamt: u8 },
    Srai { rd: u8, rs1: u8, shamt: u8 },
    Slti { rd: u8, rs1: u8, imm: i32 },
    Sltiu { rd: u8, rs1: u8, imm: i32 },
    // I-type load (0b0000011)
    LB { rd: u8, rs1: u8, off: i32 },
    LBU { rd: u8, rs1: u8, off: i32 },
    LH { rd: u8, rs1: u8, off: i32 },
    LHU { rd: u8, rs1: u8, off: i32 },
    LW { rd: u8, rs1: u8, off: i32 },
    // S-type (0b0100011)
    SB { rs1: u8, rs2: u8, off: i32 },
    SH { rs1: u8, rs2: u8, off: i32 },
    SW { rs1: u8, rs2: u8, off: i32 },
    // B-type (0b1100011)
    Beq { rs1: u8, rs2: u8, off: i32 },
    Bne { rs1: u8, rs2: u8, off: i32 },
    Blt { rs1: u8, rs2: u8, off: i32 },
    Bge { rs1: u8, rs2: u8, off: i32 },
    Bltu { rs1: u8, rs2: u8, off: i32 },
    Bgeu { rs1: u8, rs2: u8, off: i32 },
    // J-type (0b1101111)
    Jal { rd: u8, off: i32 },
    // I-type jump (0b1100111)
    Jalr { rd: u8, rs1: u8, off: i32 },
    // U-type, immediate already shifted into bits 31:12
    Lui { rd: u8, imm: u32 },   // 0b0110111
    Auipc { rd: u8, imm: u32 }, // 0b0010111
    // 0b0001111, no-ops on a single in-order hart
    Fence,
    FenceI,
    // System (0b1110011)
    Ecall,
    Ebreak,
    Mret,
    Wfi,
    Csrrw { rd: u8, csr: u16, rs1: u8 },
    Csrrs { rd: u8, csr: u16, rs1: u8 },
    Csrrc { rd: u8, csr: u16, rs1: u8 },
    Csrrwi { rd: u8, csr: u16, uimm: u8 },
    Csrrsi { rd: u8, csr: u16, uimm: u8 },
    Csrrci { rd: u8, csr: u16, uimm: u8 },
    // A extension (0b0101111), word width only
    LrW { rd: u8, rs1: u8 },
    ScW { rd: u8, rs1: u8, rs2: u8 },
    Amo { op: AmoOp, rd: u8, rs1: u8, rs2: u8 },
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

fn rd(inst: u32) -> u8 {
    ((inst >> 7) & 0x1f) as u8
}

fn rs1(inst: u32) -> u8 {
    ((inst >> 15) & 0x1f) as u8
}

fn rs2(inst: u32) -> u8 {
    ((inst >> 20) & 0x1f) as u8
}

fn funct3(inst: u32) -> u8 {
    ((inst >> 12) & 0x7) as u8
}

fn i_imm(inst: u32) -> i32 {
    sign_extend(inst >> 20, 12)
}

fn s_imm(inst: u32) -> i32 {
    let imm4_0 = (inst >> 7) & 0x1f;
    let imm11_5 = (inst >> 25) & 0x7f;
    sign_extend((imm11_5 << 5) | imm4_0, 12)
}

fn b_imm(inst: u32) -> i32 {
    let imm11 = (inst >> 7) & 0x1;
    let imm4_1 = (inst >> 8) & 0xf;
    let imm10_5 = (inst >> 25) & 0x3f;
    let imm12 = (inst >> 31) & 0x1;
    sign_extend(
        (imm12 << 12) | (imm11 << 11) | (imm10_5 << 5) | (imm4_1 << 1),
        13,
    )
}

fn j_imm(inst: u32) -> i32 {
    let imm19_12 = (inst >> 12) & 0xff;
    let imm11 = (inst >> 20) & 0x1;
    let imm10_1 = (inst >> 21) & 0x3ff;
    let imm20 = (inst >> 31) & 0x1;
    sign_extend(
        (imm20 << 20) | (imm19_12 << 12) | (imm11 << 11) | (imm10_1 << 1),
        21,
    )
}

pub fn decode(inst: u32) -> Result<Instr, DecodeError> {
    let opcode = inst & 0x7f;
    match opcode {
        // r type
        0b0110011 => {
            let (rd, rs1, rs2) = (rd(inst), rs1(inst), rs2(inst));
            let funct7 = ((inst >> 25) & 0x7f) as u8;

            match (funct3(inst), funct7) {
                (0x0, 0x00) => Ok(Instr::Add { rd, rs1, rs2 }),
                (0x0, 0x20) => Ok(Instr::Sub { rd, rs1, rs2 }),
                (0x1, 0x00) => Ok(Instr::Sll { rd, rs1, rs2 }),
                (0x2, 0x00) => Ok(Instr::Slt { rd, rs1, rs2 }),
                (0x3, 0x00) => Ok(Instr::Sltu { rd, rs1, rs2 }),
                (0x4, 0x00) => Ok(Instr::Xor { rd, rs1, rs2 }),
                (0x5, 0x00) => Ok(Instr::Srl { rd, rs1, rs2 }),
                (0x5, 0x20) => Ok(Instr::Sra { rd, rs1, rs2 }),
                (0x6, 0x00) => Ok(Instr::Or { rd, rs1, rs2 }),
                (0x7, 0x00) => Ok(Instr::And { rd, rs1, rs2 }),
                (0x0, 0x01) => Ok(Instr::Mul { rd, rs1, rs2 }),
                (0x1, 0x01) => Ok(Instr::Mulh { rd, rs1, rs2 }),
                (0x2, 0x01) => Ok(Instr::Mulhsu { rd, rs1, rs2 }),
                (0x3, 0x01) => Ok(Instr::Mulhu { rd, rs1, rs2 }),
                (0x4, 0x01) => Ok(Instr::Div { rd, rs1, rs2 }),
                (0x5, 0x01) => Ok(Instr::Divu { rd, rs1, rs2 }),
                (0x6, 0x01) => Ok(Instr::Rem { rd, rs1, rs2 }),
                (0x7, 0x01) => Ok(Instr::Remu { rd, rs1, rs2 }),
                _ => Err(DecodeError::InvalidFunct { inst }),
            }
        }
        // i type
        0b0010011 => {
            let (rd, rs1) = (rd(inst), rs1(inst));
            let imm = i_imm(inst);
            let shamt = ((inst >> 20) & 0x1f) as u8;
            let funct7 = ((inst >> 25) & 0x7f) as u8;

            match funct3(inst) {
                0x0 => Ok(Instr::Addi { rd, rs1, imm }),
                0x2 => Ok(Instr::Slti { rd, rs1, imm }),
                0x3 => Ok(Instr::Sltiu { rd, rs1, imm }),
                0x4 => Ok(Instr::Xori { rd, rs1, imm }),
                0x6 => Ok(Instr::Ori { rd, rs1, imm }),
                0x7 => Ok(Instr::Andi { rd, rs1, imm }),
                0x1 => match funct7 {
                    0x00 => Ok(Instr::Slli { rd, rs1, shamt }),
                    _ => Err(DecodeError::InvalidFunct { inst }),
                },
                0x5 => match funct7 {
                    0x00 => Ok(Instr::Srli { rd, rs1, shamt }),
                    0x20 => Ok(Instr::Srai { rd, rs1, shamt }),
                    _ => Err(DecodeError::InvalidFunct { inst }),
                },
                _ => Err(DecodeError::InvalidFunct { inst }),
            }
        }
        0b0000011 => {
            let (rd, rs1) = (rd(inst), rs1(inst));
            let off = i_imm(inst);

            match funct3(inst) {
                0x0 => Ok(Instr::LB { rd, rs1, off }),
                0x1 => Ok(Instr::LH { rd, rs1, off }),
                0x2 => Ok(Instr::LW { rd, rs1, off }),
                0x4 => Ok(Instr::LBU { rd, rs1, off }),
                0x5 => Ok(Instr::LHU { rd, rs1, off }),
                _ => Err(DecodeError::InvalidFunct { inst }),
            }
        }
        // s type
        0b0100011 => {
            let (rs1, rs2) = (rs1(inst), rs2(inst));
            let off = s_imm(inst);

            match funct3(inst) {
                0x0 => Ok(Instr::SB { rs1, rs2, off }),
                0x1 => Ok(Instr::SH { rs1, rs2, off }),
                0x2 => Ok(Instr::SW { rs1, rs2, off }),
                _ => Err(DecodeError::InvalidFunct { inst }),
            }
        }
        // b type
        0b1100011 => {
            let (rs1, rs2) = (rs1(inst), rs2(inst));
            let off = b_imm(inst);

            match funct3(inst) {
                0x0 => Ok(Instr::Beq { rs1, rs2, off }),
                0x1 => Ok(Instr::Bne { rs1, rs2, off }),
                0x4 => Ok(Instr::Blt { rs1, rs2, off }),
                0x5 => Ok(Instr::Bge { rs1, rs2, off }),
                0x6 => Ok(Instr::Bltu { rs1, rs2, off }),
                0x7 => Ok(Instr::Bgeu { rs1, rs2, off }),
                _ => Err(DecodeError::InvalidFunct { inst }),
            }
        }
        // u type
        0b0110111 => Ok(Instr::Lui {
            rd: rd(inst),
            imm: inst & 0xfffff000,
        }),
        0b0010111 => Ok(Instr::Auipc {
            rd: rd(inst),
            imm: inst & 0xfffff000,
        }),
        // j type
        0b1101111 => Ok(Instr::Jal {
            rd: rd(inst),
            off: j_imm(inst),
        }),
        // i type jalr
        0b1100111 => match funct3(inst) {
            0x0 => Ok(Instr::Jalr {
                rd: rd(inst),
                rs1: rs1(inst),
                off: i_imm(inst),
            }),
            _ => Err(DecodeError::InvalidFunct { inst }),
        },
        0b0001111 => match funct3(inst) {
            0x0 => Ok(Instr::Fence),
            0x1 => Ok(Instr::FenceI),
            _ => Err(DecodeError::InvalidFunct { inst }),
        },
        // i type environment
        0b1110011 => {
            let rd = rd(inst);
            let csr = (inst >> 20) as u16;
            let rs1 = rs1(inst);
            match funct3(inst) {
                0x0 => match inst >> 20 {
                    0x000 => Ok(Instr::Ecall),
                    0x001 => Ok(Instr::Ebreak),
                    0x302 => Ok(Instr::Mret),
                    0x105 => Ok(Instr::Wfi),
                    _ => Err(DecodeError::InvalidFunct { inst }),
                },
                0x1 => Ok(Instr::Csrrw { rd, csr, rs1 }),
                0x2 => Ok(Instr::Csrrs { rd, csr, rs1 }),
                0x3 => Ok(Instr::Csrrc { rd, csr, rs1 }),
                0x5 => Ok(Instr::Csrrwi { rd, csr, uimm: rs1 }),
                0x6 => Ok(Instr::Csrrsi { rd, csr, uimm: rs1 }),
                0x7 => Ok(Instr::Csrrci { rd, csr, uimm: rs1 }),
                _ => Err(DecodeError::InvalidFunct { inst }),
            }
        }
        // atomics; aq/rl bits are irrelevant on one hart
        0b0101111 => {
            if funct3(inst) != 0x2 {
                return Err(DecodeError::InvalidFunct { inst });
            }
            let (rd, rs1, rs2) = (rd(inst), rs1(inst), rs2(inst));
            let op = match inst >> 27 {
                0b00010 => return Ok(Instr::LrW { rd, rs1 }),
                0b00011 => return Ok(Instr::ScW { rd, rs1, rs2 }),
                0b00001 => AmoOp::Swap,
                0b00000 => AmoOp::Add,
                0b00100 => AmoOp::Xor,
                0b01100 => AmoOp::And,
                0b01000 => AmoOp::Or,
                0b10000 => AmoOp::Min,
                0b10100 => AmoOp::Max,
                0b11000 => AmoOp::Minu,
                0b11100 => AmoOp::Maxu,
                _ => return Err(DecodeError::InvalidFunct { inst }),
            };
            Ok(Instr::Amo { op, rd, rs1, rs2 })
        }
        _ => Err(DecodeError::InvalidOpcode { inst }),
    }
}
