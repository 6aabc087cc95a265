use std::fmt;

/// CSRs not backed by [`CsrFile`]. The engine hands these to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrError {
    UnsupportedRead(u16),
    UnsupportedWrite(u16),
}

impl fmt::Display for CsrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsrError::UnsupportedRead(csr) => write!(f, "unsupported CSR read: 0x{:03x}", csr),
            CsrError::UnsupportedWrite(csr) => write!(f, "unsupported CSR write: 0x{:03x}", csr),
        }
    }
}

/// Privilege modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivMode {
    User = 0,
    #[default]
    Machine = 3,
}

impl PrivMode {
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            0 => Some(PrivMode::User),
            3 => Some(PrivMode::Machine),
            _ => None,
        }
    }
}

pub const MSTATUS: u16 = 0x300;
pub const MISA: u16 = 0x301;
pub const MIE: u16 = 0x304;
pub const MTVEC: u16 = 0x305;
pub const MSCRATCH: u16 = 0x340;
pub const MEPC: u16 = 0x341;
pub const MCAUSE: u16 = 0x342;
pub const MTVAL: u16 = 0x343;
pub const MIP: u16 = 0x344;
pub const CYCLE: u16 = 0xC00;
pub const CYCLEH: u16 = 0xC80;
pub const MVENDORID: u16 = 0xF11;

/// mstatus bit positions
pub const MSTATUS_MIE: u32 = 1 << 3;
pub const MSTATUS_MPIE: u32 = 1 << 7;
pub const MSTATUS_MPP: u32 = 0b11 << 11;

/// Machine timer interrupt bit in mip/mie.
pub const MIP_MTIP: u32 = 1 << 7;
pub const MIE_MTIE: u32 = 1 << 7;

/// RV32 with A, I and M.
const MISA_VALUE: u32 = 0x4040_1101;
const MVENDORID_VALUE: u32 = 0xff0f_f0ff;

// extraflags layout: [1:0] privilege, [2] parked on WFI, [31:3] reservation slot.
const FLAG_PRIV: u32 = 0b11;
const FLAG_WFI: u32 = 1 << 2;
const RESERVATION_SHIFT: u32 = 3;

/// Largest RAM offset the reservation slot can describe.
pub const MAX_RESERVATION_OFFSET: u32 = ((u32::MAX >> RESERVATION_SHIFT) - 1) << 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsrFile {
    pub mstatus: u32,
    pub mie: u32,
    pub mip: u32,
    pub mepc: u32,
    pub mtval: u32,
    pub mcause: u32,
    pub mscratch: u32,
    pub mtvec: u32,

    /// One tick per attempted instruction.
    pub cycle: u64,

    extraflags: u32,
}

impl CsrFile {
    pub fn new() -> Self {
        let mut csr = Self::default();
        csr.set_priv_mode(PrivMode::Machine);
        csr
    }

    pub fn read(&self, csr: u16) -> Result<u32, CsrError> {
        match csr {
            // Machine trap setup
            MSTATUS => Ok(self.mstatus),
            MISA => Ok(MISA_VALUE),
            MIE => Ok(self.mie),
            MTVEC => Ok(self.mtvec),

            // Machine trap handling
            MSCRATCH => Ok(self.mscratch),
            MEPC => Ok(self.mepc),
            MCAUSE => Ok(self.mcause),
            MTVAL => Ok(self.mtval),
            MIP => Ok(self.mip),

            // Counters
            CYCLE => Ok(self.cycle as u32),
            CYCLEH => Ok((self.cycle >> 32) as u32),

            MVENDORID => Ok(MVENDORID_VALUE),

            _ => Err(CsrError::UnsupportedRead(csr)),
        }
    }

    pub fn write(&mut self, csr: u16, value: u32) -> Result<(), CsrError> {
        match csr {
            MSTATUS => self.mstatus = value,
            MIE => self.mie = value,
            MTVEC => self.mtvec = value,
            MSCRATCH => self.mscratch = value,
            MEPC => self.mepc = value,
            MCAUSE => self.mcause = value,
            MTVAL => self.mtval = value,
            MIP => self.mip = value,
            // WARL, nothing is switchable
            MISA => {}
            // Read-only range (top 2 bits == 0b11): cycle, cycleh, mvendorid, ...
            _ if (csr >> 10) == 0b11 => {}
            _ => return Err(CsrError::UnsupportedWrite(csr)),
        }
        Ok(())
    }

    /// Raw packed privilege / WFI / reservation word.
    pub fn extraflags(&self) -> u32 {
        self.extraflags
    }

    pub fn priv_mode(&self) -> PrivMode {
        PrivMode::from_u32(self.extraflags & FLAG_PRIV).unwrap_or(PrivMode::User)
    }

    pub fn set_priv_mode(&mut self, mode: PrivMode) {
        self.extraflags = (self.extraflags & !FLAG_PRIV) | mode as u32;
    }

    /// Extract MPP field from mstatus
    pub fn mpp(&self) -> PrivMode {
        PrivMode::from_u32((self.mstatus & MSTATUS_MPP) >> 11).unwrap_or(PrivMode::User)
    }

    /// Set MPP field in mstatus
    pub fn set_mpp(&mut self, mode: PrivMode) {
        self.mstatus = (self.mstatus & !MSTATUS_MPP) | ((mode as u32) << 11);
    }

    /// Whether the hart is parked on WFI.
    pub fn is_waiting(&self) -> bool {
        self.extraflags & FLAG_WFI != 0
    }

    pub fn set_waiting(&mut self, waiting: bool) {
        if waiting {
            self.extraflags |= FLAG_WFI;
        } else {
            self.extraflags &= !FLAG_WFI;
        }
    }

    /// RAM offset of the word reserved by the last LR.W, if any.
    ///
    /// The slot holds `offset / 4 + 1` so that an all-zero slot means "no
    /// reservation" even for the first word of RAM.
    pub fn reservation(&self) -> Option<u32> {
        match self.extraflags >> RESERVATION_SHIFT {
            0 => None,
            slot => Some((slot - 1) << 2),
        }
    }

    /// `offset` must be word aligned and at most [`MAX_RESERVATION_OFFSET`].
    pub fn set_reservation(&mut self, offset: Option<u32>) {
        let slot = offset.map_or(0, |off| (off >> 2) + 1);
        self.extraflags = (self.extraflags & (FLAG_PRIV | FLAG_WFI)) | (slot << RESERVATION_SHIFT);
    }

    /// Returns the interrupt cause to take, if one is pending, enabled and
    /// globally unmasked. Only the machine timer exists on this hart.
    pub fn check_pending_interrupt(&self) -> Option<u32> {
        let pending_enabled = self.mip & self.mie;
        if pending_enabled & MIP_MTIP == 0 {
            return None;
        }
        if self.mstatus & MSTATUS_MIE == 0 {
            return None;
        }
        Some(crate::cpu::trap::causes::MTI)
    }

    pub fn set_timer_interrupt(&mut self) {
        self.mip |= MIP_MTIP;
    }

    pub fn clear_timer_interrupt(&mut self) {
        self.mip &= !MIP_MTIP;
    }

    /// Return from a machine-mode trap handler.
    ///
    /// MPIE moves back into MIE, the current privilege is parked in MPP, and
    /// the privilege saved in MPP becomes current. Returns the resume address.
    pub fn mret(&mut self) -> u32 {
        let mstatus = self.mstatus;
        let prev = self.mpp();
        let current = self.priv_mode();

        let mie = (mstatus & MSTATUS_MPIE) >> 4;
        self.mstatus = (mstatus & !(MSTATUS_MIE | MSTATUS_MPP)) | mie | MSTATUS_MPIE;
        self.set_mpp(current);
        self.set_priv_mode(prev);
        self.mepc
    }
}
