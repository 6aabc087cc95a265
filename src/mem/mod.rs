use thiserror::Error;

/// Physical address where guest RAM starts.
pub const RAM_BASE: u32 = 0x8000_0000;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    #[error("address out of range: 0x{0:08x}")]
    Oob(u32),
}

/// Flat guest RAM mapped at [`RAM_BASE`].
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    data: Vec<u8>,
    pub base: u32,
}

impl Memory {
    pub fn new(bytes: usize) -> Self {
        Self {
            data: vec![0; bytes],
            base: RAM_BASE,
        }
    }

    fn check_oob(&self, addr: u32, size: u32) -> Result<usize, MemError> {
        let a = addr.checked_sub(self.base).ok_or(MemError::Oob(addr))? as usize;
        let end = a.checked_add(size as usize).ok_or(MemError::Oob(addr))?;
        if end > self.data.len() {
            return Err(MemError::Oob(addr));
        }
        Ok(a)
    }

    /// Whether `[addr, addr + size)` lies entirely inside RAM.
    pub fn contains(&self, addr: u32, size: u32) -> bool {
        self.check_oob(addr, size).is_ok()
    }

    /// Offset of `addr` from the start of RAM, if it is backed by RAM.
    pub fn offset_of(&self, addr: u32) -> Option<u32> {
        self.check_oob(addr, 1).ok().map(|off| off as u32)
    }

    // Misaligned accesses are allowed; only the range is checked.

    pub fn read_u8(&self, addr: u32) -> Result<u8, MemError> {
        let off = self.check_oob(addr, 1)?;
        Ok(self.data[off])
    }

    pub fn read_u16(&self, addr: u32) -> Result<u16, MemError> {
        let off = self.check_oob(addr, 2)?;
        let b = &self.data[off..off + 2];
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&self, addr: u32) -> Result<u32, MemError> {
        let off = self.check_oob(addr, 4)?;
        let b = &self.data[off..off + 4];
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn write_u8(&mut self, addr: u32, v: u8) -> Result<(), MemError> {
        let off = self.check_oob(addr, 1)?;
        self.data[off] = v;
        Ok(())
    }

    pub fn write_u16(&mut self, addr: u32, v: u16) -> Result<(), MemError> {
        let off = self.check_oob(addr, 2)?;
        self.data[off..off + 2].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, addr: u32, v: u32) -> Result<(), MemError> {
        let off = self.check_oob(addr, 4)?;
        self.data[off..off + 4].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), MemError> {
        let len = u32::try_from(bytes.len()).map_err(|_| MemError::Oob(addr))?;
        let off = self.check_oob(addr, len)?;
        self.data[off..off + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Bytes of the NUL-terminated string starting at `addr`, without the
    /// terminator. An unterminated string runs to the end of RAM.
    pub fn read_cstr(&self, addr: u32) -> Result<&[u8], MemError> {
        let off = self.check_oob(addr, 1)?;
        let tail = &self.data[off..];
        let len = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Ok(&tail[..len])
    }

    /// Zero all of RAM.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn end_addr(&self) -> u64 {
        self.base as u64 + self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_addresses_outside_ram() {
        let mem = Memory::new(16);
        assert_eq!(mem.read_u8(RAM_BASE - 1), Err(MemError::Oob(RAM_BASE - 1)));
        assert_eq!(mem.read_u32(RAM_BASE + 13), Err(MemError::Oob(RAM_BASE + 13)));
        assert!(mem.read_u32(RAM_BASE + 12).is_ok());
        assert!(!mem.contains(0x1000_0000, 1));
    }

    #[test]
    fn little_endian_layout() {
        let mut mem = Memory::new(8);
        mem.write_u32(RAM_BASE, 0x1122_3344).unwrap();
        assert_eq!(mem.read_u8(RAM_BASE).unwrap(), 0x44);
        assert_eq!(mem.read_u16(RAM_BASE + 2).unwrap(), 0x1122);
    }

    #[test]
    fn cstr_stops_at_nul() {
        let mut mem = Memory::new(8);
        mem.write_bytes(RAM_BASE + 1, b"hi\0x").unwrap();
        assert_eq!(mem.read_cstr(RAM_BASE + 1).unwrap(), b"hi");
        assert_eq!(mem.read_cstr(RAM_BASE + 4).unwrap(), b"x");
    }

    #[test]
    fn end_addr_does_not_wrap() {
        let mem = Memory::new(0x100);
        assert_eq!(mem.end_addr(), 0x8000_0100);
        assert_eq!(mem.offset_of(RAM_BASE + 0xff), Some(0xff));
        assert_eq!(mem.offset_of(RAM_BASE + 0x100), None);
    }
}
