//! Free-running machine timer and its compare register.

/// 64-bit timer plus compare value. A compare value of zero leaves the
/// timer unarmed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub time: u64,
    pub compare: u64,
}

impl Timer {
    /// Advance by `elapsed` host time units. Returns whether the compare
    /// match is firing.
    pub fn advance(&mut self, elapsed: u32) -> bool {
        self.time = self.time.wrapping_add(elapsed as u64);
        self.is_firing()
    }

    pub fn is_armed(&self) -> bool {
        self.compare != 0
    }

    pub fn is_firing(&self) -> bool {
        self.is_armed() && self.time > self.compare
    }

    pub fn time_low(&self) -> u32 {
        self.time as u32
    }

    pub fn time_high(&self) -> u32 {
        (self.time >> 32) as u32
    }

    pub fn set_compare_low(&mut self, value: u32) {
        self.compare = (self.compare & 0xffff_ffff_0000_0000) | value as u64;
    }

    pub fn set_compare_high(&mut self, value: u32) {
        self.compare = (self.compare & 0xffff_ffff) | ((value as u64) << 32);
    }
}
