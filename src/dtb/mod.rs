//! Flattened device tree for the emulated board.

use std::collections::HashMap;

use crate::mem::RAM_BASE;
use crate::platform::{SYSCON_POWEROFF, SYSCON_REBOOT};

const FDT_MAGIC: u32 = 0xd00dfeed;
const FDT_BEGIN_NODE: u32 = 1;
const FDT_END_NODE: u32 = 2;
const FDT_PROP: u32 = 3;
const FDT_END: u32 = 9;

const HEADER_LEN: u32 = 40;
const RSVMAP_LEN: u32 = 16;

/// Timer ticks per second advertised to the guest (one per microsecond).
pub const TIMEBASE_FREQUENCY: u32 = 1_000_000;

const CPU_INTC_PHANDLE: u32 = 1;
const SYSCON_PHANDLE: u32 = 2;

/// Device tree for a single `rv32ima` nommu hart with `usable_ram` bytes of
/// RAM visible to the kernel.
pub fn build_default_dtb(usable_ram: u32, bootargs: Option<&str>) -> Vec<u8> {
    let mut fdt = FdtBuilder::new();

    fdt.begin_node("");
    fdt.prop_u32("#address-cells", 2);
    fdt.prop_u32("#size-cells", 2);
    fdt.prop_str("compatible", "riscv-minimal-nommu");
    fdt.prop_str("model", "riscv-minimal-nommu,qemu");

    fdt.begin_node("chosen");
    fdt.prop_str("bootargs", bootargs.unwrap_or("earlycon=uart8250,mmio,0x10000000,1000000 console=ttyS0"));
    fdt.end_node();

    let mem_name = format!("memory@{RAM_BASE:x}");
    fdt.begin_node(&mem_name);
    fdt.prop_str("device_type", "memory");
    fdt.prop_u64s("reg", &[RAM_BASE as u64, usable_ram as u64]);
    fdt.end_node();

    fdt.begin_node("cpus");
    fdt.prop_u32("#address-cells", 1);
    fdt.prop_u32("#size-cells", 0);
    fdt.prop_u32("timebase-frequency", TIMEBASE_FREQUENCY);

    fdt.begin_node("cpu@0");
    fdt.prop_str("device_type", "cpu");
    fdt.prop_u32("reg", 0);
    fdt.prop_str("status", "okay");
    fdt.prop_str("compatible", "riscv");
    fdt.prop_str("riscv,isa", "rv32ima");
    fdt.prop_str("mmu-type", "riscv,none");

    fdt.begin_node("interrupt-controller");
    fdt.prop_u32("#interrupt-cells", 1);
    fdt.prop_empty("interrupt-controller");
    fdt.prop_str("compatible", "riscv,cpu-intc");
    fdt.prop_u32("phandle", CPU_INTC_PHANDLE);
    fdt.end_node();

    fdt.end_node(); // cpu@0
    fdt.end_node(); // cpus

    fdt.begin_node("soc");
    fdt.prop_u32("#address-cells", 2);
    fdt.prop_u32("#size-cells", 2);
    fdt.prop_str("compatible", "simple-bus");
    fdt.prop_empty("ranges");

    fdt.begin_node("uart@10000000");
    fdt.prop_u32("clock-frequency", 1_000_000);
    fdt.prop_u64s("reg", &[0x1000_0000, 0x100]);
    fdt.prop_str("compatible", "ns16550a");
    fdt.end_node();

    fdt.begin_node("poweroff");
    fdt.prop_u32("value", SYSCON_POWEROFF);
    fdt.prop_u32("offset", 0);
    fdt.prop_u32("regmap", SYSCON_PHANDLE);
    fdt.prop_str("compatible", "syscon-poweroff");
    fdt.end_node();

    fdt.begin_node("reboot");
    fdt.prop_u32("value", SYSCON_REBOOT);
    fdt.prop_u32("offset", 0);
    fdt.prop_u32("regmap", SYSCON_PHANDLE);
    fdt.prop_str("compatible", "syscon-reboot");
    fdt.end_node();

    fdt.begin_node("syscon@11100000");
    fdt.prop_u32("phandle", SYSCON_PHANDLE);
    fdt.prop_u64s("reg", &[0x1110_0000, 0x1000]);
    fdt.prop_str("compatible", "syscon");
    fdt.end_node();

    fdt.begin_node("clint@11000000");
    // Software interrupt 3 is listed for the kernel; only the timer (7) fires.
    fdt.prop_u32s("interrupts-extended", &[CPU_INTC_PHANDLE, 3, CPU_INTC_PHANDLE, 7]);
    fdt.prop_u64s("reg", &[0x1100_0000, 0x1_0000]);
    fdt.prop_str_list("compatible", &["sifive,clint0", "riscv,clint0"]);
    fdt.end_node();

    fdt.end_node(); // soc
    fdt.end_node(); // root

    fdt.finish()
}

struct FdtBuilder {
    struct_block: Vec<u8>,
    strings: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl FdtBuilder {
    fn new() -> Self {
        Self {
            struct_block: Vec::new(),
            strings: Vec::new(),
            offsets: HashMap::new(),
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.put_u32(FDT_END);

        let off_mem_rsvmap = HEADER_LEN;
        let off_dt_struct = off_mem_rsvmap + RSVMAP_LEN;
        let off_dt_strings = off_dt_struct + self.struct_block.len() as u32;
        let totalsize = (off_dt_strings + self.strings.len() as u32 + 3) & !3;

        let mut out = Vec::with_capacity(totalsize as usize);
        for word in [
            FDT_MAGIC,
            totalsize,
            off_dt_struct,
            off_dt_strings,
            off_mem_rsvmap,
            17, // version
            16, // last_comp_version
            0,  // boot_cpuid_phys
            self.strings.len() as u32,
            self.struct_block.len() as u32,
        ] {
            out.extend_from_slice(&word.to_be_bytes());
        }

        out.resize(off_dt_struct as usize, 0); // empty reservation map
        out.extend_from_slice(&self.struct_block);
        out.extend_from_slice(&self.strings);
        out.resize(totalsize as usize, 0);
        out
    }

    fn begin_node(&mut self, name: &str) {
        self.put_u32(FDT_BEGIN_NODE);
        self.struct_block.extend_from_slice(name.as_bytes());
        self.struct_block.push(0);
        Self::pad4(&mut self.struct_block);
    }

    fn end_node(&mut self) {
        self.put_u32(FDT_END_NODE);
    }

    fn prop_empty(&mut self, name: &str) {
        self.prop_raw(name, &[]);
    }

    fn prop_str(&mut self, name: &str, val: &str) {
        let mut bytes = Vec::with_capacity(val.len() + 1);
        bytes.extend_from_slice(val.as_bytes());
        bytes.push(0);
        self.prop_raw(name, &bytes);
    }

    fn prop_str_list(&mut self, name: &str, vals: &[&str]) {
        let mut bytes = Vec::new();
        for v in vals {
            bytes.extend_from_slice(v.as_bytes());
            bytes.push(0);
        }
        self.prop_raw(name, &bytes);
    }

    fn prop_u32(&mut self, name: &str, val: u32) {
        self.prop_raw(name, &val.to_be_bytes());
    }

    fn prop_u32s(&mut self, name: &str, vals: &[u32]) {
        let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.prop_raw(name, &bytes);
    }

    fn prop_u64s(&mut self, name: &str, vals: &[u64]) {
        let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.prop_raw(name, &bytes);
    }

    fn prop_raw(&mut self, name: &str, val: &[u8]) {
        let nameoff = self.string_offset(name);
        self.put_u32(FDT_PROP);
        self.put_u32(val.len() as u32);
        self.put_u32(nameoff);
        self.struct_block.extend_from_slice(val);
        Self::pad4(&mut self.struct_block);
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        if let Some(off) = self.offsets.get(name) {
            return *off;
        }
        let off = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        self.offsets.insert(name.to_string(), off);
        off
    }

    fn put_u32(&mut self, val: u32) {
        self.struct_block.extend_from_slice(&val.to_be_bytes());
    }

    fn pad4(buf: &mut Vec<u8>) {
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be32(bytes: &[u8], at: usize) -> u32 {
        u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    #[test]
    fn header_describes_blob() {
        let dtb = build_default_dtb(0x3ff_c000, None);
        assert_eq!(be32(&dtb, 0), FDT_MAGIC);
        assert_eq!(be32(&dtb, 4) as usize, dtb.len());
        assert_eq!(dtb.len() % 4, 0);

        let off_struct = be32(&dtb, 8) as usize;
        assert_eq!(be32(&dtb, off_struct), FDT_BEGIN_NODE);
        let off_strings = be32(&dtb, 12) as usize;
        assert_eq!(off_strings, off_struct + be32(&dtb, 36) as usize);
        assert_eq!(be32(&dtb, off_strings - 4), FDT_END);
    }

    #[test]
    fn ram_size_does_not_change_layout() {
        let a = build_default_dtb(0x10_0000, Some("console=hvc0"));
        let b = build_default_dtb(0x7f_0000, Some("console=hvc0"));
        assert_eq!(a.len(), b.len());
        assert!(find(&b, &0x7f_0000u64.to_be_bytes()).is_some());
    }

    #[test]
    fn bootargs_and_isa_are_embedded() {
        let dtb = build_default_dtb(0x10_0000, Some("quiet"));
        assert!(find(&dtb, b"quiet\0").is_some());
        assert!(find(&dtb, b"rv32ima\0").is_some());
        assert!(find(&dtb, b"ns16550a\0").is_some());
    }

    #[test]
    fn property_names_are_interned() {
        let dtb = build_default_dtb(0x10_0000, None);
        let off_strings = be32(&dtb, 12) as usize;
        let strings = &dtb[off_strings..];
        let count = strings
            .split(|&b| b == 0)
            .filter(|s| *s == b"compatible")
            .count();
        assert_eq!(count, 1);
    }
}
