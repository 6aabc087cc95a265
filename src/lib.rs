pub mod console;
pub mod cpu;
pub mod csr;
pub mod debug;
pub mod dtb;
pub mod emulator;
pub mod image;
pub mod mem;
pub mod platform;
