//! Host terminal used as the guest UART.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver};
use std::thread;

/// Byte-oriented terminal the platform devices talk to.
pub trait Terminal {
    fn write_bytes(&mut self, bytes: &[u8]);

    /// Whether a byte is waiting to be read.
    fn has_input(&mut self) -> bool;

    fn read_byte(&mut self) -> Option<u8>;
}

/// Non-blocking stdin/stdout console.
///
/// A background thread reads stdin byte by byte into a channel, so polling
/// from the emulation loop never blocks.
pub struct Console {
    rx: Receiver<u8>,
    pending: Option<u8>,
    output_failed: bool,
    #[cfg(unix)]
    _raw: Option<RawModeGuard>,
}

impl Console {
    pub fn new() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();

        #[cfg(unix)]
        let raw = RawModeGuard::new();

        thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                let mut buffer = [0u8; 1];
                loop {
                    match stdin.lock().read(&mut buffer) {
                        Ok(1) => {
                            if tx.send(buffer[0]).is_err() {
                                break;
                            }
                        }
                        Ok(_) => break, // EOF
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(_) => break,
                    }
                }
            })?;

        Ok(Self {
            rx,
            pending: None,
            output_failed: false,
            #[cfg(unix)]
            _raw: raw,
        })
    }

    /// Take one byte if the input thread has produced one.
    pub fn try_read(&mut self) -> Option<u8> {
        self.pending.take().or_else(|| self.rx.try_recv().ok())
    }
}

impl Terminal for Console {
    fn write_bytes(&mut self, bytes: &[u8]) {
        if let Err(e) = emit(&mut io::stdout().lock(), bytes) {
            // Warn once, then keep dropping output.
            if !self.output_failed {
                log::warn!("console output failed: {e}");
                self.output_failed = true;
            }
        }
    }

    fn has_input(&mut self) -> bool {
        if self.pending.is_none() {
            self.pending = self.rx.try_recv().ok();
        }
        self.pending.is_some()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.try_read()
    }
}

/// In-memory terminal: scripted input, captured output.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BufferedTerminal {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
}

impl BufferedTerminal {
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            output: Vec::new(),
        }
    }

    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Terminal for BufferedTerminal {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    fn has_input(&mut self) -> bool {
        !self.input.is_empty()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
}

fn emit<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    out.write_all(bytes)?;
    out.flush()
}

/// Puts stdin in non-canonical, no-echo mode until dropped.
#[cfg(unix)]
struct RawModeGuard {
    original: libc::termios,
}

#[cfg(unix)]
impl RawModeGuard {
    /// `None` when stdin is not a terminal.
    fn new() -> Option<Self> {
        use std::mem::MaybeUninit;
        use std::os::unix::io::AsRawFd;

        let fd = io::stdin().as_raw_fd();
        let mut original = MaybeUninit::<libc::termios>::uninit();

        unsafe {
            if libc::isatty(fd) == 0 || libc::tcgetattr(fd, original.as_mut_ptr()) != 0 {
                return None;
            }
            let original = original.assume_init();

            let mut raw = original;
            raw.c_lflag &= !(libc::ICANON | libc::ECHO);
            raw.c_cc[libc::VMIN] = 1;
            raw.c_cc[libc::VTIME] = 0;
            if libc::tcsetattr(fd, libc::TCSANOW, &raw) != 0 {
                log::warn!(
                    "could not switch the terminal to raw mode: {}",
                    io::Error::last_os_error()
                );
                return None;
            }

            Some(Self { original })
        }
    }
}

#[cfg(unix)]
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        let fd = io::stdin().as_raw_fd();
        let restored = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &self.original) };
        if restored != 0 {
            log::warn!(
                "could not restore terminal mode: {}",
                io::Error::last_os_error()
            );
        }
        if let Err(e) = io::stdout().flush() {
            log::warn!("flushing stdout failed: {e}");
        }
    }
}
