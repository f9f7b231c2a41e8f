//! Virtual serial endpoints
//!
//! Supports:
//! - PTY pairs (Linux/macOS): the emulator owns the master side and clients
//!   open the slave path like any serial device
//! - Loopback channels for tests

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::io;
use std::time::{Duration, Instant};

/// Endpoint type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualPortType {
    /// PTY pair (Unix)
    Pty,
    /// In-process channel pair
    Loopback,
}

/// Byte-oriented, full-duplex endpoint driven by the worker thread
pub trait Endpoint: Send {
    /// Read one byte, waiting at most `timeout`
    ///
    /// `Ok(None)` on timeout; an error once the endpoint is closed.
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>>;

    /// Write all bytes
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Path or name clients connect to
    fn name(&self) -> String;

    /// Endpoint type
    fn port_type(&self) -> VirtualPortType;
}

#[cfg(unix)]
pub use pty::PtyEndpoint;

#[cfg(unix)]
mod pty {
    use super::{Endpoint, VirtualPortType};
    use crate::core::error::{EmulatorError, Result};
    use nix::sys::termios::{self, SetArg};
    use std::ffi::CStr;
    use std::fs::File;
    use std::io::{self, Read, Write};
    use std::os::unix::io::{AsRawFd, FromRawFd};
    use std::time::Duration;

    /// PTY pair; the slave stays open so client disconnects do not end the
    /// session
    #[derive(Debug)]
    pub struct PtyEndpoint {
        master: File,
        _slave: File,
        slave_name: String,
    }

    impl PtyEndpoint {
        /// Create a PTY pair in raw mode
        pub fn open() -> Result<Self> {
            let mut master_fd: libc::c_int = -1;
            let mut slave_fd: libc::c_int = -1;
            let mut name_buf = [0 as libc::c_char; 256];

            // SAFETY: out-pointers are valid for the call; the name buffer
            // exceeds the size openpty writes into.
            let result = unsafe {
                libc::openpty(
                    &mut master_fd,
                    &mut slave_fd,
                    name_buf.as_mut_ptr(),
                    std::ptr::null_mut::<libc::termios>(),
                    std::ptr::null_mut::<libc::winsize>(),
                )
            };
            if result != 0 {
                return Err(EmulatorError::VirtualPort(format!(
                    "openpty failed: {}",
                    io::Error::last_os_error()
                )));
            }

            // SAFETY: openpty succeeded, both descriptors are open and owned here.
            let (master, slave) = unsafe { (File::from_raw_fd(master_fd), File::from_raw_fd(slave_fd)) };
            // SAFETY: openpty wrote a NUL-terminated path.
            let slave_name = unsafe { CStr::from_ptr(name_buf.as_ptr()) }
                .to_string_lossy()
                .into_owned();

            let mut attrs = termios::tcgetattr(&slave)
                .map_err(|e| EmulatorError::VirtualPort(format!("tcgetattr: {}", e)))?;
            termios::cfmakeraw(&mut attrs);
            termios::tcsetattr(&slave, SetArg::TCSANOW, &attrs)
                .map_err(|e| EmulatorError::VirtualPort(format!("tcsetattr: {}", e)))?;

            tracing::info!("Created PTY pair, slave at {}", slave_name);
            Ok(Self {
                master,
                _slave: slave,
                slave_name,
            })
        }
    }

    impl Endpoint for PtyEndpoint {
        fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
            let mut fds = [libc::pollfd {
                fd: self.master.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            }];
            let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
            // SAFETY: fds is a valid array of one pollfd.
            let ready = unsafe { libc::poll(fds.as_mut_ptr(), 1, millis) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                return if err.kind() == io::ErrorKind::Interrupted {
                    Ok(None)
                } else {
                    Err(err)
                };
            }
            if ready == 0 {
                return Ok(None);
            }

            let mut byte = [0u8; 1];
            match self.master.read(&mut byte) {
                Ok(0) => Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(_) => Ok(Some(byte[0])),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.master.write_all(data)?;
            self.master.flush()
        }

        fn name(&self) -> String {
            self.slave_name.clone()
        }

        fn port_type(&self) -> VirtualPortType {
            VirtualPortType::Pty
        }
    }
}

/// Emulator side of a loopback pair
#[derive(Debug)]
pub struct LoopbackEndpoint {
    rx: Receiver<u8>,
    tx: Sender<u8>,
    name: String,
}

/// Client side of a loopback pair
#[derive(Debug, Clone)]
pub struct LoopbackClient {
    tx: Sender<u8>,
    rx: Receiver<u8>,
}

/// Create a connected endpoint/client pair
pub fn loopback_pair(name: &str) -> (LoopbackEndpoint, LoopbackClient) {
    let (to_emulator, from_client) = unbounded();
    let (to_client, from_emulator) = unbounded();
    (
        LoopbackEndpoint {
            rx: from_client,
            tx: to_client,
            name: format!("loopback:{}", name),
        },
        LoopbackClient {
            tx: to_emulator,
            rx: from_emulator,
        },
    )
}

impl Endpoint for LoopbackEndpoint {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        match self.rx.recv_timeout(timeout) {
            Ok(byte) => Ok(Some(byte)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::ErrorKind::UnexpectedEof.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        for &byte in data {
            self.tx
                .send(byte)
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        }
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn port_type(&self) -> VirtualPortType {
        VirtualPortType::Loopback
    }
}

impl LoopbackClient {
    /// Send raw bytes to the emulator
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        for &byte in data {
            self.tx
                .send(byte)
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        }
        Ok(())
    }

    /// Send a command followed by a carriage return
    pub fn send_line(&self, cmd: &str) -> io::Result<()> {
        self.send(cmd.as_bytes())?;
        self.send(b"\r")
    }

    /// Collect output up to and including the prompt
    ///
    /// `None` when `timeout` elapses first.
    pub fn read_until_prompt(&self, prompt: u8, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let byte = self.rx.recv_timeout(remaining).ok()?;
            out.push(byte);
            if byte == prompt {
                return Some(String::from_utf8_lossy(&out).into_owned());
            }
        }
    }

    /// Collect whatever arrives within `wait`
    pub fn drain(&self, wait: Duration) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(byte) = self.rx.recv_timeout(wait) {
            out.push(byte);
        }
        out
    }
}
