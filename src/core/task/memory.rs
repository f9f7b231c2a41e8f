//! Memory access by address (0x23 / 0x3D)
//!
//! Requests carry an address-and-length format identifier (ALFID): the high
//! nibble is the size field length, the low nibble the address field
//! length, each 1..=4 bytes. Both services require an unlocked security
//! state.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::isotp::{Assembly, FrameAssembler};
use super::{Task, TaskContext, TaskOutcome};
use crate::core::uds::{service_id, Nrc};

/// Memory errors
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Access outside the emulated range
    #[error("Address range {address:#X}+{len} outside memory")]
    OutOfRange {
        /// Start address
        address: u32,
        /// Length in bytes
        len: usize,
    },

    /// Backing file error
    #[error("Memory file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Memory emulation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Backing file; memory is volatile when unset
    pub file: Option<PathBuf>,
    /// First emulated address
    pub base_address: u32,
    /// Emulated size in bytes
    pub size: u32,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            file: None,
            base_address: 0,
            size: 0x1_0000,
        }
    }
}

#[derive(Debug)]
enum Backing {
    File(File),
    Volatile(Vec<u8>),
}

/// Address-mapped storage
#[derive(Debug)]
pub struct MemoryStore {
    base: u32,
    size: u32,
    backing: Backing,
}

impl MemoryStore {
    /// Open the store described by `settings`
    pub fn open(settings: &MemorySettings) -> Result<Self, MemoryError> {
        match &settings.file {
            Some(path) => Self::bind(path, settings.base_address, settings.size),
            None => Ok(Self::volatile(settings.base_address, settings.size)),
        }
    }

    /// Zero-filled in-memory store
    pub fn volatile(base: u32, size: u32) -> Self {
        Self {
            base,
            size,
            backing: Backing::Volatile(vec![0; size as usize]),
        }
    }

    /// Bind to a binary file, growing it to `size` bytes
    pub fn bind(path: &Path, base: u32, size: u32) -> Result<Self, MemoryError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < u64::from(size) {
            file.set_len(u64::from(size))?;
        }
        tracing::info!("Memory bound to {} ({} bytes at {:#X})", path.display(), size, base);
        Ok(Self {
            base,
            size,
            backing: Backing::File(file),
        })
    }

    fn offset(&self, address: u32, len: usize) -> Result<usize, MemoryError> {
        match address.checked_sub(self.base) {
            Some(start) if u64::from(start) + len as u64 <= u64::from(self.size) => {
                Ok(start as usize)
            }
            _ => Err(MemoryError::OutOfRange { address, len }),
        }
    }

    /// Read `len` bytes at `address`
    pub fn read(&mut self, address: u32, len: usize) -> Result<Vec<u8>, MemoryError> {
        let offset = self.offset(address, len)?;
        match &mut self.backing {
            Backing::File(file) => {
                let mut buf = vec![0; len];
                file.seek(SeekFrom::Start(offset as u64))?;
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
            Backing::Volatile(mem) => Ok(mem[offset..offset + len].to_vec()),
        }
    }

    /// Write `data` at `address`
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
        let offset = self.offset(address, data.len())?;
        match &mut self.backing {
            Backing::File(file) => {
                file.seek(SeekFrom::Start(offset as u64))?;
                file.write_all(data)?;
                file.flush()?;
            }
            Backing::Volatile(mem) => mem[offset..offset + data.len()].copy_from_slice(data),
        }
        Ok(())
    }
}

/// Shared store handle
pub type SharedStore = Arc<Mutex<MemoryStore>>;

/// Parsed address/size request
#[derive(Debug, Clone, PartialEq, Eq)]
struct Addressed<'a> {
    alfid: u8,
    address: u32,
    size: usize,
    address_bytes: &'a [u8],
    size_bytes: &'a [u8],
    rest: &'a [u8],
}

fn be_value(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0, |acc, b| (acc << 8) | u32::from(*b))
}

/// Split `ALFID addr size rest` (service byte already removed)
fn parse_addressed(body: &[u8]) -> Option<Addressed<'_>> {
    let (&alfid, fields) = body.split_first()?;
    let size_len = usize::from(alfid >> 4);
    let addr_len = usize::from(alfid & 0x0F);
    if !(1..=4).contains(&size_len) || !(1..=4).contains(&addr_len) {
        return None;
    }
    if fields.len() < addr_len + size_len {
        return None;
    }
    let (address_bytes, tail) = fields.split_at(addr_len);
    let (size_bytes, rest) = tail.split_at(size_len);
    Some(Addressed {
        alfid,
        address: be_value(address_bytes),
        size: be_value(size_bytes) as usize,
        address_bytes,
        size_bytes,
        rest,
    })
}

/// Read memory by address
pub struct ReadMemory {
    store: SharedStore,
}

impl ReadMemory {
    /// Create a read task on `store`
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

impl Task for ReadMemory {
    fn service_id(&self) -> u8 {
        service_id::READ_MEMORY_BY_ADDRESS
    }

    fn run(&mut self, cx: &mut TaskContext<'_>) -> TaskOutcome {
        let Some(request) = cx.request() else {
            return TaskOutcome::Error(Nrc::SubFunctionNotSupported);
        };
        let parsed = match request.split_first() {
            Some((&service_id::READ_MEMORY_BY_ADDRESS, body)) => parse_addressed(body),
            _ => None,
        };
        let Some(req) = parsed.filter(|r| r.rest.is_empty() && r.size > 0) else {
            return TaskOutcome::Error(Nrc::SubFunctionNotSupported);
        };
        if !cx.shared.security_unlocked {
            return TaskOutcome::Error(Nrc::SecurityAccessDenied);
        }

        match self.store.lock().read(req.address, req.size) {
            Ok(data) => {
                tracing::info!("Read {} bytes at {:#X}", req.size, req.address);
                TaskOutcome::Answer(cx.positive(service_id::READ_MEMORY_BY_ADDRESS, &data))
            }
            Err(e) => {
                tracing::warn!("Memory read failed: {}", e);
                TaskOutcome::Error(Nrc::SubFunctionNotSupported)
            }
        }
    }
}

/// Write memory by address, reassembling multi-frame requests when the
/// adapter runs with CAN auto formatting off
pub struct WriteMemory {
    store: SharedStore,
    assembler: FrameAssembler,
}

impl WriteMemory {
    /// Create a write task on `store`
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            assembler: FrameAssembler::new(),
        }
    }

    fn write(&self, cx: &mut TaskContext<'_>, payload: &[u8]) -> TaskOutcome {
        let parsed = match payload.split_first() {
            Some((&service_id::WRITE_MEMORY_BY_ADDRESS, body)) => parse_addressed(body),
            _ => None,
        };
        let Some(req) = parsed.filter(|r| r.size > 0 && r.rest.len() == r.size) else {
            return TaskOutcome::Error(Nrc::SubFunctionNotSupported);
        };
        if !cx.shared.security_unlocked {
            return TaskOutcome::Error(Nrc::SecurityAccessDenied);
        }

        if let Err(e) = self.store.lock().write(req.address, req.rest) {
            tracing::warn!("Memory write failed: {}", e);
            return TaskOutcome::Error(Nrc::SubFunctionNotSupported);
        }
        tracing::info!("Wrote {} bytes at {:#X}", req.size, req.address);

        let mut echo = vec![req.alfid];
        echo.extend_from_slice(req.address_bytes);
        echo.extend_from_slice(req.size_bytes);
        TaskOutcome::Answer(cx.positive(service_id::WRITE_MEMORY_BY_ADDRESS, &echo))
    }
}

impl Task for WriteMemory {
    fn service_id(&self) -> u8 {
        service_id::WRITE_MEMORY_BY_ADDRESS
    }

    fn run(&mut self, cx: &mut TaskContext<'_>) -> TaskOutcome {
        let Some(bytes) = cx.request() else {
            return TaskOutcome::Error(Nrc::SubFunctionNotSupported);
        };
        if cx.can_auto_format() {
            self.assembler.reset();
            return self.write(cx, &bytes);
        }

        match self.assembler.push(&bytes) {
            Assembly::Complete(payload) => self.write(cx, &payload),
            // flow control: continue to send, no block size, no separation time
            Assembly::FirstFrame => TaskOutcome::Continue(format!(
                "<header>{}</header><data>30 00 00</data>",
                cx.response_header()
            )),
            Assembly::Consecutive => TaskOutcome::Continue(String::new()),
            Assembly::Rejected if self.assembler.expected().is_some() => {
                TaskOutcome::Continue(String::new())
            }
            Assembly::Rejected => TaskOutcome::Terminate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::counters::CAN_AUTO_FORMAT;
    use crate::core::task::test_support::Harness;

    fn store() -> SharedStore {
        Arc::new(Mutex::new(MemoryStore::volatile(0x1000, 0x100)))
    }

    #[test]
    fn test_alfid_parsing() {
        let req = parse_addressed(&[0x12, 0x10, 0x20, 0x04]).unwrap();
        assert_eq!(req.address, 0x1020);
        assert_eq!(req.size, 4);
        assert!(parse_addressed(&[0x05, 0x00]).is_none());
        assert!(parse_addressed(&[0x12, 0x10]).is_none());
    }

    #[test]
    fn test_locked_access_denied() {
        let mut h = Harness::new();
        let mut task = ReadMemory::new(store());
        assert_eq!(
            h.start(&mut task, "2312100004"),
            TaskOutcome::Error(Nrc::SecurityAccessDenied)
        );
    }

    #[test]
    fn test_write_then_read() {
        let mut h = Harness::new();
        h.shared.security_unlocked = true;
        let shared = store();

        let mut write = WriteMemory::new(shared.clone());
        assert_eq!(
            h.start(&mut write, "3D121010030A0B0C"),
            TaskOutcome::Answer(
                "<header>7E8</header><size>05</size><data>7D 12 10 10 03</data>".into()
            )
        );

        let mut read = ReadMemory::new(shared);
        assert_eq!(
            h.start(&mut read, "2312101004"),
            TaskOutcome::Answer(
                "<header>7E8</header><size>05</size><data>63 0A 0B 0C 00</data>".into()
            )
        );
    }

    #[test]
    fn test_out_of_range() {
        let mut h = Harness::new();
        h.shared.security_unlocked = true;
        let mut read = ReadMemory::new(store());
        assert_eq!(
            h.start(&mut read, "23120FFF02"),
            TaskOutcome::Error(Nrc::SubFunctionNotSupported)
        );
    }

    #[test]
    fn test_multi_frame_write() {
        let mut h = Harness::new();
        h.shared.security_unlocked = true;
        h.counters.set(CAN_AUTO_FORMAT, false);
        let shared = store();
        let mut write = WriteMemory::new(shared.clone());

        // 3D 14 <00 00 10 00> <04> 01 02 03 04
        let first = h.start(&mut write, "100B3D1400001000");
        assert_eq!(
            first,
            TaskOutcome::Continue("<header>7E8</header><data>30 00 00</data>".into())
        );
        assert_eq!(h.run(&mut write, "21040102"), TaskOutcome::Continue(String::new()));
        let done = h.run(&mut write, "220304");
        assert_eq!(
            done,
            TaskOutcome::Answer(
                "<header>7E8</header><size>07</size><data>7D 14 00 00 10 00 04</data>".into()
            )
        );
        assert_eq!(shared.lock().read(0x1000, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rejected_frame_without_transfer_ends_task() {
        let mut h = Harness::new();
        h.shared.security_unlocked = true;
        h.counters.set(CAN_AUTO_FORMAT, false);
        let mut write = WriteMemory::new(store());

        assert!(matches!(
            h.start(&mut write, "100B3D1400001000"),
            TaskOutcome::Continue(_)
        ));
        // out of sequence while a transfer is open: keep waiting
        assert_eq!(h.run(&mut write, "23040102"), TaskOutcome::Continue(String::new()));

        // a single frame completes and clears the transfer
        assert!(matches!(h.run(&mut write, "013D"), TaskOutcome::Error(_)));
        assert_eq!(h.run(&mut write, "21040102"), TaskOutcome::Terminate);
    }

    #[test]
    fn test_file_backing_grows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ecu.bin");
        let mut store = MemoryStore::bind(&path, 0, 64).unwrap();
        store.write(8, &[0xAA, 0xBB]).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);
        assert_eq!(store.read(8, 2).unwrap(), vec![0xAA, 0xBB]);
    }
}
