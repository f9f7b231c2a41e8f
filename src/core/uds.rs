//! UDS protocol helpers for emulated ECUs

use std::fmt;

/// UDS Service IDs
pub mod service_id {
    /// Diagnostic session control
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    /// ECU reset
    pub const ECU_RESET: u8 = 0x11;
    /// Read data by identifier
    pub const READ_DATA_BY_ID: u8 = 0x22;
    /// Read memory by address
    pub const READ_MEMORY_BY_ADDRESS: u8 = 0x23;
    /// Security access seed/key
    pub const SECURITY_ACCESS: u8 = 0x27;
    /// Routine control
    pub const ROUTINE_CONTROL: u8 = 0x31;
    /// Write memory by address
    pub const WRITE_MEMORY_BY_ADDRESS: u8 = 0x3D;
    /// Tester present
    pub const TESTER_PRESENT: u8 = 0x3E;
    /// Negative response marker
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
}

/// UDS Negative Response Codes (NRC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Nrc {
    /// General reject
    GeneralReject = 0x10,
    /// Service not supported
    ServiceNotSupported = 0x11,
    /// Sub-function not supported
    SubFunctionNotSupported = 0x12,
    /// Incorrect message length or format
    IncorrectMessageLengthOrFormat = 0x13,
    /// Conditions not correct
    ConditionsNotCorrect = 0x22,
    /// Request sequence error
    RequestSequenceError = 0x24,
    /// Request out of range
    RequestOutOfRange = 0x31,
    /// Security access denied
    SecurityAccessDenied = 0x33,
    /// Invalid key
    InvalidKey = 0x35,
    /// General programming failure
    GeneralProgrammingFailure = 0x72,
    /// Request received, response pending
    ResponsePending = 0x78,
}

impl Nrc {
    /// Raw code
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Nrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02X})", self, self.code())
    }
}

/// Positive response: service + 0x40 followed by data
pub fn positive_response(service_id: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(service_id.wrapping_add(0x40));
    response.extend_from_slice(data);
    response
}

/// Negative response: 7F, service, NRC
pub fn negative_response(service_id: u8, nrc: Nrc) -> Vec<u8> {
    vec![service_id::NEGATIVE_RESPONSE, service_id, nrc.code()]
}

/// Parse a hex command (`"27 01"`, `"2701"`) into bytes
pub fn parse_hex(cmd: &str) -> Option<Vec<u8>> {
    let compact: String = cmd.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact).ok()
}

/// Bytes as space-separated uppercase hex
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// ECU response header for a request header
///
/// 11-bit physical requests (`7E0`..`7E7`) are answered on `+8`.
/// 29-bit `18DA<target><source>` requests swap target and source.
pub fn response_header(request_header: &str) -> String {
    let header = request_header.trim().to_uppercase();
    if !header.is_ascii() {
        return header;
    }
    match header.len() {
        3 => match u16::from_str_radix(&header, 16) {
            Ok(id) if id == 0x7DF => "7E8".to_string(),
            Ok(id) => format!("{:03X}", id.wrapping_add(8) & 0x7FF),
            Err(_) => header,
        },
        8 if header.starts_with("18DA") => {
            format!("18DA{}{}", &header[6..8], &header[4..6])
        }
        _ => header,
    }
}

/// Template markup for one response frame
pub fn frame(header: &str, payload: &[u8]) -> String {
    format!(
        "<header>{}</header><size>{:02X}</size><data>{}</data>",
        header,
        payload.len(),
        to_hex(payload)
    )
}
