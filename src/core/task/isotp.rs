//! ISO-TP request reassembly
//!
//! With CAN auto formatting off the client sends raw frames: a single
//! frame `0L ..`, or a first frame `1L LL ..` announcing the total length
//! followed by consecutive frames `2N ..`.

/// Result of feeding one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// Whole payload available
    Complete(Vec<u8>),
    /// First frame accepted, flow control expected by the sender
    FirstFrame,
    /// Consecutive frame accepted, more to come
    Consecutive,
    /// Frame ignored (bad PCI, wrong sequence, nothing in progress)
    Rejected,
}

/// Multi-frame buffer
#[derive(Debug, Clone, Default)]
pub struct FrameAssembler {
    expected: Option<usize>,
    next_seq: u8,
    buffer: Vec<u8>,
}

impl FrameAssembler {
    /// Create an idle assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Total length announced by the current first frame
    pub fn expected(&self) -> Option<usize> {
        self.expected
    }

    /// Bytes collected so far
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one frame
    pub fn push(&mut self, frame: &[u8]) -> Assembly {
        let Some(&pci) = frame.first() else {
            return Assembly::Rejected;
        };

        match pci >> 4 {
            0x0 => {
                let len = usize::from(pci & 0x0F);
                if len == 0 || frame.len() < 1 + len {
                    return Assembly::Rejected;
                }
                self.clear();
                Assembly::Complete(frame[1..=len].to_vec())
            }
            0x1 => {
                if frame.len() < 2 {
                    return Assembly::Rejected;
                }
                let total = (usize::from(pci & 0x0F) << 8) | usize::from(frame[1]);
                if total == 0 {
                    return Assembly::Rejected;
                }
                self.expected = Some(total);
                self.buffer = frame[2..].to_vec();
                self.next_seq = 1;
                self.finish_or(Assembly::FirstFrame)
            }
            0x2 => {
                if self.expected.is_none() || pci & 0x0F != self.next_seq {
                    tracing::debug!(
                        "Ignoring consecutive frame {:X}, expected {:X}",
                        pci & 0x0F,
                        self.next_seq
                    );
                    return Assembly::Rejected;
                }
                self.buffer.extend_from_slice(&frame[1..]);
                self.next_seq = (self.next_seq + 1) & 0x0F;
                self.finish_or(Assembly::Consecutive)
            }
            _ => Assembly::Rejected,
        }
    }

    fn finish_or(&mut self, partial: Assembly) -> Assembly {
        match self.expected {
            Some(total) if self.buffer.len() >= total => {
                let mut payload = std::mem::take(&mut self.buffer);
                payload.truncate(total);
                self.clear();
                Assembly::Complete(payload)
            }
            _ => partial,
        }
    }

    /// Drop any transfer in progress
    pub fn reset(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.expected = None;
        self.next_seq = 0;
        self.buffer.clear();
    }
}
