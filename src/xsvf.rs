//! Incremental XSVF decoder.  Bytes arrive in transport-sized chunks that do not respect
//! instruction boundaries, so the decoder keeps a partially collected instruction between calls
//! to `feed` and hands each complete one to a `Handler`.
//!
//! Integers in the stream are big-endian and scan data is packed most-significant byte first.
use alloc::vec;
use alloc::vec::Vec;

use log::{debug, trace};
use thiserror::Error;

pub const XCOMPLETE: u8 = 0x00;
pub const XTDOMASK: u8 = 0x01;
pub const XSIR: u8 = 0x02;
pub const XSDR: u8 = 0x03;
pub const XRUNTEST: u8 = 0x04;
pub const XREPEAT: u8 = 0x07;
pub const XSDRSIZE: u8 = 0x08;
pub const XSDRTDO: u8 = 0x09;
pub const XSTATE: u8 = 0x12;
pub const XENDIR: u8 = 0x13;
pub const XENDDR: u8 = 0x14;
pub const XSIR2: u8 = 0x15;
pub const XCOMMENT: u8 = 0x16;

#[derive(Error, Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    #[error("unsupported XSVF instruction 0x{0:02X}")]
    UnsupportedCommand(u8),
    #[error("scan of {bits} bits is longer than the decoder buffers")]
    ScanTooLong { bits: u32 },
    #[error("stream ended part way through an instruction")]
    Truncated,
}

impl ParseError {
    /// Value reported in the status word.  Success is 0.
    pub fn code(&self) -> u32 {
        match self {
            ParseError::UnsupportedCommand(_) => 1,
            ParseError::ScanTooLong { .. } => 2,
            ParseError::Truncated => 3,
        }
    }
}

pub type ParseResult = Result<(), ParseError>;

/// Receives decoded instructions one at a time.
pub trait Handler {
    /// End of the vector stream.
    fn on_complete(&mut self) -> ParseResult;

    /// Load an instruction register `length` bits long.
    fn on_instruction_scan(&mut self, length: u16, bits: &[u8]) -> ParseResult;

    /// Shift a data register `length` bits long and check what comes back.  `data` holds the bytes
    /// to send followed by the expected response, each `ceil(length / 8)` bytes; `mask` selects
    /// which response bits matter.
    fn on_data_scan_with_expect(&mut self, length: u32, data: &[u8], mask: &[u8]) -> ParseResult;

    /// Time to spend in Run-Test/Idle ahead of each following data scan.
    fn on_run_test_idle(&mut self, us: u32) -> ParseResult;

    /// New compare mask.  The decoder keeps it and passes it with each data scan.
    fn on_dont_care_mask(&mut self, length: u32, mask: &[u8]) -> ParseResult;

    /// New data register length for the following scans.
    fn on_set_dr_size(&mut self, bits: u32) -> ParseResult;

    /// Retry budget for following data scans.
    fn on_repeat(&mut self, retries: u8) -> ParseResult;

    /// Explicit TAP state request.
    fn on_state(&mut self, state: u8) -> ParseResult;
}

/// Returns number of whole bytes required to hold `n` bits.
pub fn bytes_for_bits(n: u32) -> usize {
    ((n as usize) + 7) / 8
}

enum State {
    Opcode,
    Operands(u8),
    Comment,
    Done,
}

pub struct Decoder {
    max_scan_bits: u32,
    sdr_bits: u32,
    mask: Vec<u8>,
    operands: Vec<u8>,
    state: State,
}

impl Decoder {
    pub fn new(max_scan_bits: u32) -> Self {
        Decoder {
            max_scan_bits,
            sdr_bits: 0,
            mask: Vec::new(),
            operands: Vec::new(),
            state: State::Opcode,
        }
    }

    /// True once XCOMPLETE has been seen; anything after it is ignored.
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Decode the next chunk of the stream.
    pub fn feed<H: Handler>(&mut self, bytes: &[u8], handler: &mut H) -> ParseResult {
        for &byte in bytes {
            match self.state {
                State::Done => return Ok(()),
                State::Comment => {
                    if byte == 0 {
                        self.state = State::Opcode;
                    }
                }
                State::Opcode => self.start(byte, handler)?,
                State::Operands(op) => {
                    self.operands.push(byte);
                    if self.operands.len() == self.operand_len(op)? {
                        self.execute(op, handler)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Check that the stream did not stop inside an instruction.
    pub fn finish(&self) -> ParseResult {
        match self.state {
            State::Operands(_) | State::Comment => Err(ParseError::Truncated),
            State::Opcode | State::Done => Ok(()),
        }
    }

    fn start<H: Handler>(&mut self, op: u8, handler: &mut H) -> ParseResult {
        match op {
            XCOMMENT => {
                self.state = State::Comment;
                Ok(())
            }
            XCOMPLETE | XTDOMASK | XSIR | XRUNTEST | XREPEAT | XSDRSIZE | XSDRTDO | XSTATE
            | XENDIR | XENDDR | XSIR2 => {
                self.operands.clear();
                self.state = State::Operands(op);
                if self.operand_len(op)? == 0 {
                    self.execute(op, handler)?;
                }
                Ok(())
            }
            _ => Err(ParseError::UnsupportedCommand(op)),
        }
    }

    // Total operand bytes for `op`, as far as can be told from what has been collected so far.
    fn operand_len(&self, op: u8) -> Result<usize, ParseError> {
        let sdr_bytes = bytes_for_bits(self.sdr_bits);
        let len = match op {
            XCOMPLETE => 0,
            XTDOMASK => sdr_bytes,
            XSDRTDO => 2 * sdr_bytes,
            XRUNTEST | XSDRSIZE => 4,
            XREPEAT | XSTATE | XENDIR | XENDDR => 1,
            XSIR => match self.operands.first() {
                None => 1,
                Some(&bits) => 1 + bytes_for_bits(bits as u32),
            },
            XSIR2 => match self.operands[..] {
                [hi, lo, ..] => {
                    let bits = u16::from_be_bytes([hi, lo]) as u32;
                    if bits > self.max_scan_bits {
                        return Err(ParseError::ScanTooLong { bits });
                    }
                    2 + bytes_for_bits(bits)
                }
                _ => 2,
            },
            _ => return Err(ParseError::UnsupportedCommand(op)),
        };
        Ok(len)
    }

    fn execute<H: Handler>(&mut self, op: u8, handler: &mut H) -> ParseResult {
        let operands = core::mem::take(&mut self.operands);
        self.state = State::Opcode;

        let result = match op {
            XCOMPLETE => {
                debug!("XCOMPLETE");
                self.state = State::Done;
                handler.on_complete()
            }
            XTDOMASK => {
                self.mask.clone_from(&operands);
                handler.on_dont_care_mask(self.sdr_bits, &self.mask)
            }
            XSIR => {
                trace!("XSIR {} bits", operands[0]);
                handler.on_instruction_scan(operands[0] as u16, &operands[1..])
            }
            XSIR2 => {
                let bits = u16::from_be_bytes([operands[0], operands[1]]);
                trace!("XSIR2 {} bits", bits);
                handler.on_instruction_scan(bits, &operands[2..])
            }
            XRUNTEST => handler.on_run_test_idle(be_u32(&operands)),
            XREPEAT => handler.on_repeat(operands[0]),
            XSDRSIZE => {
                let bits = be_u32(&operands);
                if bits > self.max_scan_bits {
                    return Err(ParseError::ScanTooLong { bits });
                }
                if bits != self.sdr_bits {
                    // a new length starts with every bit compared until XTDOMASK says otherwise
                    self.mask = vec![0xFF; bytes_for_bits(bits)];
                }
                self.sdr_bits = bits;
                handler.on_set_dr_size(bits)
            }
            XSDRTDO => {
                trace!("XSDRTDO {} bits", self.sdr_bits);
                handler.on_data_scan_with_expect(self.sdr_bits, &operands, &self.mask)
            }
            XSTATE => handler.on_state(operands[0]),
            XENDIR | XENDDR => Ok(()),
            _ => Err(ParseError::UnsupportedCommand(op)),
        };

        // hand the allocation back for the next instruction
        self.operands = operands;
        self.operands.clear();
        result
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
