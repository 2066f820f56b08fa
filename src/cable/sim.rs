//! Simulated cables and transport for the unit tests.
use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use super::Cable;
use crate::avr;
use crate::dispatcher::Transport;
use crate::statemachine::JtagState;

/// TDO wired straight to TDI.  Tracks the TAP state and logs every clock.
pub struct Loopback {
    pub state: JtagState,
    pub tdi_log: Vec<bool>,
    pub tms_log: Vec<bool>,
}

impl Default for Loopback {
    fn default() -> Self {
        Loopback {
            state: JtagState::Reset,
            tdi_log: Vec::new(),
            tms_log: Vec::new(),
        }
    }
}

impl Cable for Loopback {
    fn clock(&mut self, tms: bool, tdi: bool) -> bool {
        if matches!(self.state, JtagState::ShiftDR | JtagState::ShiftIR) {
            self.tdi_log.push(tdi);
        }
        self.tms_log.push(tms);
        self.state = self.state.next(tms);
        tdi
    }
}

/// Loopback that inverts TDO during the first `fail_scans` data register scans.
pub struct FlakyLoopback {
    pub state: JtagState,
    pub fail_scans: u32,
    /// Capture-DR visits so far.
    pub captures: u32,
    pub delays: Vec<u32>,
}

impl FlakyLoopback {
    pub fn new(fail_scans: u32) -> Self {
        FlakyLoopback {
            state: JtagState::Reset,
            fail_scans,
            captures: 0,
            delays: Vec::new(),
        }
    }
}

impl Cable for FlakyLoopback {
    fn clock(&mut self, tms: bool, tdi: bool) -> bool {
        let tdo = if self.state == JtagState::ShiftDR && self.captures <= self.fail_scans {
            !tdi
        } else {
            tdi
        };
        self.state = self.state.next(tms);
        if self.state == JtagState::CaptureDR {
            self.captures += 1;
        }
        tdo
    }

    fn delay_us(&mut self, us: u32) {
        self.delays.push(us);
    }
}

pub const FLASH_SIZE: usize = 16384;
const PAGE_BUFFER: usize = 128;
const IR_CAPTURE: u8 = 0b0001;
const READY: u16 = 0x0200;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Mode {
    None,
    Erase,
    FlashRead,
    FlashWrite,
    FuseWrite,
    LockWrite,
    FuseRead,
}

/// An AVR JTAG TAP: 4-bit instruction register, the data registers the programming interface
/// uses, flash, fuses and lock bits.  Register activity follows the standard: capture on entry
/// to Capture-xR, shift on each clock spent in Shift-xR, update on entry to Update-xR.
pub struct AvrTarget {
    pub state: JtagState,
    pub idcode: u32,
    pub in_reset: bool,
    pub prog_enabled: bool,
    pub flash: Vec<u8>,
    /// Extended, high, low fuse bytes and lock bits.
    pub fuses: [u8; 4],
    /// Responses that report busy after each write strobe.
    pub busy_polls: u32,
    pub acquired: bool,
    /// Programming commands executed, in order.
    pub commands: Vec<u16>,

    ir: u8,
    ir_shift: u8,
    dr: u32,
    dr_len: u8,

    mode: Mode,
    busy: u32,
    address: u16,
    data: u8,
    response: u16,
    page: [u8; PAGE_BUFFER],
    byte_ptr: usize,
    bit_count: u8,
    byte_shift: u8,
}

impl AvrTarget {
    pub fn new(idcode: u32) -> Self {
        AvrTarget {
            state: JtagState::Reset,
            idcode,
            in_reset: false,
            prog_enabled: false,
            flash: vec![0xFF; FLASH_SIZE],
            fuses: [0xFF, 0x99, 0x62, 0xFF],
            busy_polls: 0,
            acquired: false,
            commands: Vec::new(),
            ir: avr::INS_IDCODE,
            ir_shift: 0,
            dr: 0,
            dr_len: 1,
            mode: Mode::None,
            busy: 0,
            address: 0,
            data: 0,
            response: 0,
            page: [0xFF; PAGE_BUFFER],
            byte_ptr: 0,
            bit_count: 0,
            byte_shift: 0,
        }
    }

    /// Currently latched instruction.
    pub fn ir(&self) -> u8 {
        self.ir
    }

    fn flash_base(&self) -> usize {
        self.address as usize * 2
    }

    fn capture_dr(&mut self) {
        self.bit_count = 0;
        self.byte_shift = 0;
        self.byte_ptr = 0;
        let (len, value) = match self.ir {
            avr::INS_IDCODE => (32, self.idcode),
            avr::INS_AVR_RESET => (1, self.in_reset as u32),
            avr::INS_PROG_ENABLE => (16, 0),
            avr::INS_PROG_COMMANDS => (15, self.response as u32),
            _ => (1, 0),
        };
        self.dr_len = len;
        self.dr = value;
    }

    fn shift_dr(&mut self, tdi: bool) -> bool {
        match self.ir {
            avr::INS_PROG_PAGELOAD => {
                self.byte_shift |= (tdi as u8) << self.bit_count;
                self.bit_count += 1;
                if self.bit_count == 8 {
                    self.page[self.byte_ptr % PAGE_BUFFER] = self.byte_shift;
                    self.byte_ptr += 1;
                    self.bit_count = 0;
                    self.byte_shift = 0;
                }
                false
            }
            avr::INS_PROG_PAGEREAD => {
                // the first byte out is a dummy
                let current = match self.byte_ptr {
                    0 => 0,
                    n => self.flash.get(self.flash_base() + n - 1).copied().unwrap_or(0xFF),
                };
                let tdo = current >> self.bit_count & 1 != 0;
                self.bit_count += 1;
                if self.bit_count == 8 {
                    self.byte_ptr += 1;
                    self.bit_count = 0;
                }
                tdo
            }
            _ => {
                let tdo = self.dr & 1 != 0;
                self.dr = (self.dr >> 1) | (tdi as u32) << (self.dr_len - 1);
                tdo
            }
        }
    }

    fn update_dr(&mut self) {
        match self.ir {
            avr::INS_AVR_RESET => self.in_reset = self.dr & 1 != 0,
            avr::INS_PROG_ENABLE => self.prog_enabled = self.dr as u16 == avr::PROG_ENABLE_SIGNATURE,
            avr::INS_PROG_COMMANDS if self.prog_enabled => self.execute(self.dr as u16),
            _ => {}
        }
    }

    fn execute(&mut self, cmd: u16) {
        self.commands.push(cmd);
        let mut response = None;
        let mut strobe = false;
        match cmd {
            avr::CMD_1A_CHIP_ERASE_1 => self.mode = Mode::Erase,
            avr::CMD_3A_ENTER_FLASH_READ => self.mode = Mode::FlashRead,
            avr::CMD_2A_ENTER_FLASH_WRITE => self.mode = Mode::FlashWrite,
            avr::CMD_6A_ENTER_FUSE_WRITE => self.mode = Mode::FuseWrite,
            avr::CMD_7A_ENTER_LOCK_WRITE => self.mode = Mode::LockWrite,
            avr::CMD_8A_ENTER_FUSE_READ => self.mode = Mode::FuseRead,
            _ => match (cmd & 0xFF00, self.mode) {
                (avr::CMD_LOAD_ADDRESS_HIGH_BYTE, _) => {
                    self.address = (self.address & 0x00FF) | (cmd & 0xFF) << 8;
                }
                (avr::CMD_LOAD_ADDRESS_LOW_BYTE, _) => {
                    self.address = (self.address & 0xFF00) | (cmd & 0xFF);
                }
                (avr::CMD_LOAD_DATA_LOW_BYTE, _) => self.data = cmd as u8,
                (0x3100, Mode::Erase) if cmd == 0x3180 => {
                    self.flash.fill(0xFF);
                    self.fuses[3] = 0xFF;
                    strobe = true;
                }
                (0x3500, Mode::FlashWrite) => {
                    let base = self.flash_base();
                    if let Some(dst) = self.flash.get_mut(base..base + PAGE_BUFFER) {
                        dst.copy_from_slice(&self.page);
                    }
                    strobe = true;
                }
                (0x3900, Mode::FuseWrite) => {
                    self.fuses[0] = self.data;
                    strobe = true;
                }
                (0x3500, Mode::FuseWrite) => {
                    self.fuses[1] = self.data;
                    strobe = true;
                }
                (0x3100, Mode::FuseWrite) => {
                    self.fuses[2] = self.data;
                    strobe = true;
                }
                (0x3100, Mode::LockWrite) => {
                    self.fuses[3] = self.data;
                    strobe = true;
                }
                (avr::CMD_8F_READ_FUSES, Mode::FuseRead) => response = Some(self.fuses[0] as u16),
                (avr::CMD_8F_READ_EXT_BYTE, Mode::FuseRead) => response = Some(self.fuses[1] as u16),
                (avr::CMD_8F_READ_HIGH_BYTE, Mode::FuseRead) => response = Some(self.fuses[2] as u16),
                (avr::CMD_8F_READ_LOW_BYTE, Mode::FuseRead) => response = Some(self.fuses[3] as u16),
                _ => {}
            },
        }
        // the device stays busy from the strobe onwards
        if strobe {
            self.busy = self.busy_polls;
        }
        self.response = match response {
            Some(r) => r,
            None if self.busy > 0 => {
                self.busy -= 1;
                0
            }
            None => READY,
        };
    }
}

impl Cable for AvrTarget {
    fn clock(&mut self, tms: bool, tdi: bool) -> bool {
        let tdo = match self.state {
            JtagState::ShiftDR => self.shift_dr(tdi),
            JtagState::ShiftIR => {
                let tdo = self.ir_shift & 1 != 0;
                self.ir_shift = (self.ir_shift >> 1) | (tdi as u8) << (avr::IR_LEN - 1);
                tdo
            }
            _ => false,
        };

        self.state = self.state.next(tms);
        match self.state {
            JtagState::Reset => self.ir = avr::INS_IDCODE,
            JtagState::CaptureIR => self.ir_shift = IR_CAPTURE,
            JtagState::UpdateIR => self.ir = self.ir_shift & 0xF,
            JtagState::CaptureDR => self.capture_dr(),
            JtagState::UpdateDR => self.update_dr(),
            _ => {}
        }
        tdo
    }

    fn acquire(&mut self) {
        self.acquired = true;
    }

    fn release(&mut self) {
        self.acquired = false;
    }
}

/// Failure injected into `MockTransport`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MockError {
    /// A bulk read asked for more bytes than the host queued.
    Underrun,
}

/// Host side of the transport: queued bulk OUT data, captured control and bulk IN data.
#[derive(Default)]
pub struct MockTransport {
    pub bulk_out: VecDeque<u8>,
    pub bulk_in: Vec<u8>,
    pub control_in: Vec<u8>,
    pub acks: u32,
    pub flushes: u32,
}

impl MockTransport {
    pub fn with_bulk(data: &[u8]) -> Self {
        MockTransport {
            bulk_out: data.iter().copied().collect(),
            ..Default::default()
        }
    }
}

impl Transport for MockTransport {
    type Error = MockError;

    fn control_write(&mut self, data: &[u8]) -> Result<(), MockError> {
        self.control_in.extend_from_slice(data);
        Ok(())
    }

    fn control_ack(&mut self) -> Result<(), MockError> {
        self.acks += 1;
        Ok(())
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<(), MockError> {
        if self.bulk_out.len() < buf.len() {
            self.bulk_out.clear();
            return Err(MockError::Underrun);
        }
        for b in buf.iter_mut() {
            *b = self.bulk_out.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    fn bulk_write(&mut self, data: &[u8]) -> Result<(), MockError> {
        self.bulk_in.extend_from_slice(data);
        Ok(())
    }

    fn bulk_flush(&mut self) -> Result<(), MockError> {
        self.flushes += 1;
        Ok(())
    }
}
