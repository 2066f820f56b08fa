//! AVR in-system programming over JTAG.  Each operation here is a fixed sequence of 15-bit
//! programming commands; the opcode values come straight from the AVR JTAG programming
//! interface and are not derived from anything.
//!
//! Every write is followed by a poll that spins until the device reports completion.  There is
//! no timeout: **an unresponsive target makes these calls block indefinitely.**  Callers that
//! cannot afford that must bound the whole command from outside (the host transfer timeout does
//! this in practice).
//!
//! All operations enter from and return to Run-Test/Idle, apart from the page streaming calls
//! noted below.
use log::debug;

use crate::cable::Cable;
use crate::protocol::FuseWord;
use crate::statemachine::JtagSM;

// JTAG instructions
pub const INS_IDCODE: u8 = 0x1;
pub const INS_PROG_ENABLE: u8 = 0x4;
pub const INS_PROG_COMMANDS: u8 = 0x5;
pub const INS_PROG_PAGELOAD: u8 = 0x6;
pub const INS_PROG_PAGEREAD: u8 = 0x7;
pub const INS_AVR_RESET: u8 = 0xC;

pub const IR_LEN: u8 = 4;

/// Written to the programming enable register to unlock programming mode.
pub const PROG_ENABLE_SIGNATURE: u16 = 0xA370;

// Programming commands
pub const CMD_LOAD_DATA_LOW_BYTE: u16 = 0x1300;
pub const CMD_LOAD_ADDRESS_HIGH_BYTE: u16 = 0x0700;
pub const CMD_LOAD_ADDRESS_LOW_BYTE: u16 = 0x0300;

pub const CMD_1A_CHIP_ERASE_1: u16 = 0x2380;
pub const CMD_1A_CHIP_ERASE_2: u16 = 0x3180;
pub const CMD_1A_CHIP_ERASE_3: u16 = 0x3380;
pub const CMD_1A_POLL_ERASE: u16 = 0x3380;
pub const CMD_3A_ENTER_FLASH_READ: u16 = 0x2302;
pub const CMD_2A_ENTER_FLASH_WRITE: u16 = 0x2310;
pub const CMD_2G_WRITE_FLASH_PAGE: u16 = 0x3700;
pub const CMD_2H_POLL_FLASH_PAGE: u16 = 0x3700;

pub const CMD_6A_ENTER_FUSE_WRITE: u16 = 0x2340;
pub const CMD_6C_WRITE_EXT_BYTE: u16 = 0x3B00;
pub const CMD_6D_POLL_EXT_BYTE: u16 = 0x3700;
pub const CMD_6F_WRITE_HIGH_BYTE: u16 = 0x3700;
pub const CMD_6G_POLL_HIGH_BYTE: u16 = 0x3700;
pub const CMD_6I_WRITE_LOW_BYTE: u16 = 0x3300;
pub const CMD_6J_POLL_LOW_BYTE: u16 = 0x3300;
pub const CMD_7A_ENTER_LOCK_WRITE: u16 = 0x2320;
pub const CMD_7C_WRITE_LOCK_BYTE: u16 = 0x3300;
pub const CMD_7D_POLL_LOCK_BYTE: u16 = 0x3300;
pub const CMD_8A_ENTER_FUSE_READ: u16 = 0x2304;
pub const CMD_8F_READ_FUSES: u16 = 0x3A00;
pub const CMD_8F_READ_EXT_BYTE: u16 = 0x3E00;
pub const CMD_8F_READ_HIGH_BYTE: u16 = 0x3200;
pub const CMD_8F_READ_LOW_BYTE: u16 = 0x3600;
pub const CMD_8F_READ_LOCK_BITS: u16 = 0x3700;

/// Clearing this bit of a write command produces the write strobe.
const WRITE_STROBE: u16 = 0x0200;
/// Set in a poll response once the device has finished.
const READY: u16 = 0x0200;

const COMMAND_BITS: u8 = 15;

/// JTAGEN and SPIEN in the high fuse byte; setting either would cut the programmer off.
const HIGH_FUSE_INTERFACE_BITS: u8 = 0x60;

pub struct Avr<'a, C> {
    sm: &'a mut JtagSM<C>,
}

impl<'a, C: Cable> Avr<'a, C> {
    pub fn new(sm: &'a mut JtagSM<C>) -> Self {
        Self { sm }
    }

    /// Hold (`true`) or release (`false`) the device's reset line.
    pub fn reset_enable(&mut self, enable: bool) {
        self.sm.write_ir(INS_AVR_RESET, IR_LEN);
        self.sm.goto_shift();
        self.sm.clock(true, enable); // Exit1-DR
        self.sm.goto_idle();
    }

    /// Enter or leave programming mode.  Requires reset to be held.
    pub fn prog_mode_enable(&mut self, enable: bool) {
        self.sm.write_ir(INS_PROG_ENABLE, IR_LEN);
        self.sm.goto_shift();
        self.sm.exchange_u16(if enable { PROG_ENABLE_SIGNATURE } else { 0 }, 16);
        self.sm.goto_idle();
    }

    /// Shift one programming command, returning what the device shifted out.  The
    /// `INS_PROG_COMMANDS` instruction must already be loaded.
    pub fn write_command(&mut self, cmd: u16) -> u16 {
        self.sm.goto_shift();
        let response = self.sm.exchange_u16(cmd, COMMAND_BITS);
        self.sm.goto_idle();
        response
    }

    /// Spin until `poll` reports ready.  May block indefinitely.
    fn wait_ready(&mut self, poll: u16) {
        while self.write_command(poll) & READY == 0 {}
    }

    /// Issue a write command with its strobe pulse, then poll until the device has finished.
    /// May block indefinitely.
    fn strobe_and_wait(&mut self, write: u16, poll: u16) {
        self.write_command(write);
        self.write_command(write & !WRITE_STROBE);
        self.write_command(write);
        self.write_command(write);
        self.wait_ready(poll);
    }

    fn load_page_address(&mut self, page: u16) {
        // 128-byte pages are 64 words, so the word address is page << 6
        self.write_command(CMD_LOAD_ADDRESS_HIGH_BYTE | ((page >> 2) & 0xFF));
        self.write_command(CMD_LOAD_ADDRESS_LOW_BYTE | ((page & 0x03) << 6));
    }

    /// Read the extended, high and low fuse bytes and the lock bits.
    pub fn read_fuses(&mut self) -> FuseWord {
        self.sm.write_ir(INS_PROG_COMMANDS, IR_LEN);
        self.write_command(CMD_8A_ENTER_FUSE_READ);
        self.write_command(CMD_8F_READ_FUSES);
        let ext = self.write_command(CMD_8F_READ_EXT_BYTE) as u8;
        let high = self.write_command(CMD_8F_READ_HIGH_BYTE) as u8;
        let low = self.write_command(CMD_8F_READ_LOW_BYTE) as u8;
        let lock = self.write_command(CMD_8F_READ_LOCK_BITS) as u8;
        FuseWord { ext, high, low, lock }
    }

    /// Write all three fuse bytes and the lock bits, each as its own load, strobe and poll
    /// sequence.  With `protect_interface` the JTAGEN and SPIEN bits of the high byte are kept
    /// programmed.  May block indefinitely.
    pub fn write_fuses(&mut self, fuses: FuseWord, protect_interface: bool) {
        let high = if protect_interface {
            fuses.high & !HIGH_FUSE_INTERFACE_BITS
        } else {
            fuses.high
        };
        debug!("writing fuses {:08X} (high byte {:02X})", u32::from(fuses), high);

        self.sm.write_ir(INS_PROG_COMMANDS, IR_LEN);
        self.write_command(CMD_6A_ENTER_FUSE_WRITE);

        self.write_command(CMD_LOAD_DATA_LOW_BYTE | fuses.ext as u16);
        self.strobe_and_wait(CMD_6C_WRITE_EXT_BYTE, CMD_6D_POLL_EXT_BYTE);

        self.write_command(CMD_LOAD_DATA_LOW_BYTE | high as u16);
        self.strobe_and_wait(CMD_6F_WRITE_HIGH_BYTE, CMD_6G_POLL_HIGH_BYTE);

        self.write_command(CMD_LOAD_DATA_LOW_BYTE | fuses.low as u16);
        self.strobe_and_wait(CMD_6I_WRITE_LOW_BYTE, CMD_6J_POLL_LOW_BYTE);

        self.write_command(CMD_7A_ENTER_LOCK_WRITE);
        self.write_command(CMD_LOAD_DATA_LOW_BYTE | fuses.lock as u16);
        self.strobe_and_wait(CMD_7C_WRITE_LOCK_BYTE, CMD_7D_POLL_LOCK_BYTE);
    }

    /// Start reading a 128-byte page.  The leading protocol byte is already discarded; the TAP is
    /// left in Shift-DR for `read_flash_byte` / `read_flash_byte_end`.
    pub fn read_flash_begin(&mut self, page: u16) {
        self.sm.write_ir(INS_PROG_COMMANDS, IR_LEN);
        self.write_command(CMD_3A_ENTER_FLASH_READ);
        self.load_page_address(page);
        self.sm.write_ir(INS_PROG_PAGEREAD, IR_LEN);
        self.sm.goto_shift();
        self.sm.exchange_byte(0x00);
    }

    /// Next byte of the page being read; stays in Shift-DR.
    pub fn read_flash_byte(&mut self) -> u8 {
        self.sm.exchange_byte(0x00)
    }

    /// Last byte of the page being read; returns to Run-Test/Idle.
    pub fn read_flash_byte_end(&mut self) -> u8 {
        let byte = self.sm.exchange_byte_end(0x00);
        self.sm.goto_idle();
        byte
    }

    /// Start loading a 128-byte page.  The TAP is left in Shift-DR for `write_flash_byte`.
    pub fn write_flash_begin(&mut self, page: u16) {
        self.sm.write_ir(INS_PROG_COMMANDS, IR_LEN);
        self.write_command(CMD_2A_ENTER_FLASH_WRITE);
        self.load_page_address(page);
        self.sm.write_ir(INS_PROG_PAGELOAD, IR_LEN);
        self.sm.goto_shift();
    }

    /// Load the next page byte; stays in Shift-DR.
    pub fn write_flash_byte(&mut self, byte: u8) {
        self.sm.exchange_byte(byte);
    }

    /// Load the last page byte, leaving Shift-DR for Exit1-DR.
    pub fn write_flash_byte_end(&mut self, byte: u8) {
        self.sm.exchange_byte_end(byte);
    }

    /// Commit the loaded page and wait for the write to complete.  Expects the TAP in Exit1-DR
    /// (after `write_flash_byte_end`).  May block indefinitely.
    pub fn write_flash_end(&mut self) {
        self.sm.goto_idle();
        self.sm.write_ir(INS_PROG_COMMANDS, IR_LEN);
        self.strobe_and_wait(CMD_2G_WRITE_FLASH_PAGE, CMD_2H_POLL_FLASH_PAGE);
    }

    /// Erase flash and lock bits.  May block indefinitely.
    pub fn chip_erase(&mut self) {
        self.sm.write_ir(INS_PROG_COMMANDS, IR_LEN);
        self.write_command(CMD_1A_CHIP_ERASE_1);
        self.write_command(CMD_1A_CHIP_ERASE_2);
        self.write_command(CMD_1A_CHIP_ERASE_3);
        self.write_command(CMD_1A_CHIP_ERASE_3);
        self.wait_ready(CMD_1A_POLL_ERASE);
    }

    /// Reset the TAP, hold the device in reset and enter programming mode.
    pub fn enter_programming(&mut self) {
        self.sm.reset_to_idle();
        self.reset_enable(true);
        self.prog_mode_enable(true);
    }

    /// Leave programming mode and let the device run.
    pub fn leave_programming(&mut self) {
        self.prog_mode_enable(false);
        self.reset_enable(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cable::sim::AvrTarget;
    use crate::statemachine::JtagState;
    use crate::protocol::PAGE_SIZE;

    const IDCODE: u32 = 0x3940_403F;

    fn programming() -> JtagSM<AvrTarget> {
        let mut sm = JtagSM::new(AvrTarget::new(IDCODE));
        Avr::new(&mut sm).enter_programming();
        sm
    }

    #[test]
    fn test_programming_mode() {
        let mut sm = programming();
        assert!(sm.cable.in_reset);
        assert!(sm.cable.prog_enabled);
        assert_eq!(sm.cable.state, JtagState::Idle);

        Avr::new(&mut sm).leave_programming();
        assert!(!sm.cable.in_reset);
        assert!(!sm.cable.prog_enabled);
        assert_eq!(sm.cable.state, JtagState::Idle);
    }

    #[test]
    fn test_fuse_round_trip() {
        let mut sm = programming();
        for word in [0x0102_ABCD_u32, 0x0000_0000, 0xFFFF_FFFF, 0xFF00_FF00, 0x00FF_00FF] {
            let mut avr = Avr::new(&mut sm);
            avr.write_fuses(FuseWord::from(word), false);
            assert_eq!(u32::from(avr.read_fuses()), word);
        }
        assert_eq!(sm.cable.state, JtagState::Idle);
    }

    #[test]
    fn test_fuse_write_keeps_interface_enabled() {
        let mut sm = programming();
        let mut avr = Avr::new(&mut sm);
        avr.write_fuses(FuseWord::from(0xFFFF_FFFF), true);
        assert_eq!(u32::from(avr.read_fuses()), 0xFF9F_FFFF);
        avr.write_fuses(FuseWord::from(0x0102_ABCD), true);
        assert_eq!(u32::from(avr.read_fuses()), 0x0102_ABCD);
    }

    #[test]
    fn test_fuse_write_polls_until_ready() {
        let mut sm = programming();
        sm.cable.busy_polls = 20;
        Avr::new(&mut sm).write_fuses(FuseWord::from(0x0102_ABCD), false);
        assert_eq!(sm.cable.fuses, [0x01, 0x02, 0xAB, 0xCD]);
        assert_eq!(sm.cable.state, JtagState::Idle);
    }

    #[test]
    fn test_page_write_read() {
        let mut sm = programming();
        let page: u16 = 5;
        let data: alloc::vec::Vec<u8> = (0..PAGE_SIZE).map(|i| (i * 7 + 3) as u8).collect();

        let mut avr = Avr::new(&mut sm);
        avr.write_flash_begin(page);
        for &b in &data[..PAGE_SIZE - 1] {
            avr.write_flash_byte(b);
        }
        avr.write_flash_byte_end(data[PAGE_SIZE - 1]);
        avr.write_flash_end();

        let base = page as usize * PAGE_SIZE;
        assert_eq!(sm.cable.flash[base..base + PAGE_SIZE], data[..]);
        assert!(sm.cable.flash[..base].iter().all(|&b| b == 0xFF));

        let mut avr = Avr::new(&mut sm);
        avr.read_flash_begin(page);
        let mut read = alloc::vec::Vec::new();
        for _ in 0..PAGE_SIZE - 1 {
            read.push(avr.read_flash_byte());
        }
        read.push(avr.read_flash_byte_end());
        assert_eq!(read, data);
        assert_eq!(sm.cable.state, JtagState::Idle);
    }

    #[test]
    fn test_chip_erase() {
        let mut sm = programming();
        sm.cable.flash[..4].copy_from_slice(&[1, 2, 3, 4]);
        sm.cable.fuses[3] = 0xC0;
        sm.cable.busy_polls = 3;
        Avr::new(&mut sm).chip_erase();
        assert!(sm.cable.flash.iter().all(|&b| b == 0xFF));
        assert_eq!(sm.cable.fuses[3], 0xFF);
        assert_eq!(sm.cable.state, JtagState::Idle);
    }

    #[test]
    fn test_fuse_write_command_sequence() {
        let mut sm = programming();
        sm.cable.commands.clear();
        Avr::new(&mut sm).write_fuses(FuseWord::from(0x0102_ABCD), false);
        assert_eq!(
            sm.cable.commands,
            [
                0x2340, // enter fuse write
                0x1301, 0x3B00, 0x3900, 0x3B00, 0x3B00, 0x3700, // extended
                0x1302, 0x3700, 0x3500, 0x3700, 0x3700, 0x3700, // high
                0x13AB, 0x3300, 0x3100, 0x3300, 0x3300, 0x3300, // low
                0x2320, // enter lock write
                0x13CD, 0x3300, 0x3100, 0x3300, 0x3300, 0x3300, // lock
            ]
        );
    }

    #[test]
    fn test_fuse_write_polls_each_byte() {
        let mut sm = programming();
        sm.cable.busy_polls = 3;
        sm.cable.commands.clear();
        Avr::new(&mut sm).write_fuses(FuseWord::from(0x0102_ABCD), false);

        // the strobe and the two writes after it answer busy, so each byte takes two polls
        assert_eq!(
            sm.cable.commands,
            [
                0x2340,
                0x1301, 0x3B00, 0x3900, 0x3B00, 0x3B00, 0x3700, 0x3700,
                0x1302, 0x3700, 0x3500, 0x3700, 0x3700, 0x3700, 0x3700,
                0x13AB, 0x3300, 0x3100, 0x3300, 0x3300, 0x3300, 0x3300,
                0x2320,
                0x13CD, 0x3300, 0x3100, 0x3300, 0x3300, 0x3300, 0x3300,
            ]
        );
        assert_eq!(sm.cable.fuses, [0x01, 0x02, 0xAB, 0xCD]);
    }

    #[test]
    fn test_chip_erase_command_sequence() {
        let mut sm = programming();
        sm.cable.commands.clear();
        Avr::new(&mut sm).chip_erase();
        assert_eq!(sm.cable.commands, [0x2380, 0x3180, 0x3380, 0x3380, 0x3380]);
    }

    #[test]
    fn test_chip_erase_polls_until_ready() {
        let mut sm = programming();
        sm.cable.busy_polls = 5;
        sm.cable.commands.clear();
        Avr::new(&mut sm).chip_erase();
        assert_eq!(sm.cable.commands[..4], [0x2380, 0x3180, 0x3380, 0x3380]);
        assert_eq!(sm.cable.commands[4..], [0x3380; 4]);
    }

    #[test]
    fn test_page_write_command_sequence() {
        let mut sm = programming();
        sm.cable.commands.clear();
        let mut avr = Avr::new(&mut sm);
        avr.write_flash_begin(5);
        for _ in 0..PAGE_SIZE - 1 {
            avr.write_flash_byte(0x5A);
        }
        avr.write_flash_byte_end(0x5A);
        avr.write_flash_end();
        assert_eq!(
            sm.cable.commands,
            [0x2310, 0x0701, 0x0340, 0x3700, 0x3500, 0x3700, 0x3700, 0x3700]
        );
    }
}
