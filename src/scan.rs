//! Shift-exchange primitives built from single clocks.  Data goes out least-significant bit
//! first while TDO is sampled in; results are right-justified.  The `exchange_*` calls that take a
//! bit count raise TMS together with the final bit, so they start in Shift-xR and finish in
//! Exit1-xR: follow them with `goto_idle`.
use crate::cable::Cable;
use crate::statemachine::{JtagSM, JtagState};

impl<C: Cable> JtagSM<C> {
    fn shift_bits(&mut self, data: u32, bits: u8, exit: bool) -> u32 {
        let mut result = 0;
        for i in 0..bits {
            let last = i == bits - 1;
            if self.clock(exit && last, (data >> i) & 1 != 0) {
                result |= 1 << i;
            }
        }
        result
    }

    /// Exchange a whole byte and stay in Shift-xR.
    pub fn exchange_byte(&mut self, data: u8) -> u8 {
        self.expect_state(&[JtagState::ShiftDR, JtagState::ShiftIR]);
        self.shift_bits(data as u32, 8, false) as u8
    }

    /// Exchange a whole byte, leaving Shift-xR for Exit1-xR on the last bit.
    pub fn exchange_byte_end(&mut self, data: u8) -> u8 {
        self.exchange_u8(data, 8)
    }

    /// Exchange the low `bits` bits of `data` (1 to 8) and exit to Exit1-xR.
    pub fn exchange_u8(&mut self, data: u8, bits: u8) -> u8 {
        self.expect_state(&[JtagState::ShiftDR, JtagState::ShiftIR]);
        let bits = bits.clamp(1, 8);
        self.shift_bits(data as u32, bits, true) as u8
    }

    /// Exchange the low `bits` bits of `data` (1 to 16) and exit to Exit1-xR.
    pub fn exchange_u16(&mut self, data: u16, bits: u8) -> u16 {
        self.expect_state(&[JtagState::ShiftDR, JtagState::ShiftIR]);
        let bits = bits.clamp(1, 16);
        self.shift_bits(data as u32, bits, true) as u16
    }

    /// Exchange the low `bits` bits of `data` (1 to 32) and exit to Exit1-xR.
    pub fn exchange_u32(&mut self, data: u32, bits: u8) -> u32 {
        self.expect_state(&[JtagState::ShiftDR, JtagState::ShiftIR]);
        let bits = bits.clamp(1, 32);
        self.shift_bits(data, bits, true)
    }

    /// Load an instruction of up to 8 bits.  Run-Test/Idle on entry and on exit.
    pub fn write_ir(&mut self, ir: u8, bits: u8) {
        self.clock(true, false);    // Select-DR-Scan
        self.goto_shift();          // Shift-IR
        self.exchange_u8(ir, bits); // Exit1-IR
        self.goto_idle();
    }

    /// Reset the TAP, which selects the identity register, and shift it out.  Leaves the TAP in
    /// Run-Test/Idle.
    pub fn read_idcode(&mut self) -> u32 {
        self.reset_to_idle();
        self.goto_shift();
        let idcode = self.exchange_u32(0, 32);
        self.goto_idle();
        idcode
    }
}
