//! Plays decoded vector instructions against the scan chain.
//!
//! Data scans carry an expected response and a mask.  A scan whose masked response does not match
//! is retried from Shift-DR, by way of Pause-DR, up to the session's attempt budget.  A scan that
//! never matches is counted in the session's failure counter and playback carries on: mismatches
//! are never errors.
use log::{debug, trace, warn};

use crate::cable::Cable;
use crate::session::Session;
use crate::statemachine::{JtagSM, JtagState};
use crate::xsvf::{bytes_for_bits, Handler, ParseResult};

pub struct Player<'a, C> {
    sm: &'a mut JtagSM<C>,
    session: &'a mut Session,
}

impl<'a, C: Cable> Player<'a, C> {
    pub fn new(sm: &'a mut JtagSM<C>, session: &'a mut Session) -> Self {
        Player { sm, session }
    }

    /// Shift `length` bits of the MSB-first vector `tdi`, starting with its last byte, and exit
    /// to Exit1-xR.  `f` sees each byte index with the bits received for it.
    fn shift_vector<F: FnMut(usize, u8, u8)>(&mut self, length: u32, tdi: &[u8], mut f: F) {
        let n = bytes_for_bits(length);
        let tail_bits = (length - 8 * (n as u32 - 1)) as u8;
        for i in (0..n).rev() {
            let out = tdi.get(i).copied().unwrap_or(0);
            if i > 0 {
                f(i, self.sm.exchange_byte(out), 0xFF);
            } else {
                let valid = if tail_bits == 8 { 0xFF } else { (1u8 << tail_bits) - 1 };
                f(i, self.sm.exchange_u8(out, tail_bits), valid);
            }
        }
    }

    /// Pause-DR -> Exit2-DR -> Shift-DR -> Exit1-DR -> Update-DR -> Run-Test/Idle, from
    /// Exit1-DR.  Used between attempts of a verifying scan.
    fn rearm(&mut self) {
        self.sm.expect_state(&[JtagState::Exit1DR]);
        self.sm.clock(false, false);
        self.sm.clock(true, false);
        self.sm.clock(false, false);
        self.sm.clock(true, false);
        self.sm.clock(true, false);
        self.sm.clock(false, false);
    }
}

impl<C: Cable> Handler for Player<'_, C> {
    fn on_complete(&mut self) -> ParseResult {
        debug!("vector stream complete, {} failed scans", self.session.failures);
        Ok(())
    }

    fn on_instruction_scan(&mut self, length: u16, bits: &[u8]) -> ParseResult {
        if length == 0 {
            return Ok(());
        }
        self.sm.clock(true, false); // Select-DR-Scan
        self.sm.goto_shift();       // Shift-IR
        self.shift_vector(length as u32, bits, |_, _, _| {});
        self.sm.goto_idle();
        Ok(())
    }

    fn on_data_scan_with_expect(&mut self, length: u32, data: &[u8], mask: &[u8]) -> ParseResult {
        if length == 0 {
            return Ok(());
        }
        let n = bytes_for_bits(length);
        let (tdi, expected) = data.split_at(n.min(data.len()));
        let attempts = self.session.attempts();

        for attempt in 1..=attempts {
            self.sm.cable.delay_us(self.session.idle_us);
            self.sm.goto_shift();

            let mut matched = true;
            self.shift_vector(length, tdi, |i, rx, valid| {
                let exp = expected.get(i).copied().unwrap_or(0);
                let m = mask.get(i).copied().unwrap_or(0xFF) & valid;
                trace!("  [{}] sent {:02X} got {:02X} want {:02X} mask {:02X}",
                       i, tdi.get(i).copied().unwrap_or(0), rx, exp, m);
                if rx & m != exp & m {
                    matched = false;
                }
            });

            if matched {
                self.sm.goto_idle();
                return Ok(());
            }
            if attempt < attempts {
                trace!("data scan mismatch, attempt {} of {}", attempt, attempts);
                self.rearm();
            } else {
                self.sm.goto_idle();
                self.session.record_failure();
                warn!("data scan of {} bits failed after {} attempts", length, attempts);
            }
        }
        Ok(())
    }

    fn on_run_test_idle(&mut self, us: u32) -> ParseResult {
        self.session.idle_us = us;
        Ok(())
    }

    fn on_dont_care_mask(&mut self, _length: u32, _mask: &[u8]) -> ParseResult {
        Ok(())
    }

    fn on_set_dr_size(&mut self, _bits: u32) -> ParseResult {
        Ok(())
    }

    fn on_repeat(&mut self, retries: u8) -> ParseResult {
        self.session.set_retries(retries);
        Ok(())
    }

    fn on_state(&mut self, state: u8) -> ParseResult {
        // TAP navigation is implicit in the scans; explicit requests are accepted and ignored
        trace!("XSTATE {} ignored", state);
        Ok(())
    }
}
