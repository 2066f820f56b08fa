//! This provides the navigation half of the TAP driver on top of the `Cable` trait.  The TAP
//! position is not tracked: every public operation in this crate is entered from, and returns to,
//! Run-Test/Idle, except for the flash streaming operations which park the TAP in Shift-DR
//! between chunks.  Debug builds carry a shadow copy of the state and assert that callers honour
//! that convention; release builds carry nothing.
use crate::cable::Cable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JtagState {
    Reset = 0,
    Idle = 1,
    SelectDR = 2,
    CaptureDR = 3,
    ShiftDR = 4,
    Exit1DR = 5,
    PauseDR = 6,
    Exit2DR = 7,
    UpdateDR = 8,
    SelectIR = 9,
    CaptureIR = 10,
    ShiftIR = 11,
    Exit1IR = 12,
    PauseIR = 13,
    Exit2IR = 14,
    UpdateIR = 15,
}

impl JtagState {
    // [TMS low, TMS high] successors for each state, indexed by discriminant
    const EDGES: [[JtagState; 2]; 16] = {
        use JtagState::*;
        [
            [Idle, Reset],
            [Idle, SelectDR],
            [CaptureDR, SelectIR],
            [ShiftDR, Exit1DR],
            [ShiftDR, Exit1DR],
            [PauseDR, UpdateDR],
            [PauseDR, Exit2DR],
            [ShiftDR, UpdateDR],
            [Idle, SelectDR],
            [CaptureIR, Reset],
            [ShiftIR, Exit1IR],
            [ShiftIR, Exit1IR],
            [PauseIR, UpdateIR],
            [PauseIR, Exit2IR],
            [ShiftIR, UpdateIR],
            [Idle, SelectDR],
        ]
    };

    /// The state reached after one TCK with the given TMS level.
    pub fn next(self, tms: bool) -> JtagState {
        Self::EDGES[self as usize][tms as usize]
    }
}

pub struct JtagSM<C> {
    pub cable: C,
    #[cfg(debug_assertions)]
    state: Option<JtagState>,
}

impl<C: Cable> JtagSM<C> {
    /// Wrap an existing `Cable`.  Nothing is clocked; call `reset` or `reset_to_idle` first.
    pub fn new(cable: C) -> Self {
        Self {
            cable,
            #[cfg(debug_assertions)]
            state: None,
        }
    }

    /// One TCK cycle.  Returns the sampled TDO level.
    #[inline]
    pub fn clock(&mut self, tms: bool, tdi: bool) -> bool {
        #[cfg(debug_assertions)]
        {
            self.state = self.state.map(|s| s.next(tms));
        }
        self.cable.clock(tms, tdi)
    }

    /// Reset the scan chain by driving TMS high for 5 clocks
    pub fn reset(&mut self) {
        for _ in 0..5 {
            self.clock(true, false);
        }
        #[cfg(debug_assertions)]
        {
            self.state = Some(JtagState::Reset);
        }
    }

    /// Reset and then settle in Run-Test/Idle
    pub fn reset_to_idle(&mut self) {
        self.reset();
        self.clock(false, false);
    }

    /// Run-Test/Idle -> Select-DR -> Capture-DR -> Shift-DR.  Entered from Select-DR instead, the
    /// same three clocks land in Shift-IR.
    pub fn goto_shift(&mut self) {
        self.expect_state(&[
            JtagState::Idle, JtagState::SelectDR, JtagState::UpdateDR, JtagState::UpdateIR,
        ]);
        self.clock(true, false);
        self.clock(false, false);
        self.clock(false, false);
    }

    /// Exit1-xR -> Update-xR -> Run-Test/Idle.  Every scan primitive leaves the TAP in Exit1.
    pub fn goto_idle(&mut self) {
        self.expect_state(&[JtagState::Exit1DR, JtagState::Exit1IR]);
        self.clock(true, false);
        self.clock(false, false);
    }

    #[allow(unused_variables)]
    pub(crate) fn expect_state(&self, allowed: &[JtagState]) {
        #[cfg(debug_assertions)]
        {
            if let Some(state) = self.state {
                debug_assert!(allowed.contains(&state), "TAP in {:?}, expected one of {:?}", state, allowed);
            }
        }
    }
}
