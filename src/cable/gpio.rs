//! Bit-bang the TAP over four GPIO lines.  A fifth output enables the level shifter (or buffer)
//! between the programmer and the target; it is driven high only while the TAP is in use, so the
//! target's pins float the rest of the time.
use core::convert::Infallible;

use embedded_hal::{delay::DelayNs, digital::{InputPin, OutputPin, PinState}};

use crate::cable::Cable;

pub struct Gpio<Clk, Tdi, Tdo, Tms, En, Delay>
    where Clk: OutputPin<Error = Infallible>, Tdi: OutputPin<Error = Infallible>,
          Tdo: InputPin<Error = Infallible>, Tms: OutputPin<Error = Infallible>,
          En: OutputPin<Error = Infallible>, Delay: DelayNs
{
    half_period: u32,
    delay: Delay,
    clock: Clk,
    tdi: Tdi,
    tdo: Tdo,
    tms: Tms,
    enable: En,
}

// MCU HALs report `Infallible` for plain GPIO, so there is nothing to propagate.
fn ok<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

impl<Clk, Tdi, Tdo, Tms, En, Delay> Gpio<Clk, Tdi, Tdo, Tms, En, Delay>
    where Clk: OutputPin<Error = Infallible>, Tdi: OutputPin<Error = Infallible>,
          Tdo: InputPin<Error = Infallible>, Tms: OutputPin<Error = Infallible>,
          En: OutputPin<Error = Infallible>, Delay: DelayNs
{
    /// Create a cable clocking TCK at roughly `freq_khz`.  A half period of zero nanoseconds
    /// (very high `freq_khz`) runs the lines as fast as the pins toggle.  The buffer starts
    /// disabled.
    pub fn new(freq_khz: u32, clock: Clk, tdi: Tdi, tdo: Tdo, tms: Tms, mut enable: En, delay: Delay) -> Self {
        let period_ns = 1_000_000 / freq_khz.max(1);
        let half_period = period_ns / 2;
        ok(enable.set_low());
        Gpio { half_period, clock, tdi, tdo, tms, enable, delay }
    }

    /// Give the pins back, e.g. to reconfigure them as inputs.
    pub fn free(self) -> (Clk, Tdi, Tdo, Tms, En, Delay) {
        (self.clock, self.tdi, self.tdo, self.tms, self.enable, self.delay)
    }
}

impl<Clk, Tdi, Tdo, Tms, En, Delay> Cable for Gpio<Clk, Tdi, Tdo, Tms, En, Delay>
    where Clk: OutputPin<Error = Infallible>, Tdi: OutputPin<Error = Infallible>,
          Tdo: InputPin<Error = Infallible>, Tms: OutputPin<Error = Infallible>,
          En: OutputPin<Error = Infallible>, Delay: DelayNs
{
    fn clock(&mut self, tms: bool, tdi: bool) -> bool {
        // clock starts low
        ok(self.tms.set_state(PinState::from(tms)));
        ok(self.tdi.set_state(PinState::from(tdi)));
        self.delay.delay_ns(self.half_period);

        // TDO changes on the falling edge, so sample it while TCK is high
        ok(self.clock.set_high());
        let tdo = ok(self.tdo.is_high());
        self.delay.delay_ns(self.half_period);
        ok(self.clock.set_low());
        tdo
    }

    fn acquire(&mut self) {
        // settle the lines before the buffer starts driving them
        ok(self.clock.set_low());
        ok(self.tms.set_low());
        ok(self.tdi.set_low());
        ok(self.enable.set_high());
    }

    fn release(&mut self) {
        ok(self.enable.set_low());
        ok(self.clock.set_low());
        ok(self.tms.set_low());
        ok(self.tdi.set_low());
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}
