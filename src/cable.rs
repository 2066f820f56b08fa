//! The pin-level side of the TAP driver.  Anything that can drive TCK, TMS and TDI and sample TDO
//! implements the `Cable` trait; everything above it is built from single clock cycles.
pub mod gpio;

#[cfg(test)]
pub mod sim;

pub trait Cable {
    /// Drive TMS and TDI, pulse TCK once (settle, high, low) and return the level sampled on TDO.
    /// Advances the TAP by exactly one edge of the state graph.
    fn clock(&mut self, tms: bool, tdi: bool) -> bool;

    /// Take ownership of the JTAG lines before a command touches the TAP.
    fn acquire(&mut self) {}

    /// Hand the JTAG lines back once a command has finished with them.
    fn release(&mut self) {}

    /// Busy-wait for roughly `us` microseconds with TCK held still.
    fn delay_us(&mut self, us: u32) {
        for _ in 0..us {
            core::hint::spin_loop();
        }
    }
}

impl<T: Cable + ?Sized> Cable for &mut T {
    fn clock(&mut self, tms: bool, tdi: bool) -> bool {
        (**self).clock(tms, tdi)
    }

    fn acquire(&mut self) {
        (**self).acquire()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}
