//! Command dispatcher.  The transport stack hands over each vendor control request; the
//! dispatcher drives the TAP, moves bulk payloads in `CHUNK_SIZE` pieces and keeps the session
//! status words the host reads back.
//!
//! ```text
//!  host ──control──▶ Dispatcher::handle ──▶ Avr / Player ──▶ JtagSM ──▶ Cable
//!       ◀──bulk────▶ Transport
//! ```
use core::fmt::Debug;

use log::{debug, trace, warn};

use crate::avr::Avr;
use crate::cable::Cable;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::player::Player;
use crate::protocol::{
    join_u32, page_count, Command, FuseWord, StatusReport, CHUNK_SIZE, MAX_PAGES, PAGE_SIZE,
};
use crate::session::{Session, STATUS_IN_ENDPOINT_FAILED, STATUS_OUT_ENDPOINT_FAILED};
use crate::statemachine::JtagSM;
use crate::xsvf::Decoder;

/// Data stage direction of a control request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

/// The fields of a vendor control request the dispatcher looks at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControlRequest {
    pub direction: Direction,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    /// The 32-bit argument carried across `wValue` (high) and `wIndex` (low).
    pub fn argument(&self) -> u32 {
        join_u32(self.value, self.index)
    }
}

/// Device side of the USB link.  Reads block until the whole buffer is filled.
pub trait Transport {
    type Error: Debug;

    /// Data stage of an IN control request.
    fn control_write(&mut self, data: &[u8]) -> core::result::Result<(), Self::Error>;

    /// Status stage of an OUT control request.
    fn control_ack(&mut self) -> core::result::Result<(), Self::Error>;

    fn bulk_read(&mut self, buf: &mut [u8]) -> core::result::Result<(), Self::Error>;

    fn bulk_write(&mut self, data: &[u8]) -> core::result::Result<(), Self::Error>;

    /// Push out any partly filled bulk IN packet.
    fn bulk_flush(&mut self) -> core::result::Result<(), Self::Error> {
        Ok(())
    }
}

pub struct Dispatcher<C> {
    sm: JtagSM<C>,
    config: Config,
    session: Session,
}

impl<C: Cable> Dispatcher<C> {
    pub fn new(cable: C, config: Config) -> Self {
        Dispatcher {
            sm: JtagSM::new(cable),
            session: Session::new(config.retries),
            config,
        }
    }

    pub fn status(&self) -> StatusReport {
        self.session.report()
    }

    pub fn jtag(&mut self) -> &mut JtagSM<C> {
        &mut self.sm
    }

    /// Record the outcome of endpoint configuration after the host selects a configuration.
    pub fn on_configuration_changed(&mut self, in_ok: bool, out_ok: bool) {
        self.session.status = 0;
        if !in_ok {
            self.session.status |= STATUS_IN_ENDPOINT_FAILED;
        }
        if !out_ok {
            self.session.status |= STATUS_OUT_ENDPOINT_FAILED;
        }
        if self.session.status != 0 {
            warn!("endpoint configuration failed, status {:08X}", self.session.status);
        }
    }

    /// Service one vendor control request, including any bulk data that follows it.  The pins are
    /// driven only while a command that needs the TAP is running.
    pub fn handle<T: Transport>(&mut self, req: &ControlRequest, usb: &mut T) -> Result<(), T::Error> {
        let command = match Command::try_from(req.request) {
            Ok(command) => command,
            Err(_) => return self.unsupported(req),
        };
        debug!("{:?} {:?} {:08X}", command, req.direction, req.argument());

        match (command, req.direction) {
            (Command::Status, Direction::In) => self.send_status(usb),
            (Command::Scan, Direction::In) => {
                self.sm.cable.acquire();
                self.session.idcode = self.sm.read_idcode();
                self.sm.cable.release();
                debug!("idcode {:08X}", self.session.idcode);
                self.send_status(usb)
            }
            (Command::RwAvrFuses, Direction::In) => {
                let fuses = self.programming(|avr| avr.read_fuses());
                usb.control_write(&u32::from(fuses).to_le_bytes()).map_err(Error::Transport)
            }
            (Command::RwAvrFuses, Direction::Out) => {
                let fuses = FuseWord::from(req.argument());
                let protect = self.config.protect_interface_fuses;
                self.programming(|avr| avr.write_fuses(fuses, protect));
                usb.control_ack().map_err(Error::Transport)
            }
            (Command::EraseAvrFlash, Direction::Out) => {
                self.programming(|avr| avr.chip_erase());
                usb.control_ack().map_err(Error::Transport)
            }
            (Command::RdAvrFlash, Direction::Out) => {
                let pages = page_count(req.argument());
                if pages > MAX_PAGES {
                    return self.unsupported(req);
                }
                usb.control_ack().map_err(Error::Transport)?;
                self.session.begin_bulk();
                self.with_programming(|d| d.read_flash(pages, usb))
            }
            (Command::WrAvrFlash, Direction::Out) => {
                let pages = page_count(req.argument());
                if pages > MAX_PAGES {
                    return self.unsupported(req);
                }
                usb.control_ack().map_err(Error::Transport)?;
                self.session.begin_bulk();
                self.with_programming(|d| d.write_flash(pages, usb))
            }
            (Command::PlayXsvf, Direction::Out) => {
                usb.control_ack().map_err(Error::Transport)?;
                self.session.begin_bulk();
                self.sm.cable.acquire();
                let result = self.play(req.argument(), usb);
                self.sm.cable.release();
                result
            }
            _ => self.unsupported(req),
        }
    }

    fn unsupported<E: Debug>(&self, req: &ControlRequest) -> Result<(), E> {
        warn!("unsupported request {:02X} ({:?})", req.request, req.direction);
        Err(Error::UnsupportedRequest { request: req.request, direction: req.direction })
    }

    fn send_status<T: Transport>(&self, usb: &mut T) -> Result<(), T::Error> {
        usb.control_write(&self.session.report().to_bytes()).map_err(Error::Transport)
    }

    /// Run `f` with the target held in reset and in programming mode.
    fn programming<R>(&mut self, f: impl FnOnce(&mut Avr<'_, C>) -> R) -> R {
        self.sm.cable.acquire();
        let mut avr = Avr::new(&mut self.sm);
        avr.enter_programming();
        let r = f(&mut avr);
        avr.leave_programming();
        self.sm.cable.release();
        r
    }

    /// Like `programming`, for bulk operations that can fail part way through a transfer.  On
    /// failure the TAP is reset before programming mode is left, as it may be parked in Shift-DR.
    fn with_programming<E: Debug>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), E>,
    ) -> Result<(), E> {
        self.sm.cable.acquire();
        Avr::new(&mut self.sm).enter_programming();
        let result = f(self);
        if result.is_err() {
            self.sm.reset_to_idle();
        }
        Avr::new(&mut self.sm).leave_programming();
        self.sm.cable.release();
        result
    }

    fn read_flash<T: Transport>(&mut self, pages: u32, usb: &mut T) -> Result<(), T::Error> {
        let mut chunk = [0u8; CHUNK_SIZE];
        for page in 0..pages {
            trace!("reading page {}", page);
            let mut avr = Avr::new(&mut self.sm);
            avr.read_flash_begin(page as u16);
            for b in chunk.iter_mut() {
                *b = avr.read_flash_byte();
            }
            usb.bulk_write(&chunk).map_err(Error::Transport)?;

            let mut avr = Avr::new(&mut self.sm);
            for b in chunk[..CHUNK_SIZE - 1].iter_mut() {
                *b = avr.read_flash_byte();
            }
            chunk[CHUNK_SIZE - 1] = avr.read_flash_byte_end();
            usb.bulk_write(&chunk).map_err(Error::Transport)?;
        }
        usb.bulk_flush().map_err(Error::Transport)?;
        debug!("read {} bytes of flash", pages as usize * PAGE_SIZE);
        Ok(())
    }

    fn write_flash<T: Transport>(&mut self, pages: u32, usb: &mut T) -> Result<(), T::Error> {
        let mut chunk = [0u8; CHUNK_SIZE];
        for page in 0..pages {
            trace!("writing page {}", page);
            usb.bulk_read(&mut chunk).map_err(Error::Transport)?;
            let mut avr = Avr::new(&mut self.sm);
            avr.write_flash_begin(page as u16);
            for &b in chunk.iter() {
                avr.write_flash_byte(b);
            }

            usb.bulk_read(&mut chunk).map_err(Error::Transport)?;
            let mut avr = Avr::new(&mut self.sm);
            for &b in chunk[..CHUNK_SIZE - 1].iter() {
                avr.write_flash_byte(b);
            }
            avr.write_flash_byte_end(chunk[CHUNK_SIZE - 1]);
            avr.write_flash_end();
        }
        debug!("wrote {} bytes of flash", pages as usize * PAGE_SIZE);
        Ok(())
    }

    /// Feed `total` bulk bytes through the vector decoder.  After a decoding error the rest of the
    /// stream is still read, and discarded, so the host transfer completes; the error's code ends
    /// up in the status word either way.
    fn play<T: Transport>(&mut self, total: u32, usb: &mut T) -> Result<(), T::Error> {
        let mut decoder = Decoder::new(self.config.max_scan_bits);
        let mut buf = [0u8; CHUNK_SIZE];
        let mut remaining = total as usize;
        let mut outcome = Ok(());

        self.sm.reset_to_idle();
        while remaining > 0 {
            let len = remaining.min(CHUNK_SIZE);
            usb.bulk_read(&mut buf[..len]).map_err(Error::Transport)?;
            remaining -= len;
            if outcome.is_ok() {
                let mut player = Player::new(&mut self.sm, &mut self.session);
                outcome = decoder.feed(&buf[..len], &mut player);
            }
        }
        if outcome.is_ok() {
            outcome = decoder.finish();
        }

        match outcome {
            Ok(()) => {
                self.session.status = 0;
                debug!("played {} bytes, {} failed scans", total, self.session.failures);
            }
            Err(e) => {
                self.session.status = e.code();
                warn!("vector playback stopped: {}", e);
                // leave the chain in a known state whatever the decoder was in the middle of
                self.sm.reset_to_idle();
            }
        }
        Ok(())
    }
}
