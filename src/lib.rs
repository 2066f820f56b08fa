//! This crate is the core of a USB JTAG programmer that bit-bangs a TAP to program
//! AVR microcontrollers and to play XSVF vector streams into CPLDs and other chained
//! devices.  It is `no_std` so it can run on the programmer itself; the `std`
//! feature adds a host-side client.
//!
//! At the lowest level is the Cable trait: drive TMS and TDI, pulse TCK once and
//! sample TDO.  `cable::gpio` implements it over embedded-hal pins.
//!
//! The next level up is the JtagSM, which walks the TAP between Run-Test/Idle and
//! the shift states and, in `scan`, exchanges bits, bytes and words with the chain.
//! The TAP position is not tracked.  Every operation expects Run-Test/Idle and
//! returns there, except the flash streaming calls which stay in Shift-DR between
//! bytes.  Debug builds assert on misuse.
//!
//! On top of that, `avr` composes the AVR JTAG programming commands (reset, program
//! enable, fuses, flash pages, chip erase), and `player` replays decoded vector
//! streams with bounded retries on mismatching scans.  The Dispatcher ties it all
//! to a USB transport: it takes vendor control requests and moves bulk data in
//! 64-byte chunks.
//!
//! # Example
//! ```ignore
//! use avr_jtag_isp::cable::gpio::Gpio;
//! use avr_jtag_isp::config::Config;
//! use avr_jtag_isp::dispatcher::Dispatcher;
//!
//! let cable = Gpio::new(1000, tck, tdi, tdo, tms, buffer_enable, delay);
//! let mut dispatcher = Dispatcher::new(cable, Config::default());
//! dispatcher.on_configuration_changed(in_ok, out_ok);
//! loop {
//!     if let Some(request) = usb.next_request() {
//!         if let Err(e) = dispatcher.handle(&request, &mut usb) {
//!             usb.stall();
//!         }
//!     }
//! }
//! ```


#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod avr;
pub mod cable;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod player;
pub mod protocol;
pub mod scan;
pub mod session;
pub mod statemachine;
pub mod xsvf;

#[cfg(feature = "std")]
pub mod host;
