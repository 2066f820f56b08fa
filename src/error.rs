use core::fmt::Debug;

use thiserror::Error;

use crate::dispatcher::Direction;

/// Failures the dispatcher hands back to the transport stack.  Verification mismatches and
/// vector decoding problems are not among them: those end up in the status word.
#[derive(Error, Debug)]
pub enum Error<E: Debug> {
    #[error("transport failure: {0:?}")]
    Transport(E),
    #[error("unsupported request 0x{request:02X} ({direction:?})")]
    UnsupportedRequest { request: u8, direction: Direction },
}

pub type Result<T, E> = core::result::Result<T, Error<E>>;
