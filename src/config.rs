//! Settings fixed when the dispatcher is created.

/// How many attempts a verifying data scan gets before it is recorded as a failure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RetryPolicy {
    /// Always this many attempts; repeat instructions in the vector stream are ignored.
    Fixed(u8),
    /// Start each playback with `default` attempts and let the stream's repeat instruction change it.
    Stream { default: u8 },
}

impl RetryPolicy {
    pub fn initial(&self) -> u8 {
        match *self {
            RetryPolicy::Fixed(n) => n,
            RetryPolicy::Stream { default } => default,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub retries: RetryPolicy,
    /// Keep JTAGEN and SPIEN programmed whatever the host asks for in the high fuse byte.
    pub protect_interface_fuses: bool,
    /// Longest instruction or data scan the vector decoder will buffer.
    pub max_scan_bits: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            retries: RetryPolicy::Fixed(3),
            protect_interface_fuses: true,
            max_scan_bits: 4096,
        }
    }
}
