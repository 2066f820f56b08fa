//! Wire-level definitions shared by the device-side dispatcher and the host client: vendor
//! request codes, the 12-byte status report, the packed fuse word and flash paging.
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// USB vendor and product IDs of the programmer.
pub const VENDOR_ID: u16 = 0x03EB;
pub const PRODUCT_ID: u16 = 0x3002;

/// Bulk endpoints: device-to-host and host-to-device.
pub const IN_ENDPOINT: u8 = 0x81;
pub const OUT_ENDPOINT: u8 = 0x02;

/// Bulk payloads move in chunks of this size.
pub const CHUNK_SIZE: usize = 64;

/// Flash page size in bytes.  `CHUNK_SIZE` divides it, so pages always start on a chunk.
pub const PAGE_SIZE: usize = 128;
pub const PAGE_SHIFT: u32 = 7;

/// Pages reachable through the 16-bit word address of the page commands (64 words a page).
pub const MAX_PAGES: u32 = 1024;

/// Vendor request codes carried in `bRequest`.  They start at 0x80 to stay clear of the standard
/// requests.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    /// Reset the TAP and report the identity register with the status words.
    Scan = 0x80,
    /// IN: read the fuse word.  OUT: write the fuse word from `wValue:wIndex`.
    RwAvrFuses = 0x81,
    /// Stream `wValue:wIndex` bytes of flash to the bulk IN endpoint.
    RdAvrFlash = 0x82,
    /// Program `wValue:wIndex` bytes of flash from the bulk OUT endpoint.
    WrAvrFlash = 0x83,
    EraseAvrFlash = 0x84,
    Reserved1 = 0x85,
    Reserved2 = 0x86,
    Reserved3 = 0x87,
    /// Play `wValue:wIndex` bytes of XSVF from the bulk OUT endpoint.
    PlayXsvf = 0x88,
    /// Report the status words without touching the TAP.
    Status = 0x89,
}

/// Split a 32-bit quantity across the `wValue` (high half) and `wIndex` (low half) fields.
pub fn split_u32(value: u32) -> (u16, u16) {
    ((value >> 16) as u16, value as u16)
}

/// Inverse of `split_u32`.
pub fn join_u32(value: u16, index: u16) -> u32 {
    (value as u32) << 16 | index as u32
}

/// Number of whole pages in `bytes`.
pub fn page_count(bytes: u32) -> u32 {
    bytes >> PAGE_SHIFT
}

/// Pages needed to hold `bytes`, counting a partial page as a whole one.
pub fn pages_for(bytes: usize) -> usize {
    (bytes + PAGE_SIZE - 1) / PAGE_SIZE
}

/// Pad an image with erased flash (0xFF) up to a whole number of pages.
pub fn pad_to_pages(image: &mut alloc::vec::Vec<u8>) {
    image.resize(pages_for(image.len()) * PAGE_SIZE, 0xFF);
}

/// Extended, high and low fuse bytes and lock bits.  Packs into a `u32` as `ext:high:low:lock`,
/// most significant first.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FuseWord {
    pub ext: u8,
    pub high: u8,
    pub low: u8,
    pub lock: u8,
}

impl From<u32> for FuseWord {
    fn from(word: u32) -> Self {
        let [ext, high, low, lock] = word.to_be_bytes();
        FuseWord { ext, high, low, lock }
    }
}

impl From<FuseWord> for u32 {
    fn from(fuses: FuseWord) -> u32 {
        u32::from_be_bytes([fuses.ext, fuses.high, fuses.low, fuses.lock])
    }
}

/// Response to `Scan` and `Status`: three little-endian words.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusReport {
    pub idcode: u32,
    /// Result code of the last bulk operation, or endpoint configuration failures.
    pub status: u32,
    /// Verify scans that ran out of retries since the last bulk operation started.
    pub failures: u32,
}

impl StatusReport {
    pub const LEN: usize = 12;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0; Self::LEN];
        buf[0..4].copy_from_slice(&self.idcode.to_le_bytes());
        buf[4..8].copy_from_slice(&self.status.to_le_bytes());
        buf[8..12].copy_from_slice(&self.failures.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::LEN]) -> Self {
        StatusReport {
            idcode: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            status: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            failures: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }
}

/// Fields of a JTAG identity register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    pub revision: u8,
    pub part: u16,
    pub manufacturer: u16,
}

impl From<u32> for Identity {
    fn from(idcode: u32) -> Self {
        Identity {
            revision: (idcode >> 28) as u8,
            part: (idcode >> 12) as u16,
            manufacturer: ((idcode >> 1) & 0x7FF) as u16,
        }
    }
}

impl Identity {
    /// Revisions are conventionally lettered from 'A'.
    pub fn revision_letter(&self) -> char {
        (b'A' + self.revision) as char
    }
}
