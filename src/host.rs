//! Host side of the link: issue the vendor commands to an attached programmer over `rusb`.
//!
//! Intel HEX decoding and argument parsing belong to the calling tool; this module works on raw
//! flash images and vector streams.
use std::path::Path;
use std::string::{String, ToString};
use std::time::Duration;
use std::vec;
use std::vec::Vec;

use log::debug;
use rusb::{DeviceHandle, GlobalContext, Recipient, RequestType};
use thiserror::Error;

use crate::protocol::{
    pad_to_pages, split_u32, Command, FuseWord, Identity, StatusReport, IN_ENDPOINT, OUT_ENDPOINT,
    PAGE_SIZE, PRODUCT_ID, VENDOR_ID,
};

/// Long enough for a full chip program; the device-side polls have no timeout of their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5000);

const INTERFACE: u8 = 0;

#[derive(Error, Debug)]
pub enum Error {
    #[error("USB transfer failed: {0}")]
    Usb(#[from] rusb::Error),
    #[error("no programmer with ID 03EB:3002 attached")]
    DeviceNotFound,
    #[error("unrecognised device: manufacturer 0x{manufacturer:03X}, part 0x{part:04X}")]
    UnrecognisedDevice { manufacturer: u16, part: u16 },
    #[error("image of {len} bytes does not fit in {capacity} bytes of flash")]
    ImageTooLarge { len: usize, capacity: usize },
    #[error("short transfer: {actual} of {expected} bytes")]
    ShortTransfer { expected: usize, actual: usize },
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("{device} has no flash to load; program it with a vector file")]
    UnsupportedOperation { device: &'static str },
}

impl Error {
    /// Process exit status for a tool that stops on this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ImageTooLarge { .. } => 2,
            Error::DeviceNotFound => 3,
            Error::Usb(_) => 4,
            Error::UnrecognisedDevice { .. } => 5,
            Error::ShortTransfer { .. } => 8,
            Error::UnsupportedFileType(_) | Error::UnsupportedOperation { .. } => 9,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A part the programmer knows how to handle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Device {
    pub vendor: &'static str,
    pub name: &'static str,
    pub manufacturer: u16,
    pub part: u16,
    /// Flash pages of `PAGE_SIZE` bytes; zero for parts that are only programmed by vectors.
    pub pages: u16,
}

impl Device {
    pub fn capacity(&self) -> usize {
        self.pages as usize * PAGE_SIZE
    }
}

pub const DEVICES: &[Device] = &[
    Device { vendor: "ATMEL", name: "ATMEGA162", manufacturer: 0x01F, part: 0x9404, pages: 128 },
    Device { vendor: "XILINX", name: "XC9572", manufacturer: 0x049, part: 0x9504, pages: 0 },
];

pub fn lookup(identity: &Identity) -> Option<&'static Device> {
    DEVICES
        .iter()
        .find(|d| d.manufacturer == identity.manufacturer && d.part == identity.part)
}

/// What a file handed to the tool contains, judged by its extension.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FileKind {
    /// Vector stream for `play_xsvf`.
    Xsvf,
    /// Intel HEX flash image.
    Hex,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Result<FileKind> {
        let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("xsvf") => Ok(FileKind::Xsvf),
            Some("hex") => Ok(FileKind::Hex),
            _ => Err(Error::UnsupportedFileType(path.display().to_string())),
        }
    }
}

/// Check an image fits `device` and pad it with erased flash to whole pages.
pub fn prepare_image(device: &Device, image: &[u8]) -> Result<Vec<u8>> {
    if device.pages == 0 {
        return Err(Error::UnsupportedOperation { device: device.name });
    }
    if image.len() > device.capacity() {
        return Err(Error::ImageTooLarge { len: image.len(), capacity: device.capacity() });
    }
    let mut padded = image.to_vec();
    pad_to_pages(&mut padded);
    Ok(padded)
}

pub struct Programmer {
    device: DeviceHandle<GlobalContext>,
    timeout: Duration,
}

impl Programmer {
    /// Open the first attached programmer and claim its interface.
    pub fn open() -> Result<Self> {
        let mut device = rusb::open_device_with_vid_pid(VENDOR_ID, PRODUCT_ID).ok_or(Error::DeviceNotFound)?;
        device.claim_interface(INTERFACE)?;
        Ok(Programmer { device, timeout: DEFAULT_TIMEOUT })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn control_in(&self, command: Command, value: u16, index: u16, buf: &mut [u8]) -> Result<()> {
        let request_type = rusb::request_type(rusb::Direction::In, RequestType::Vendor, Recipient::Device);
        let n = self.device.read_control(request_type, command.into(), value, index, buf, self.timeout)?;
        if n != buf.len() {
            return Err(Error::ShortTransfer { expected: buf.len(), actual: n });
        }
        Ok(())
    }

    fn control_out(&self, command: Command, argument: u32) -> Result<()> {
        let request_type = rusb::request_type(rusb::Direction::Out, RequestType::Vendor, Recipient::Device);
        let (value, index) = split_u32(argument);
        self.device.write_control(request_type, command.into(), value, index, &[], self.timeout)?;
        Ok(())
    }

    /// Announce `data.len()` bytes with `command`, then send them on the bulk OUT endpoint.
    fn bulk_out(&self, command: Command, data: &[u8]) -> Result<()> {
        self.control_out(command, data.len() as u32)?;
        let n = self.device.write_bulk(OUT_ENDPOINT, data, self.timeout)?;
        if n != data.len() {
            return Err(Error::ShortTransfer { expected: data.len(), actual: n });
        }
        Ok(())
    }

    /// Ask for `len` bytes with `command` and collect them from the bulk IN endpoint.
    fn bulk_in(&self, command: Command, len: usize) -> Result<Vec<u8>> {
        self.control_out(command, len as u32)?;
        let mut data = vec![0; len];
        let mut received = 0;
        while received < len {
            let n = self.device.read_bulk(IN_ENDPOINT, &mut data[received..], self.timeout)?;
            if n == 0 {
                return Err(Error::ShortTransfer { expected: len, actual: received });
            }
            received += n;
        }
        Ok(data)
    }

    fn report(&self, command: Command) -> Result<StatusReport> {
        let mut buf = [0; StatusReport::LEN];
        self.control_in(command, 0, 0, &mut buf)?;
        Ok(StatusReport::from_bytes(&buf))
    }

    /// Reset the chain and read the first device's identity register along with the status words.
    pub fn scan(&self) -> Result<StatusReport> {
        self.report(Command::Scan)
    }

    /// Status words of the last bulk operation.  Does not touch the chain.
    pub fn status(&self) -> Result<StatusReport> {
        self.report(Command::Status)
    }

    /// Scan the chain and look the device up in `DEVICES`.
    pub fn identify(&self) -> Result<(Identity, &'static Device)> {
        let identity = Identity::from(self.scan()?.idcode);
        debug!(
            "manufacturer 0x{:03X} part 0x{:04X} revision {}",
            identity.manufacturer,
            identity.part,
            identity.revision_letter()
        );
        let device = lookup(&identity).ok_or(Error::UnrecognisedDevice {
            manufacturer: identity.manufacturer,
            part: identity.part,
        })?;
        Ok((identity, device))
    }

    pub fn read_fuses(&self) -> Result<FuseWord> {
        let mut buf = [0; 4];
        self.control_in(Command::RwAvrFuses, 0, 0, &mut buf)?;
        Ok(FuseWord::from(u32::from_le_bytes(buf)))
    }

    pub fn write_fuses(&self, fuses: FuseWord) -> Result<()> {
        self.control_out(Command::RwAvrFuses, fuses.into())
    }

    pub fn erase(&self) -> Result<()> {
        self.control_out(Command::EraseAvrFlash, 0)
    }

    /// Program `image` from the start of flash and return the resulting status words.
    pub fn write_flash(&self, device: &Device, image: &[u8]) -> Result<StatusReport> {
        let padded = prepare_image(device, image)?;
        debug!("writing {} bytes ({} pages)", padded.len(), padded.len() / PAGE_SIZE);
        self.bulk_out(Command::WrAvrFlash, &padded)?;
        self.status()
    }

    /// Read `len` bytes from the start of flash.  Whole pages are transferred.
    pub fn read_flash(&self, len: usize) -> Result<Vec<u8>> {
        let pages = (len + PAGE_SIZE - 1) / PAGE_SIZE;
        let mut data = self.bulk_in(Command::RdAvrFlash, pages * PAGE_SIZE)?;
        data.truncate(len);
        Ok(data)
    }

    /// Play a vector stream and return the status words: a nonzero `status` is a stream error,
    /// `failures` counts scans that never matched.
    pub fn play_xsvf(&self, stream: &[u8]) -> Result<StatusReport> {
        debug!("playing {} bytes of vectors", stream.len());
        self.bulk_out(Command::PlayXsvf, stream)?;
        self.status()
    }
}
