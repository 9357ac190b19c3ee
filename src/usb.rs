//! libusb bulk transport for FT60x bridges
//!
//! Opens the bridge by VID/PID, claims the FIFO interface (detaching a
//! kernel driver first when one is bound) and moves data over a pair of
//! bulk endpoints with synchronous transfers.
//!
//! A transfer that times out is not an error here: libusb still reports how
//! many bytes made it across, and the validator treats that as a partial
//! write or a short (possibly empty) read.

use std::ptr;

use crate::config::DeviceConfig;
use crate::transport::{self, Received, Transport, TransportError};

/// libusb error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LibusbError {
    /// Operation completed
    Success = 0,
    /// Input/output error
    IoError = -1,
    /// Invalid parameter
    InvalidParam = -2,
    /// Access denied (insufficient permissions)
    Access = -3,
    /// Device has been disconnected
    NoDevice = -4,
    /// Entity not found
    NotFound = -5,
    /// Resource busy
    Busy = -6,
    /// Operation timed out
    Timeout = -7,
    /// Device sent more data than requested
    Overflow = -8,
    /// Endpoint stalled
    Pipe = -9,
    /// System call interrupted
    Interrupted = -10,
    /// Insufficient memory
    NoMem = -11,
    /// Operation not supported on this platform
    NotSupported = -12,
    /// Unrecognised error code
    Other = -99,
}

impl From<i32> for LibusbError {
    fn from(code: i32) -> Self {
        match code {
            0 => LibusbError::Success,
            -1 => LibusbError::IoError,
            -2 => LibusbError::InvalidParam,
            -3 => LibusbError::Access,
            -4 => LibusbError::NoDevice,
            -5 => LibusbError::NotFound,
            -6 => LibusbError::Busy,
            -7 => LibusbError::Timeout,
            -8 => LibusbError::Overflow,
            -9 => LibusbError::Pipe,
            -10 => LibusbError::Interrupted,
            -11 => LibusbError::NoMem,
            -12 => LibusbError::NotSupported,
            _ => LibusbError::Other,
        }
    }
}

impl std::fmt::Display for LibusbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibusbError::Success => write!(f, "Success"),
            LibusbError::IoError => write!(f, "I/O error"),
            LibusbError::InvalidParam => write!(f, "Invalid parameter"),
            LibusbError::Access => write!(f, "Access denied"),
            LibusbError::NoDevice => write!(f, "No such device"),
            LibusbError::NotFound => write!(f, "Entity not found"),
            LibusbError::Busy => write!(f, "Resource busy"),
            LibusbError::Timeout => write!(f, "Operation timed out"),
            LibusbError::Overflow => write!(f, "Overflow"),
            LibusbError::Pipe => write!(f, "Pipe error"),
            LibusbError::Interrupted => write!(f, "System call interrupted"),
            LibusbError::NoMem => write!(f, "Insufficient memory"),
            LibusbError::NotSupported => write!(f, "Operation not supported"),
            LibusbError::Other => write!(f, "Other error"),
        }
    }
}

impl std::error::Error for LibusbError {}

/// Interpret the result of a synchronous bulk transfer
///
/// A timeout still carries the partial byte count.
fn transfer_result(ret: i32, transferred: i32) -> Result<usize, LibusbError> {
    let transferred = transferred.max(0) as usize;
    match LibusbError::from(ret) {
        LibusbError::Success | LibusbError::Timeout => Ok(transferred),
        err => Err(err),
    }
}

/// Owned libusb context
struct LibusbContext {
    ctx: *mut libusb1_sys::libusb_context,
}

impl LibusbContext {
    fn new() -> Result<Self, LibusbError> {
        let mut ctx: *mut libusb1_sys::libusb_context = ptr::null_mut();
        // SAFETY: `ctx` is a valid out-pointer; libusb writes the new context.
        let ret = unsafe { libusb1_sys::libusb_init(&mut ctx) };
        if ret < 0 {
            log::error!("libusb_init failed: {}", ret);
            return Err(LibusbError::from(ret));
        }
        log::debug!("libusb context initialized");
        Ok(Self { ctx })
    }

    fn open(&self, vendor_id: u16, product_id: u16) -> Result<LibusbDeviceHandle, LibusbError> {
        // SAFETY: `self.ctx` is a live context owned by `self`.
        let handle =
            unsafe { libusb1_sys::libusb_open_device_with_vid_pid(self.ctx, vendor_id, product_id) };
        if handle.is_null() {
            log::error!(
                "No device {:04x}:{:04x} found (or access denied)",
                vendor_id,
                product_id
            );
            return Err(LibusbError::NoDevice);
        }
        Ok(LibusbDeviceHandle { handle })
    }
}

impl Drop for LibusbContext {
    fn drop(&mut self) {
        if !self.ctx.is_null() {
            // SAFETY: every handle opened from this context is dropped first.
            unsafe { libusb1_sys::libusb_exit(self.ctx) };
        }
    }
}

/// Owned libusb device handle
struct LibusbDeviceHandle {
    handle: *mut libusb1_sys::libusb_device_handle,
}

impl LibusbDeviceHandle {
    fn detach_kernel_driver(&self, interface_number: i32) -> Result<bool, LibusbError> {
        // SAFETY: `self.handle` is a live handle owned by `self`.
        let active = unsafe { libusb1_sys::libusb_kernel_driver_active(self.handle, interface_number) };
        if active == 1 {
            log::info!(
                "Kernel driver active on interface {}, detaching...",
                interface_number
            );
            // SAFETY: as above.
            let ret =
                unsafe { libusb1_sys::libusb_detach_kernel_driver(self.handle, interface_number) };
            if ret < 0 {
                log::error!("libusb_detach_kernel_driver failed: {}", ret);
                return Err(LibusbError::from(ret));
            }
            return Ok(true);
        } else if active < 0 {
            if LibusbError::from(active) == LibusbError::NotSupported {
                log::debug!("Kernel driver check not supported on this platform");
                return Ok(false);
            }
            log::warn!("libusb_kernel_driver_active returned error: {}", active);
        }
        Ok(false)
    }

    fn claim_interface(&self, interface_number: i32) -> Result<(), LibusbError> {
        let _ = self.detach_kernel_driver(interface_number);

        // SAFETY: `self.handle` is a live handle owned by `self`.
        let ret = unsafe { libusb1_sys::libusb_claim_interface(self.handle, interface_number) };
        if ret < 0 {
            log::error!("libusb_claim_interface failed: {}", ret);
            return Err(LibusbError::from(ret));
        }
        log::info!("Claimed interface {}", interface_number);
        Ok(())
    }

    fn release_interface(&self, interface_number: i32) -> Result<(), LibusbError> {
        // SAFETY: `self.handle` is a live handle owned by `self`.
        let ret = unsafe { libusb1_sys::libusb_release_interface(self.handle, interface_number) };
        if ret < 0 {
            log::error!("libusb_release_interface failed: {}", ret);
            return Err(LibusbError::from(ret));
        }
        Ok(())
    }

    /// Synchronous bulk transfer; direction comes from the endpoint address
    fn bulk_transfer(
        &self,
        endpoint: u8,
        data: *mut u8,
        length: usize,
        timeout_ms: u32,
    ) -> Result<usize, LibusbError> {
        let length = libc::c_int::try_from(length).map_err(|_| LibusbError::InvalidParam)?;
        let mut transferred: libc::c_int = 0;
        // SAFETY: `data` points to at least `length` bytes that stay valid for
        // the duration of this blocking call.
        let ret = unsafe {
            libusb1_sys::libusb_bulk_transfer(
                self.handle,
                endpoint,
                data,
                length,
                &mut transferred,
                timeout_ms as libc::c_uint,
            )
        };
        transfer_result(ret, transferred)
    }
}

impl Drop for LibusbDeviceHandle {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            // SAFETY: the handle is owned and closed exactly once.
            unsafe { libusb1_sys::libusb_close(self.handle) };
        }
    }
}

/// Bulk-endpoint transport to an FT60x in 245 FIFO mode
pub struct BulkTransport {
    // Declared before `ctx` so the handle closes before the context exits.
    device: LibusbDeviceHandle,
    _ctx: LibusbContext,
    config: DeviceConfig,
    claimed: bool,
}

// SAFETY: libusb contexts and handles may be used from any thread; the
// transport is only ever driven through `&mut self`.
unsafe impl Send for BulkTransport {}

impl BulkTransport {
    /// Open the device and claim its FIFO interface
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Unavailable` if libusb cannot initialize,
    /// the device is absent or inaccessible, or the interface is busy.
    pub fn open(config: &DeviceConfig) -> transport::Result<Self> {
        let unavailable = |what: &str, e: LibusbError| {
            TransportError::Unavailable(format!(
                "{} {:04x}:{:04x}: {}",
                what, config.vendor_id, config.product_id, e
            ))
        };

        let ctx = LibusbContext::new().map_err(|e| unavailable("libusb init for", e))?;
        let device = ctx
            .open(config.vendor_id, config.product_id)
            .map_err(|e| unavailable("cannot open", e))?;
        device
            .claim_interface(i32::from(config.interface))
            .map_err(|e| unavailable("cannot claim interface of", e))?;

        log::info!(
            "Opened {:04x}:{:04x} interface {} (OUT {:#04x}, IN {:#04x}, timeout {} ms)",
            config.vendor_id,
            config.product_id,
            config.interface,
            config.endpoint_out,
            config.endpoint_in,
            config.timeout_ms
        );

        Ok(Self {
            device,
            _ctx: ctx,
            config: config.clone(),
            claimed: true,
        })
    }

    /// Device parameters this transport was opened with
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn transfer_error(&self, endpoint: u8, err: LibusbError) -> TransportError {
        match err {
            LibusbError::NoDevice => TransportError::Unavailable(format!(
                "device {:04x}:{:04x} disconnected",
                self.config.vendor_id, self.config.product_id
            )),
            other => TransportError::Transfer {
                endpoint,
                message: other.to_string(),
            },
        }
    }
}

impl Transport for BulkTransport {
    fn send(&mut self, data: &[u8]) -> transport::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let endpoint = self.config.endpoint_out;
        // libusb takes a mutable pointer for both directions but never writes
        // to an OUT buffer.
        let written = self
            .device
            .bulk_transfer(
                endpoint,
                data.as_ptr().cast_mut(),
                data.len(),
                self.config.timeout_ms,
            )
            .map_err(|e| self.transfer_error(endpoint, e))?;
        if written < data.len() {
            log::debug!("Bulk OUT accepted {} of {} B", written, data.len());
        }
        Ok(written)
    }

    fn recv(&mut self, max_length: usize) -> transport::Result<Received> {
        if max_length == 0 {
            return Ok(Received::empty());
        }
        let endpoint = self.config.endpoint_in;
        let mut buffer = vec![0u8; max_length];
        let read = self
            .device
            .bulk_transfer(
                endpoint,
                buffer.as_mut_ptr(),
                buffer.len(),
                self.config.timeout_ms,
            )
            .map_err(|e| self.transfer_error(endpoint, e))?;
        buffer.truncate(read);
        Ok(Received::new(buffer))
    }

    fn close(mut self) -> transport::Result<()> {
        self.claimed = false;
        self.device
            .release_interface(i32::from(self.config.interface))
            .map_err(|e| TransportError::Close(e.to_string()))?;
        log::info!(
            "Released {:04x}:{:04x} interface {}",
            self.config.vendor_id,
            self.config.product_id,
            self.config.interface
        );
        Ok(())
    }
}

impl Drop for BulkTransport {
    fn drop(&mut self) {
        if self.claimed {
            if let Err(e) = self
                .device
                .release_interface(i32::from(self.config.interface))
            {
                log::warn!("Failed to release interface on drop: {}", e);
            }
        }
    }
}
