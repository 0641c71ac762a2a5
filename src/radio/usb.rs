//! USB collaborator: whatever enumerates and talks to the dongle.
//!
//! Device discovery and the transfer primitives live outside this crate
//! (libusb, nusb, an Android USB host bridge, a simulator). The dongle
//! driver only needs vendor control transfers and one bulk round trip.

use crate::error::TransportError;

/// `bmRequestType` for host-to-device vendor requests.
pub const REQUEST_TYPE_VENDOR_OUT: u8 = 0x40;

/// `bmRequestType` for device-to-host vendor requests.
pub const REQUEST_TYPE_VENDOR_IN: u8 = 0xC0;

/// Raw USB access to one opened dongle.
pub trait UsbInterface {
    /// Vendor control transfer, host to device.
    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Vendor control transfer, device to host. Returns bytes read.
    fn control_in(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, TransportError>;

    /// Write `out` to the bulk OUT endpoint, then read the ack into
    /// `input`. Returns the number of ack bytes read.
    fn bulk_exchange(&mut self, out: &[u8], input: &mut [u8]) -> Result<usize, TransportError>;

    /// Whether the device is still attached.
    fn is_connected(&self) -> bool;

    /// Dongle firmware version as `major.minor`, e.g. `0.53`.
    fn firmware_version(&self) -> f32;

    fn serial_number(&self) -> String;

    /// The dongle firmware can sweep channels itself.
    fn supports_fw_scan(&self) -> bool {
        false
    }

    /// Release the claimed interface. Idempotent.
    fn release(&mut self);
}
