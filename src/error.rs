//! Unified error types for the link driver.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! caller-facing error handling uniform. Each subsystem owns a small enum
//! with its own `Display`; most are `Copy` so the pump thread can pass them
//! around without allocation.
//!
//! Two conditions are deliberately absent from this module:
//! - sustained ack failures are advisory and surface as
//!   [`LinkEvent::Degraded`](crate::link::LinkEvent::Degraded);
//! - a TOC index mismatch is recovered by re-requesting the same index.

use core::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The radio dongle is missing or was disconnected.
    Transport(TransportError),
    /// A configuration value was rejected before anything was transmitted.
    Config(ConfigError),
    /// A frame could not be decoded.
    Codec(CodecError),
    /// The link was used in the wrong lifecycle state.
    Link(LinkError),
    /// A TOC fetch could not make progress.
    Toc(TocError),
    /// A flashing job failed.
    Flash(FlashError),
    /// The firmware archive or its manifest could not be resolved.
    Manifest(ManifestError),
    /// The operation was stopped through its [`CancelToken`](crate::cancel::CancelToken).
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Toc(e) => write!(f, "toc: {e}"),
            Self::Flash(e) => write!(f, "flash: {e}"),
            Self::Manifest(e) => write!(f, "manifest: {e}"),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No dongle attached, or it went away mid-session.
    Unavailable,
    /// A USB transfer failed; the payload names the transfer.
    Usb(&'static str),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "radio dongle unavailable"),
            Self::Usb(what) => write!(f, "USB transfer failed: {what}"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is out of range. The payload names the field and the range.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// A malformed wire frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Zero-length input: there is no header byte.
    Empty,
    /// Payload longer than [`MAX_PAYLOAD`](crate::crtp::MAX_PAYLOAD).
    PayloadTooLong(usize),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "malformed packet: empty frame"),
            Self::PayloadTooLong(len) => {
                write!(f, "malformed packet: payload of {len} bytes exceeds MTU")
            }
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

// ---------------------------------------------------------------------------
// Link lifecycle errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// `connect` (or listener registration) on a link that is already open.
    AlreadyConnected,
    /// Packet traffic on a link that was never connected.
    NotConnected,
    /// The link was closed and its transport released.
    Closed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyConnected => write!(f, "link already open"),
            Self::NotConnected => write!(f, "link not connected"),
            Self::Closed => write!(f, "link closed"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// TOC errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TocError {
    /// An element reply did not have the expected layout.
    Malformed(&'static str),
    /// The type byte selects no entry in the code table.
    UnknownType(u8),
    /// The resend budget ran out without a matching reply.
    Stalled,
}

impl fmt::Display for TocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(what) => write!(f, "malformed TOC reply: {what}"),
            Self::UnknownType(code) => write!(f, "unknown variable type 0x{code:02X}"),
            Self::Stalled => write!(f, "TOC fetch stalled"),
        }
    }
}

impl From<TocError> for Error {
    fn from(e: TocError) -> Self {
        Self::Toc(e)
    }
}

// ---------------------------------------------------------------------------
// Flash errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    /// The image does not fit between the start page and the end of flash.
    InsufficientSpace { image_len: usize, capacity: usize },
    /// The device rejected a buffer commit.
    WriteFailed { code: u8, detail: &'static str },
    /// No reply to the given bootloader command after every retry.
    NoReply(u8),
    /// The target was not reported by the device at connect time.
    UnknownTarget(String),
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientSpace {
                image_len,
                capacity,
            } => write!(
                f,
                "not enough space: image is {image_len} bytes, target holds {capacity}"
            ),
            Self::WriteFailed { code, detail } => {
                write!(f, "flash write failed (code {code}): {detail}")
            }
            Self::NoReply(cmd) => write!(f, "no reply to bootloader command 0x{cmd:02X}"),
            Self::UnknownTarget(name) => write!(f, "no such target on device: {name}"),
        }
    }
}

impl From<FlashError> for Error {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

// ---------------------------------------------------------------------------
// Manifest errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// The input path does not exist.
    NotFound(PathBuf),
    /// An archive directory without `manifest.json` at its root.
    MissingManifest(PathBuf),
    /// `manifest.json` is not valid.
    Parse(String),
    /// Nothing in the input matched a known target.
    NoFilesToFlash,
    /// Bad combination of arguments (e.g. a raw image without exactly one target).
    Usage(&'static str),
    /// A target name that is not one of the known target types.
    UnknownTarget(String),
    /// A manifest file name that points outside the archive.
    UnsafePath(String),
    /// Reading a firmware file failed.
    Io(String),
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(p) => write!(f, "{} does not exist", p.display()),
            Self::MissingManifest(p) => write!(f, "{} has no manifest.json", p.display()),
            Self::Parse(msg) => write!(f, "manifest parse error: {msg}"),
            Self::NoFilesToFlash => write!(f, "found no files to flash"),
            Self::Usage(msg) => write!(f, "{msg}"),
            Self::UnknownTarget(name) => write!(f, "unknown target {name:?}"),
            Self::UnsafePath(name) => write!(f, "{name:?} is not a file inside the archive"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl From<ManifestError> for Error {
    fn from(e: ManifestError) -> Self {
        Self::Manifest(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
