//! Error taxonomy shared by every layer of the codec.

use crate::Offset;
use std::fmt;

/// Why a PMT-related operation refused to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedKind {
    /// `extract_stream_list_from_pmt` was handed a PMT section whose declared
    /// `section_length` does not fit in the single TS payload it was given.
    MultiPacketPmt,
    /// A PES payload was too short to contain even its own fixed header.
    PesHeaderTooShort,
}

/// Information about an error encountered while parsing an MPEG-2 systems-layer bitstream.
#[derive(Debug)]
pub enum ErrorDetails {
    /// A [`crate::slice_reader::SliceReader`] attempted to read past the end of its slice.
    /// The [`usize`] parameter is the length of the offending read.
    PacketOverrun(usize),
    /// MPEG-TS packet headers must begin with a sync byte of 0x47.
    LostSync,
    /// An `adaptation_field_length` was inconsistent with the space available for it.
    BadAdaptationHeader,
    /// A PSI pointer field, section header, or section-length field was inconsistent.
    BadPsiHeader,
    /// A PES start-code prefix, length field, or optional header was inconsistent.
    BadPesHeader,
    /// A PAT or PMT section failed its CRC-32/MPEG-2 check.
    PsiCrcMismatch,
    /// An operation was deliberately not implemented for the given input; see [`UnsupportedKind`].
    Unsupported(UnsupportedKind),
    /// The underlying byte source returned an I/O error.
    Io(std::io::Error),
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetails::PacketOverrun(len) => write!(f, "read of {} bytes overran buffer", len),
            ErrorDetails::LostSync => write!(f, "lost sync (expected 0x47)"),
            ErrorDetails::BadAdaptationHeader => write!(f, "malformed adaptation field"),
            ErrorDetails::BadPsiHeader => write!(f, "malformed PSI section header"),
            ErrorDetails::BadPesHeader => write!(f, "malformed PES header"),
            ErrorDetails::PsiCrcMismatch => write!(f, "PSI section CRC mismatch"),
            ErrorDetails::Unsupported(UnsupportedKind::MultiPacketPmt) => {
                write!(f, "PMT section spans more than one TS packet")
            }
            ErrorDetails::Unsupported(UnsupportedKind::PesHeaderTooShort) => {
                write!(f, "PES payload too short to contain its own header")
            }
            ErrorDetails::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

/// Error type encapsulating every fatal parser or writer error.
///
/// Non-fatal conditions (parse warnings, continuity discontinuities) are never materialized
/// as an `Error`; they are logged via the `log` facade at the point of detection and the
/// affected component falls back to the documented recovery (drop, truncate, reset).
#[derive(Debug)]
pub struct Error {
    /// Offset within the stream at which the error was encountered.
    pub location: Offset,
    /// Information about the error.
    pub details: ErrorDetails,
}

impl Error {
    /// Construct an error at the given offset.
    pub fn new(location: Offset, details: ErrorDetails) -> Self {
        Self { location, details }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {:?}", self.details, self.location)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(Offset::default(), ErrorDetails::Io(e))
    }
}

/// [`std::result::Result`] alias that uses [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
