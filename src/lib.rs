//! Library for reading and writing MPEG-2 systems-layer bitstreams: Transport Stream (TS),
//! Program Stream (PS), Packetized Elementary Stream (PES), and the bare Elementary Stream (ES)
//! start-code layer underneath them, plus Program Specific Information (PAT/PMT).
//!
//! # Usage
//! Simply add this crate as a dependency in your `Cargo.toml`.
//!
//! ```toml
//! [dependencies]
//! mpeg2sys = "~0.1.0"
//! ```
//!
//! # Layout
//! - [`ts`] / [`continuity`] / [`pcr`]: TS packet framing, continuity-counter tracking, and
//!   PCR interpolation.
//! - [`ps`]: Program Stream pack/system-header framing and PES dispatch.
//! - [`pes`]: PES packet header and payload parsing, shared by both containers.
//! - [`es`]: start-code scanning of the bare elementary stream.
//! - [`psi`]: PAT/PMT section assembly, descriptors, and CRC-32/MPEG-2 validation.
//! - [`demux`]: the top-level TS demultiplexer that ties continuity, PSI, and PES assembly
//!   together into a single stream of [`demux::DemuxedUnit`]s.
//! - [`writer`]: the inverse, building TS packets, sections, and PES-wrapped elementary streams.
//! - [`detect`]: classifies an unknown byte source as TS, PS, or bare ES (and, for ES, as
//!   H.262/H.264/AVS).
//! - [`bits`]: shared bitstream codecs for PTS/DTS, PCR, and the 5-bit guard patterns that
//!   precede them.
//! - [`config`]: [`config::ReaderConfig`] / [`config::WriterConfig`] knobs.
//! - [`error`]: the crate's [`error::Error`] and [`error::Result`] types.

#![allow(unused)]
#![deny(missing_docs, unsafe_code, warnings)]

pub mod bits;
pub mod config;
pub mod continuity;
pub mod crc;
pub mod demux;
pub mod detect;
pub mod error;
pub mod es;
pub mod offset;
pub mod pcr;
pub mod pes;
pub mod ps;
pub mod psi;
#[macro_use]
mod slice_reader;
pub mod ts;
pub mod writer;

pub use config::{OverlongPesPolicy, ReaderConfig, WriterConfig};
pub use demux::{DemuxedUnit, Demuxer};
pub use detect::{detect_stream_kind, EsKind, StreamKind};
pub use error::{Error, ErrorDetails, Result, UnsupportedKind};
pub use offset::Offset;
pub use pcr::{PcrBuffer, TimedPacket};
pub use pes::{PesBody, PesOptionalHeader, PesPacket};
pub use ps::{PsReader, PsUnit};
pub use psi::{Descriptor, Pat, PatEntry, Pmt, PmtStreamInfo, PsiAssembler, RawSection};
pub use slice_reader::SliceReader;
pub use ts::{AdaptationField, PacketHeader, TsFramer, TsPacket};
pub use writer::TsWriter;
