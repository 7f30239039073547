//! TS packet header/adaptation-field model and the 188-byte framer (C4).

use crate::bits::{decode_pcr, PcrTimestamp};
use crate::config::ReaderConfig;
use crate::error::{Error, ErrorDetails, Result};
use crate::offset::Offset;
use crate::read_bitfield;
use crate::slice_reader::SliceReader;
use log::warn;
use modular_bitfield_msb::prelude::*;
use std::io::{Read, Seek, SeekFrom};

/// 188 bytes: the fixed size of every MPEG-TS packet.
pub const TS_PACKET_LEN: usize = 188;
/// Sync byte every TS packet must begin with.
pub const SYNC_BYTE: u8 = 0x47;
/// The reserved "null" PID; its payloads are never interpreted and it never creates or advances
/// any per-PID state.
pub const NULL_PID: u16 = 0x1fff;

/// Number of packets read per fill of the framer's internal buffer.
const FILL_PACKETS: usize = 20;

/// `transport_scrambling_control` values.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum TransportScramblingControl {
    /// Not scrambled.
    NotScrambled,
    /// Reserved; should not appear on the wire.
    Reserved,
    /// Scrambled with the even key.
    ScrambledEvenKey,
    /// Scrambled with the odd key.
    ScrambledOddKey,
}

/// `adaptation_field_control` values.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum AdaptationFieldControl {
    /// Reserved; no adaptation field and no payload.
    Reserved,
    /// Payload only.
    PayloadOnly,
    /// Adaptation field only.
    AdaptationOnly,
    /// Adaptation field followed by payload.
    Both,
}

/// Link-layer header found at the start of every 188-byte MPEG-TS packet.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub sync_byte: B8,
    pub transport_error_indicator: bool,
    pub payload_unit_start_indicator: bool,
    pub transport_priority: bool,
    pub pid: B13,
    pub transport_scrambling_control: TransportScramblingControl,
    pub adaptation_field_control: AdaptationFieldControl,
    pub continuity_counter: B4,
}

/// Flags byte of an adaptation field, plus its length.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct AdaptationFieldHeader {
    pub length: B8,
    pub discontinuity_indicator: bool,
    pub random_access_indicator: bool,
    pub elementary_stream_priority_indicator: bool,
    pub pcr_flag: bool,
    pub opcr_flag: bool,
    pub splicing_point_flag: bool,
    pub transport_private_data_flag: bool,
    pub adaptation_field_extension_flag: bool,
}

/// Non-payload packet metadata.
#[derive(Debug, Clone)]
pub struct AdaptationField {
    /// Header describing which optional fields are present.
    pub header: AdaptationFieldHeader,
    /// Program Clock Reference, if `header.pcr_flag()`.
    pub pcr: Option<PcrTimestamp>,
    /// Original Program Clock Reference, if `header.opcr_flag()`.
    pub opcr: Option<PcrTimestamp>,
    /// Splice countdown byte, if `header.splicing_point_flag()`.
    pub splice_countdown: Option<i8>,
    /// Raw transport-private-data bytes, if `header.transport_private_data_flag()`.
    pub transport_private_data: Option<Vec<u8>>,
}

/// Parsed view of one 188-byte MPEG-TS packet.
#[derive(Debug, Clone)]
pub struct TsPacket<'a> {
    /// Stream position this packet was read from.
    pub offset: Offset,
    /// Link-layer header.
    pub header: PacketHeader,
    /// Optional adaptation field.
    pub adaptation_field: Option<AdaptationField>,
    /// Payload bytes, if any. Never interpreted for the null PID.
    pub payload: Option<&'a [u8]>,
}

impl<'a> TsPacket<'a> {
    /// 13-bit Packet Identifier.
    pub fn pid(&self) -> u16 {
        self.header.pid()
    }

    /// Whether this packet starts a new PES packet or PSI section.
    pub fn pusi(&self) -> bool {
        self.header.payload_unit_start_indicator()
    }

    /// Whether this is a stuffing packet on the null PID.
    pub fn is_null(&self) -> bool {
        self.pid() == NULL_PID
    }
}

fn read_adaptation_field(reader: &mut SliceReader, cfg: &ReaderConfig) -> Result<AdaptationField> {
    // `length` counts the bytes *following* the length byte itself (the flags byte, if present,
    // plus any optional fields). A length of zero means a single stuffing byte with no flags.
    let length = reader.read_u8()? as usize;
    if length == 0 {
        return Ok(AdaptationField {
            header: AdaptationFieldHeader::from_bytes([0, 0]),
            pcr: None,
            opcr: None,
            splice_countdown: None,
            transport_private_data: None,
        });
    }
    let mut body = reader.new_sub_reader(length)?;
    let flags_byte = body.read_u8()?;
    let header = AdaptationFieldHeader::from_bytes([length as u8, flags_byte]);

    let pcr = if header.pcr_flag() {
        if body.remaining_len() < 6 {
            return Err(body.make_error(ErrorDetails::BadAdaptationHeader));
        }
        Some(decode_pcr(body.read_array_ref::<6>()?))
    } else {
        None
    };
    let opcr = if header.opcr_flag() {
        if body.remaining_len() < 6 {
            return Err(body.make_error(ErrorDetails::BadAdaptationHeader));
        }
        Some(decode_pcr(body.read_array_ref::<6>()?))
    } else {
        None
    };
    let splice_countdown = if header.splicing_point_flag() {
        Some(body.read_u8()? as i8)
    } else {
        None
    };
    let transport_private_data = if header.transport_private_data_flag() {
        let len = body.read_u8()? as usize;
        Some(body.read(len)?.to_vec())
    } else {
        None
    };
    if header.adaptation_field_extension_flag() && cfg.warn_on_reserved_bits {
        warn!("adaptation field extension present but not decoded");
    }

    Ok(AdaptationField {
        header,
        pcr,
        opcr,
        splice_countdown,
        transport_private_data,
    })
}

/// Parse one 188-byte TS packet, already known to live at `offset` in the stream.
pub fn parse_packet(bytes: &[u8; TS_PACKET_LEN], offset: Offset, cfg: &ReaderConfig) -> Result<TsPacket<'_>> {
    let mut reader = SliceReader::new(bytes, offset);
    let header: PacketHeader = read_bitfield!(reader, PacketHeader);
    if header.sync_byte() != SYNC_BYTE {
        return Err(reader.make_error(ErrorDetails::LostSync));
    }

    let pid = header.pid();
    if pid == NULL_PID {
        return Ok(TsPacket {
            offset,
            header,
            adaptation_field: None,
            payload: None,
        });
    }

    let adaptation_field = match header.adaptation_field_control() {
        AdaptationFieldControl::AdaptationOnly | AdaptationFieldControl::Both => {
            Some(read_adaptation_field(&mut reader, cfg)?)
        }
        _ => None,
    };

    let payload = match header.adaptation_field_control() {
        AdaptationFieldControl::PayloadOnly | AdaptationFieldControl::Both => {
            Some(reader.read_to_end()?)
        }
        AdaptationFieldControl::Reserved => {
            if cfg.warn_on_reserved_bits {
                warn!(
                    "PID {:#06x}: reserved adaptation_field_control value; no payload or adaptation",
                    pid
                );
            }
            None
        }
        AdaptationFieldControl::AdaptationOnly => None,
    };

    Ok(TsPacket {
        offset,
        header,
        adaptation_field,
        payload,
    })
}

/// Reads a byte source as a sequence of 188-byte TS packets.
///
/// Owns an internal read-ahead buffer ("ring") sized to [`FILL_PACKETS`] packets; the packet
/// returned by [`TsFramer::read_next`] borrows that buffer and is invalidated by the next call.
pub struct TsFramer<R> {
    source: R,
    buf: Vec<u8>,
    filled: usize,
    consumed: usize,
    delivered: u64,
}

impl<R: Read + Seek> TsFramer<R> {
    /// Wrap a byte source. No assumption is made about the source's current position.
    pub fn new(source: R) -> Self {
        Self {
            source,
            buf: vec![0u8; FILL_PACKETS * TS_PACKET_LEN],
            filled: 0,
            consumed: 0,
            delivered: 0,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let mut total = 0usize;
        while total < self.buf.len() {
            let n = self.source.read(&mut self.buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        let tail = total % TS_PACKET_LEN;
        if tail != 0 {
            warn!(
                "discarding {} trailing byte(s) at EOF (not a multiple of {})",
                tail, TS_PACKET_LEN
            );
            total -= tail;
        }
        self.filled = total;
        self.consumed = 0;
        Ok(())
    }

    /// Read the next 188-byte packet, parsing it. Returns `Ok(None)` at a clean EOF.
    pub fn read_next(&mut self, cfg: &ReaderConfig) -> Result<Option<TsPacket<'_>>> {
        if self.consumed >= self.filled {
            self.fill()?;
            if self.filled == 0 {
                return Ok(None);
            }
        }
        let start = self.consumed;
        self.consumed += TS_PACKET_LEN;
        let offset = Offset::bare(self.delivered);
        self.delivered += TS_PACKET_LEN as u64;
        let bytes: &[u8; TS_PACKET_LEN] = self.buf[start..start + TS_PACKET_LEN]
            .try_into()
            .expect("slice of exactly TS_PACKET_LEN bytes");
        parse_packet(bytes, offset, cfg)
    }

    /// Seek the underlying source and discard any buffered read-ahead.
    pub fn seek(&mut self, byte_offset: u64) -> std::result::Result<(), Error> {
        self.source.seek(SeekFrom::Start(byte_offset))?;
        self.filled = 0;
        self.consumed = 0;
        self.delivered = byte_offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn null_packet() -> [u8; TS_PACKET_LEN] {
        let mut p = [0xffu8; TS_PACKET_LEN];
        p[0] = SYNC_BYTE;
        p[1] = 0x1f;
        p[2] = 0xff;
        p[3] = 0x10;
        p
    }

    #[test]
    fn null_pid_has_no_payload_or_adaptation() {
        let cfg = ReaderConfig::default();
        let p = null_packet();
        let parsed = parse_packet(&p, Offset::default(), &cfg).unwrap();
        assert!(parsed.is_null());
        assert!(parsed.payload.is_none());
        assert!(parsed.adaptation_field.is_none());
    }

    #[test]
    fn lost_sync_is_fatal() {
        let cfg = ReaderConfig::default();
        let mut p = null_packet();
        p[0] = 0x00;
        let err = parse_packet(&p, Offset::default(), &cfg).unwrap_err();
        assert!(matches!(err.details, ErrorDetails::LostSync));
    }

    #[test]
    fn payload_only_packet_splits_correctly() {
        let cfg = ReaderConfig::default();
        let mut p = [0u8; TS_PACKET_LEN];
        p[0] = SYNC_BYTE;
        p[1] = 0x40; // PUSI=1, pid high bits 0
        p[2] = 0x42; // pid low byte
        p[3] = 0x10; // AFC=01 payload only, cc=0
        p[4] = 0xaa;
        let parsed = parse_packet(&p, Offset::default(), &cfg).unwrap();
        assert_eq!(parsed.pid(), 0x42);
        assert!(parsed.pusi());
        assert_eq!(parsed.payload.unwrap().len(), 184);
        assert_eq!(parsed.payload.unwrap()[0], 0xaa);
    }

    #[test]
    fn adaptation_and_payload_split_with_pcr() {
        let cfg = ReaderConfig::default();
        let mut p = [0u8; TS_PACKET_LEN];
        p[0] = SYNC_BYTE;
        p[1] = 0x00;
        p[2] = 0x42;
        p[3] = 0x30; // AFC=11
        p[4] = 7; // adaptation_field_length
        p[5] = 0x10; // pcr_flag set
        let pcr = PcrTimestamp { base: 12345, extension: 7 };
        p[6..12].copy_from_slice(&crate::bits::encode_pcr(&pcr));
        let parsed = parse_packet(&p, Offset::default(), &cfg).unwrap();
        let af = parsed.adaptation_field.unwrap();
        assert_eq!(af.pcr.unwrap(), pcr);
        assert_eq!(parsed.payload.unwrap().len(), TS_PACKET_LEN - 4 - 1 - 7);
    }

    #[test]
    fn framer_reads_sequential_packets_and_hits_eof() {
        let cfg = ReaderConfig::default();
        let mut data = Vec::new();
        for i in 0..3u8 {
            let mut p = null_packet();
            p[3] = 0x10 | i;
            data.extend_from_slice(&p);
        }
        let mut framer = TsFramer::new(Cursor::new(data));
        let mut count = 0;
        while framer.read_next(&cfg).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert!(framer.read_next(&cfg).unwrap().is_none());
    }

    #[test]
    fn framer_discards_trailing_partial_packet() {
        let cfg = ReaderConfig::default();
        let mut data = Vec::new();
        data.extend_from_slice(&null_packet());
        data.extend_from_slice(&[0u8; 50]); // short trailing fragment
        let mut framer = TsFramer::new(Cursor::new(data));
        assert!(framer.read_next(&cfg).unwrap().is_some());
        assert!(framer.read_next(&cfg).unwrap().is_none());
    }
}
