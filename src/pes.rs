//! PES packet header and body model (C9).
//!
//! Stream-id routing and the optional-header field set are grounded in the `toshipp-tstools` PES
//! body parser (`other_examples/db8d2e8c_toshipp-tstools__src-pes-mod.rs.rs`), the pack's most
//! complete plain-Rust PES-optional-header parser. The PTS/DTS bit-packing reuses
//! [`crate::bits::decode_pts_dts`]/[`crate::bits::encode_pts_dts`] rather than duplicating it.

use crate::bits::{decode_pts_dts, encode_pts_dts, guard};
use crate::error::{Error, ErrorDetails, Result, UnsupportedKind};
use crate::offset::Offset;
use crate::slice_reader::SliceReader;

/// Stream ids that carry raw data bytes with no PES optional header.
pub mod stream_id {
    /// `program_stream_map`
    pub const PROGRAM_STREAM_MAP: u8 = 0xbc;
    /// `private_stream_2`
    pub const PRIVATE_STREAM_2: u8 = 0xbf;
    /// `ECM_stream`
    pub const ECM: u8 = 0xf0;
    /// `EMM_stream`
    pub const EMM: u8 = 0xf1;
    /// `program_stream_directory`
    pub const PROGRAM_STREAM_DIRECTORY: u8 = 0xff;
    /// `DSMCC_stream`
    pub const DSMCC_STREAM: u8 = 0xf2;
    /// `ITU-T Rec. H.222.1 type E stream`
    pub const H222_TYPE_E: u8 = 0xf8;
    /// `padding_stream`
    pub const PADDING_STREAM: u8 = 0xbe;
    /// `private_stream_1`, commonly AC-3/DTS/subtitle payload in DVD Program Streams.
    pub const PRIVATE_STREAM_1: u8 = 0xbd;

    /// Whether `id` is one of the audio stream ids (`0xC0`-`0xDF`).
    pub fn is_audio(id: u8) -> bool {
        (0xc0..=0xdf).contains(&id)
    }

    /// Whether `id` is one of the video stream ids (`0xE0`-`0xEF`).
    pub fn is_video(id: u8) -> bool {
        (0xe0..=0xef).contains(&id)
    }
}

/// Elementary Stream Clock Reference: same 33-bit-base/9-bit-extension shape as a system-layer
/// PCR, but packed across its 6 bytes with the fields interleaved differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escr {
    /// 33-bit 90 kHz base.
    pub base: u64,
    /// 9-bit 27 MHz extension.
    pub extension: u16,
}

fn decode_escr(bytes: &[u8; 6]) -> Escr {
    let base = ((bytes[0] & 0x38) as u64) << 27
        | ((bytes[0] & 0x3) as u64) << 28
        | (bytes[1] as u64) << 20
        | ((bytes[2] & 0xf8) as u64) << 12
        | ((bytes[2] & 0x3) as u64) << 13
        | (bytes[3] as u64) << 5
        | (bytes[4] as u64) >> 3;
    let extension = ((bytes[4] & 0x3) as u16) << 7 | (bytes[5] as u16) >> 1;
    Escr { base, extension }
}

/// The PES-extension sub-fields gated by `PES_extension_flag` in the PES header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PesExtension {
    /// 16 bytes of private data, present when `PES_private_data_flag` is set.
    pub pes_private_data: Option<[u8; 16]>,
    /// Raw pack-header bytes embedded in the extension, for PS-within-PES use.
    pub pack_header: Option<Vec<u8>>,
    /// 7-bit sequence counter.
    pub program_packet_sequence_counter: Option<u8>,
    /// MPEG-1 vs MPEG-2 identifier bit, alongside the sequence counter.
    pub mpeg1_mpeg2_identifier: Option<u8>,
    /// Original stuffing length, alongside the sequence counter.
    pub original_stuff_length: Option<u8>,
    /// P-STD buffer scale bit.
    pub p_std_buffer_scale: Option<u8>,
    /// P-STD buffer size (13 bits).
    pub p_std_buffer_size: Option<u16>,
}

/// The optional fields of a "normal" PES packet header, gated by the flag byte at offset 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PesOptionalHeader {
    /// 2-bit scrambling control.
    pub pes_scrambling_control: u8,
    /// Priority flag.
    pub pes_priority: bool,
    /// Data-alignment-indicator flag.
    pub data_alignment_indicator: bool,
    /// Copyright flag.
    pub copyright: bool,
    /// Original-or-copy flag.
    pub original_or_copy: bool,
    /// Presentation Time Stamp, 90 kHz, if present.
    pub pts: Option<u64>,
    /// Decoding Time Stamp, 90 kHz, if present (only alongside a PTS).
    pub dts: Option<u64>,
    /// Elementary Stream Clock Reference, if present.
    pub escr: Option<Escr>,
    /// 22-bit elementary stream rate, if present.
    pub es_rate: Option<u32>,
    /// Raw DSM trick-mode byte, if present. Sub-fields are not decoded (not needed outside
    /// trick-play UIs, which are out of scope).
    pub dsm_trick_mode: Option<u8>,
    /// 7-bit additional copy info, if present.
    pub additional_copy_info: Option<u8>,
    /// CRC of the previous PES packet, if present.
    pub previous_pes_packet_crc: Option<u16>,
    /// Extension sub-fields, if present.
    pub pes_extension: Option<PesExtension>,
}

/// The body of a PES packet, routed by `stream_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PesBody {
    /// A normal PES packet: optional header plus elementary stream data bytes.
    Normal {
        /// Parsed optional header.
        header: PesOptionalHeader,
        /// Elementary stream data bytes (after the optional header).
        data: Vec<u8>,
    },
    /// Raw data bytes with no PES optional header (program_stream_map, ECM/EMM, etc.).
    Raw(Vec<u8>),
    /// A padding_stream packet; its bytes carry no meaning.
    Padding,
}

/// A fully parsed PES packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesPacket {
    /// The stream id this packet was addressed to.
    pub stream_id: u8,
    /// The packet body, routed by `stream_id`.
    pub body: PesBody,
}

impl PesPacket {
    /// Parse a complete PES packet starting at its `00 00 01` start-code prefix.
    ///
    /// `bytes` must contain exactly one PES packet (the caller, whether the TS reassembler or
    /// the PS framer, is responsible for slicing a bounded or already-finalized-unbounded packet
    /// out of the source).
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 6 {
            return Err(Error::new(
                Offset::default(),
                ErrorDetails::Unsupported(UnsupportedKind::PesHeaderTooShort),
            ));
        }
        if bytes[0] != 0x00 || bytes[1] != 0x00 || bytes[2] != 0x01 {
            return Err(Error::new(Offset::default(), ErrorDetails::BadPesHeader));
        }
        let stream_id = bytes[3];
        let body = match stream_id {
            stream_id::PROGRAM_STREAM_MAP
            | stream_id::PRIVATE_STREAM_2
            | stream_id::ECM
            | stream_id::EMM
            | stream_id::PROGRAM_STREAM_DIRECTORY
            | stream_id::DSMCC_STREAM
            | stream_id::H222_TYPE_E => PesBody::Raw(bytes[6..].to_vec()),
            stream_id::PADDING_STREAM => PesBody::Padding,
            _ => {
                let (header, data) = parse_optional_header_and_data(&bytes[6..])?;
                PesBody::Normal { header, data }
            }
        };
        Ok(Self { stream_id, body })
    }
}

fn parse_optional_header_and_data(bytes: &[u8]) -> Result<(PesOptionalHeader, Vec<u8>)> {
    let mut reader = SliceReader::new(bytes, Offset::default());
    if reader.remaining_len() < 3 {
        return Err(reader.make_error(ErrorDetails::BadPesHeader));
    }
    let flags_1 = reader.read_u8()?;
    let flags_2 = reader.read_u8()?;
    let pes_header_data_length = reader.read_u8()? as usize;

    let pes_scrambling_control = (flags_1 >> 6) & 0x3;
    let pes_priority = (flags_1 >> 5) & 1 != 0;
    let data_alignment_indicator = (flags_1 >> 4) & 1 != 0;
    let copyright = (flags_1 >> 3) & 1 != 0;
    let original_or_copy = (flags_1 >> 2) & 1 != 0;

    let pts_dts_flags = (flags_2 >> 6) & 0x3;
    let escr_flag = (flags_2 >> 5) & 1 != 0;
    let es_rate_flag = (flags_2 >> 4) & 1 != 0;
    let dsm_trick_mode_flag = (flags_2 >> 3) & 1 != 0;
    let additional_copy_info_flag = (flags_2 >> 2) & 1 != 0;
    let pes_crc_flag = (flags_2 >> 1) & 1 != 0;
    let pes_extension_flag = flags_2 & 1 != 0;

    let mut optional = reader.new_sub_reader(pes_header_data_length)?;

    let (pts, dts) = match pts_dts_flags {
        0b10 => (Some(decode_pts_dts(optional.read_array_ref::<5>()?)), None),
        0b11 => {
            let pts = decode_pts_dts(optional.read_array_ref::<5>()?);
            let dts = decode_pts_dts(optional.read_array_ref::<5>()?);
            (Some(pts), Some(dts))
        }
        _ => (None, None),
    };
    let escr = if escr_flag {
        Some(decode_escr(optional.read_array_ref::<6>()?))
    } else {
        None
    };
    let es_rate = if es_rate_flag {
        let b = optional.read_array_ref::<3>()?;
        Some((b[0] as u32 & 0x7f) << 15 | (b[1] as u32) << 7 | (b[2] as u32) >> 1)
    } else {
        None
    };
    let dsm_trick_mode = if dsm_trick_mode_flag {
        Some(optional.read_u8()?)
    } else {
        None
    };
    let additional_copy_info = if additional_copy_info_flag {
        Some(optional.read_u8()? & 0x7f)
    } else {
        None
    };
    let previous_pes_packet_crc = if pes_crc_flag {
        Some(u16::from_be_bytes(*optional.read_array_ref::<2>()?))
    } else {
        None
    };
    let pes_extension = if pes_extension_flag {
        Some(parse_extension(&mut optional)?)
    } else {
        None
    };

    let data = reader.read_to_end()?.to_vec();

    Ok((
        PesOptionalHeader {
            pes_scrambling_control,
            pes_priority,
            data_alignment_indicator,
            copyright,
            original_or_copy,
            pts,
            dts,
            escr,
            es_rate,
            dsm_trick_mode,
            additional_copy_info,
            previous_pes_packet_crc,
            pes_extension,
        },
        data,
    ))
}

fn parse_extension(reader: &mut SliceReader) -> Result<PesExtension> {
    let flags = reader.read_u8()?;
    let pes_private_data_flag = flags & 0x80 != 0;
    let pack_header_field_flag = flags & 0x40 != 0;
    let program_packet_sequence_counter_flag = flags & 0x20 != 0;
    let p_std_buffer_flag = flags & 0x10 != 0;
    let pes_extension_flag_2 = flags & 0x1 != 0;

    let pes_private_data = if pes_private_data_flag {
        Some(*reader.read_array_ref::<16>()?)
    } else {
        None
    };
    let pack_header = if pack_header_field_flag {
        let len = reader.read_u8()? as usize;
        Some(reader.read(len)?.to_vec())
    } else {
        None
    };
    let (program_packet_sequence_counter, mpeg1_mpeg2_identifier, original_stuff_length) =
        if program_packet_sequence_counter_flag {
            let b = reader.read_array_ref::<2>()?;
            (Some(b[0] & 0x7f), Some((b[1] & 0x40) >> 6), Some(b[1] & 0x3f))
        } else {
            (None, None, None)
        };
    let (p_std_buffer_scale, p_std_buffer_size) = if p_std_buffer_flag {
        let b = reader.read_array_ref::<2>()?;
        (
            Some((b[0] & 0x20) >> 5),
            Some((b[0] as u16 & 0x1f) << 8 | b[1] as u16),
        )
    } else {
        (None, None)
    };
    if pes_extension_flag_2 {
        reader.read_u8()?;
    }
    Ok(PesExtension {
        pes_private_data,
        pack_header,
        program_packet_sequence_counter,
        mpeg1_mpeg2_identifier,
        original_stuff_length,
        p_std_buffer_scale,
        p_std_buffer_size,
    })
}

/// Build a PES header + optional PTS/DTS for [`crate::writer`]'s `write_ES_as_TS_PES`.
///
/// `pts`/`dts` reuse [`encode_pts_dts`]; when `pts == dts` the DTS is suppressed, since it adds
/// no information the PTS doesn't already carry.
pub fn build_pes_header(stream_id: u8, payload_len: usize, pts: Option<u64>, dts: Option<u64>) -> Vec<u8> {
    let dts = match (pts, dts) {
        (Some(p), Some(d)) if p == d => None,
        (_, d) => d,
    };
    let (pts_dts_flags, optional_len) = match (pts, dts) {
        (Some(_), Some(_)) => (0b11, 10),
        (Some(_), None) => (0b10, 5),
        (None, _) => (0b00, 0),
    };
    let flags_1 = if stream_id::is_audio(stream_id) { 0x84 } else { 0x80 };
    let flags_2 = pts_dts_flags << 6;

    let pes_len16 = if payload_len + 3 + optional_len > 0xffff {
        0u16
    } else {
        (payload_len + 3 + optional_len) as u16
    };

    let mut out = vec![0x00, 0x00, 0x01, stream_id];
    out.extend_from_slice(&pes_len16.to_be_bytes());
    out.push(flags_1);
    out.push(flags_2);
    out.push(optional_len as u8);
    if let Some(pts) = pts {
        out.extend_from_slice(&encode_pts_dts(
            pts,
            if dts.is_some() { guard::PTS_THEN_DTS } else { guard::PTS_ONLY },
        ));
    }
    if let Some(dts) = dts {
        out.extend_from_slice(&encode_pts_dts(dts, guard::DTS_ONLY));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_normal_pes(pts: Option<u64>) -> Vec<u8> {
        let mut header = build_pes_header(0xe0, 4, pts, None);
        header.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        header
    }

    #[test]
    fn parses_normal_pes_with_pts() {
        let bytes = sample_normal_pes(Some(900_000));
        let packet = PesPacket::parse(&bytes).unwrap();
        assert_eq!(packet.stream_id, 0xe0);
        match packet.body {
            PesBody::Normal { header, data } => {
                assert_eq!(header.pts, Some(900_000));
                assert_eq!(header.dts, None);
                assert_eq!(data, vec![0xde, 0xad, 0xbe, 0xef]);
            }
            _ => panic!("expected normal body"),
        }
    }

    #[test]
    fn parses_normal_pes_with_no_timestamps() {
        let bytes = sample_normal_pes(None);
        let packet = PesPacket::parse(&bytes).unwrap();
        match packet.body {
            PesBody::Normal { header, .. } => {
                assert_eq!(header.pts, None);
                assert_eq!(header.dts, None);
            }
            _ => panic!("expected normal body"),
        }
    }

    #[test]
    fn raw_stream_ids_skip_optional_header() {
        let mut bytes = vec![0x00, 0x00, 0x01, stream_id::PROGRAM_STREAM_MAP, 0x00, 0x03];
        bytes.extend_from_slice(&[1, 2, 3]);
        let packet = PesPacket::parse(&bytes).unwrap();
        assert_eq!(packet.body, PesBody::Raw(vec![1, 2, 3]));
    }

    #[test]
    fn padding_stream_is_recognized() {
        let bytes = vec![0x00, 0x00, 0x01, stream_id::PADDING_STREAM, 0x00, 0x02, 0xff, 0xff];
        let packet = PesPacket::parse(&bytes).unwrap();
        assert_eq!(packet.body, PesBody::Padding);
    }

    #[test]
    fn too_short_is_an_error() {
        let err = PesPacket::parse(&[0x00, 0x00, 0x01]).unwrap_err();
        assert!(matches!(
            err.details,
            ErrorDetails::Unsupported(UnsupportedKind::PesHeaderTooShort)
        ));
    }

    #[test]
    fn bad_start_code_is_an_error() {
        let err = PesPacket::parse(&[0x00, 0x00, 0x02, 0xe0, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err.details, ErrorDetails::BadPesHeader));
    }

    #[test]
    fn pts_equal_dts_suppresses_dts() {
        let header = build_pes_header(0xe0, 4, Some(500), Some(500));
        let packet = PesPacket::parse(&{
            let mut b = header;
            b.extend_from_slice(&[1, 2, 3, 4]);
            b
        })
        .unwrap();
        match packet.body {
            PesBody::Normal { header, .. } => assert_eq!(header.dts, None),
            _ => panic!(),
        }
    }
}
