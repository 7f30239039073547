//! Program Stream framer (C8): pack header, system header, and per-stream-id PES dispatch.

use crate::error::{Error, ErrorDetails, Result};
use crate::offset::Offset;
use crate::pes::{stream_id, PesPacket};
use crate::slice_reader::SliceReader;
use log::warn;
use std::collections::HashMap;
use std::io::Read;

/// `pack_start_code`: `00 00 01 BA`.
pub const PACK_START_CODE: u8 = 0xba;
/// `system_header_start_code`: `00 00 01 BB`.
pub const SYSTEM_HEADER_START_CODE: u8 = 0xbb;
/// `MPEG_program_end_code`: `00 00 01 B9`.
pub const PROGRAM_END_CODE: u8 = 0xb9;

/// Program Stream System Clock Reference: a 33-bit base plus a 9-bit extension, packed
/// differently on the wire than the TS adaptation field's PCR (see [`crate::bits::PcrTimestamp`]
/// for that layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scr {
    /// 33 bits of 90 kHz base clock.
    pub base: u64,
    /// 9 bits of 27 MHz clock rolling over every 300 counts to the base.
    pub extension: u16,
}

/// Decode the 6-byte SCR field found at the start of a pack header.
///
/// Layout: `'01':2, scr[32..30]:3, marker:1, scr[29..28]:2; scr[27..20]:8;
/// scr[19..15]:5, marker:1, scr[14..13]:2; scr[12..5]:8; scr[4..0]:5, marker:1, scr_ext[8..7]:2;
/// scr_ext[6..0]:7, marker:1`.
fn decode_scr(bytes: &[u8; 6]) -> Scr {
    if bytes[0] & 0x04 == 0 || bytes[2] & 0x04 == 0 || bytes[4] & 0x04 == 0 {
        warn!("pack header SCR marker bit mismatch");
    }
    let mut base: u64 = (((bytes[0] >> 3) & 0x7) as u64) << 30;
    base |= ((bytes[0] & 0x3) as u64) << 28;
    base |= (bytes[1] as u64) << 20;
    base |= (((bytes[2] >> 3) & 0x1f) as u64) << 15;
    base |= ((bytes[2] & 0x3) as u64) << 13;
    base |= (bytes[3] as u64) << 5;
    base |= (bytes[4] as u64) >> 3;

    let extension = (((bytes[4] & 0x3) as u16) << 7) | ((bytes[5] as u16) >> 1);
    Scr { base, extension }
}

/// Encode a [`Scr`] into its 6-byte wire form, with the fixed `'01'` prefix and all three marker
/// bits set.
fn encode_scr(scr: &Scr) -> [u8; 6] {
    let base = scr.base & ((1u64 << 33) - 1);
    let ext = scr.extension & 0x1ff;
    [
        0x44 | (((base >> 30) & 0x7) as u8) << 3 | ((base >> 28) & 0x3) as u8,
        ((base >> 20) & 0xff) as u8,
        0x04 | (((base >> 15) & 0x1f) as u8) << 3 | ((base >> 13) & 0x3) as u8,
        ((base >> 5) & 0xff) as u8,
        0x04 | (((base & 0x1f) as u8) << 3) | ((ext >> 7) as u8 & 0x3),
        (((ext & 0x7f) as u8) << 1) | 0x01,
    ]
}

/// Parsed `pack_header`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackHeader {
    /// System clock reference at the start of this pack.
    pub scr: Scr,
    /// `program_mux_rate`: units of 50 bytes/second.
    pub mux_rate: u32,
}

/// One `stream_id` entry of a system header's `P-STD` bound table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamBound {
    /// Stream this bound applies to.
    pub stream_id: u8,
    /// `P-STD_buffer_bound_scale`: `false` selects 128-byte units, `true` selects 1024-byte units.
    pub buffer_bound_scale: bool,
    /// `P-STD_buffer_size_bound` in the scale's units.
    pub buffer_size_bound: u16,
}

/// Parsed `system_header`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemHeader {
    /// `rate_bound`: upper bound on `program_mux_rate` across the whole stream.
    pub rate_bound: u32,
    /// Number of audio streams active simultaneously.
    pub audio_bound: u8,
    /// `fixed_flag`: constant bitrate when set.
    pub fixed_flag: bool,
    /// Constrained system parameter stream flag.
    pub csps_flag: bool,
    pub system_audio_lock_flag: bool,
    pub system_video_lock_flag: bool,
    /// Number of video streams active simultaneously.
    pub video_bound: u8,
    pub packet_rate_restriction_flag: bool,
    /// Per-stream buffer bounds.
    pub stream_bounds: Vec<StreamBound>,
}

fn parse_pack_header(reader: &mut SliceReader) -> Result<PackHeader> {
    let scr = decode_scr(reader.read_array_ref::<6>()?);

    let mux_bytes = reader.read_array_ref::<3>()?;
    if mux_bytes[2] & 0x03 != 0x03 {
        warn!("pack header mux_rate marker bits mismatch");
    }
    let mux_rate =
        ((mux_bytes[0] as u32) << 14) | ((mux_bytes[1] as u32) << 6) | ((mux_bytes[2] as u32) >> 2);

    let stuffing_byte = reader.read_u8()?;
    let stuffing_length = (stuffing_byte & 0x07) as usize;
    reader.skip(stuffing_length)?;

    Ok(PackHeader { scr, mux_rate })
}

fn parse_system_header(reader: &mut SliceReader) -> Result<SystemHeader> {
    let header_length = reader.read_be_u16()? as usize;
    let mut body = reader.new_sub_reader(header_length)?;

    let b = body.read_array_ref::<3>()?;
    let rate_bound = (((b[0] & 0x7f) as u32) << 15) | ((b[1] as u32) << 7) | ((b[2] as u32) >> 1);

    let byte_a = body.read_u8()?;
    let audio_bound = byte_a >> 2;
    let fixed_flag = byte_a & 0x02 != 0;
    let csps_flag = byte_a & 0x01 != 0;

    let byte_b = body.read_u8()?;
    let system_audio_lock_flag = byte_b & 0x80 != 0;
    let system_video_lock_flag = byte_b & 0x40 != 0;
    let video_bound = byte_b & 0x1f;

    let byte_c = body.read_u8()?;
    let packet_rate_restriction_flag = byte_c & 0x80 != 0;

    let mut stream_bounds = Vec::new();
    while body.remaining_len() >= 3 {
        let peeked = body.peek(1)?[0];
        if peeked & 0x80 == 0 {
            break;
        }
        let entry = body.read_array_ref::<3>()?;
        stream_bounds.push(StreamBound {
            stream_id: entry[0],
            buffer_bound_scale: entry[1] & 0x20 != 0,
            buffer_size_bound: (((entry[1] & 0x1f) as u16) << 8) | (entry[2] as u16),
        });
    }

    Ok(SystemHeader {
        rate_bound,
        audio_bound,
        fixed_flag,
        csps_flag,
        system_audio_lock_flag,
        system_video_lock_flag,
        video_bound,
        packet_rate_restriction_flag,
        stream_bounds,
    })
}

/// One unit produced by scanning a Program Stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PsUnit {
    /// A `pack_header`.
    Pack(PackHeader),
    /// A `system_header`, legal immediately after a pack header and tolerated (with a warning)
    /// elsewhere.
    System(SystemHeader),
    /// A fully parsed PES packet carried by this Program Stream.
    Pes(PesPacket),
    /// `MPEG_program_end_code`: the stream is over.
    End,
}

/// Reads `00 00 01 xx` units out of a byte source shaped as an MPEG-2 Program Stream,
/// dispatching each by `stream_id`, and applies the audio "sticking" selection policy to any
/// caller that asks for it via [`PsReader::selected_audio_stream_id`].
pub struct PsReader<R> {
    source: R,
    buf: Vec<u8>,
    pos: usize,
    file_offset: u64,
    selected_audio_stream_id: Option<u8>,
    ended: bool,
}

impl<R: Read> PsReader<R> {
    /// Wrap a byte source positioned at the start of a Program Stream.
    pub fn new(source: R) -> Self {
        Self {
            source,
            buf: Vec::new(),
            pos: 0,
            file_offset: 0,
            selected_audio_stream_id: None,
            ended: false,
        }
    }

    /// The audio stream id selected so far by the "first audio stream sticks" policy, if any.
    pub fn selected_audio_stream_id(&self) -> Option<u8> {
        self.selected_audio_stream_id
    }

    fn fill_more(&mut self) -> Result<bool> {
        let mut chunk = [0u8; 4096];
        let read = self.source.read(&mut chunk)?;
        if read == 0 {
            return Ok(false);
        }
        self.buf.extend_from_slice(&chunk[..read]);
        Ok(true)
    }

    fn ensure(&mut self, n: usize) -> Result<bool> {
        while self.buf.len() - self.pos < n {
            if !self.fill_more()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.file_offset += self.pos as u64;
            self.buf.drain(0..self.pos);
            self.pos = 0;
        }
    }

    /// Scans forward from `pos` for the next `00 00 01` prefix, refilling from the source as
    /// needed. Leaves `pos` at the first byte of the prefix and returns the byte that follows it.
    fn find_start_code(&mut self) -> Result<Option<u8>> {
        loop {
            self.compact();
            let mut i = self.pos;
            while i + 3 < self.buf.len() {
                if self.buf[i] == 0x00 && self.buf[i + 1] == 0x00 && self.buf[i + 2] == 0x01 {
                    self.pos = i;
                    return Ok(Some(self.buf[i + 3]));
                }
                i += 1;
            }
            // No prefix found in what's buffered; keep the last up-to-3 bytes as a candidate
            // partial prefix and pull in more data.
            self.pos = self.buf.len().saturating_sub(3);
            if !self.fill_more()? {
                return Ok(None);
            }
        }
    }

    /// Read the next unit, returning `None` at end of stream (either `MPEG_program_end_code` was
    /// already returned, or the source was exhausted before another start code was found).
    pub fn next_unit(&mut self) -> Result<Option<PsUnit>> {
        if self.ended {
            return Ok(None);
        }
        let unit_stream_id = match self.find_start_code()? {
            Some(id) => id,
            None => return Ok(None),
        };

        match unit_stream_id {
            PACK_START_CODE => {
                // 4-byte start code + 10-byte fixed pack header, the last byte of which carries
                // pack_stuffing_length.
                self.ensure_from_pos(14)?;
                let stuffing_length = (self.buf[self.pos + 13] & 0x07) as usize;
                let total = 14 + stuffing_length;
                self.ensure_from_pos(total)?;
                let offset = Offset::bare(self.file_offset + self.pos as u64 + 4);
                let mut reader = SliceReader::new(&self.buf[self.pos + 4..self.pos + total], offset);
                let header = parse_pack_header(&mut reader)?;
                self.pos += total;
                Ok(Some(PsUnit::Pack(header)))
            }
            SYSTEM_HEADER_START_CODE => {
                self.ensure_from_pos(6)?;
                let len = u16::from_be_bytes([self.buf[self.pos + 4], self.buf[self.pos + 5]]) as usize;
                self.ensure_from_pos(6 + len)?;
                let offset = Offset::bare(self.file_offset + self.pos as u64);
                let mut reader = SliceReader::new(&self.buf[self.pos + 4..self.pos + 6 + len], offset);
                let header = parse_system_header(&mut reader)?;
                self.pos += 6 + len;
                Ok(Some(PsUnit::System(header)))
            }
            PROGRAM_END_CODE => {
                self.pos += 4;
                self.ended = true;
                Ok(Some(PsUnit::End))
            }
            stream_id::PADDING_STREAM => {
                self.ensure_from_pos(6)?;
                let len =
                    u16::from_be_bytes([self.buf[self.pos + 4], self.buf[self.pos + 5]]) as usize;
                self.ensure_from_pos(6 + len)?;
                self.pos += 6 + len;
                self.next_unit()
            }
            other => {
                self.ensure_from_pos(6)?;
                let len = u16::from_be_bytes([self.buf[self.pos + 4], self.buf[self.pos + 5]]) as usize;
                if len == 0 {
                    return Err(Error::new(
                        Offset::bare(self.file_offset + self.pos as u64),
                        ErrorDetails::Unsupported(crate::error::UnsupportedKind::PesHeaderTooShort),
                    ));
                }
                let total = 6 + len;
                self.ensure_from_pos(total)?;
                let packet_bytes = &self.buf[self.pos..self.pos + total];
                let packet = PesPacket::parse(packet_bytes)?;

                if stream_id::is_audio(other) || other == stream_id::PRIVATE_STREAM_1 {
                    match self.selected_audio_stream_id {
                        None => self.selected_audio_stream_id = Some(other),
                        Some(sel) if sel != other => {
                            self.pos += total;
                            return self.next_unit();
                        }
                        _ => {}
                    }
                }

                self.pos += total;
                Ok(Some(PsUnit::Pes(packet)))
            }
        }
    }

    fn ensure_from_pos(&mut self, n: usize) -> Result<()> {
        if !self.ensure(n)? {
            return Err(Error::new(
                Offset::bare(self.file_offset + self.pos as u64),
                ErrorDetails::PacketOverrun(n),
            ));
        }
        Ok(())
    }
}

/// Drains a [`PsReader`] into per-stream-id PES packet lists, ignoring pack/system headers and
/// the terminating `MPEG_program_end_code`. Convenience for callers that only want the PES
/// stream, mirroring the shape `toshipp-tstools`' demuxer hands to its consumers.
pub fn collect_pes_by_stream<R: Read>(mut reader: PsReader<R>) -> Result<HashMap<u8, Vec<PesPacket>>> {
    let mut out: HashMap<u8, Vec<PesPacket>> = HashMap::new();
    while let Some(unit) = reader.next_unit()? {
        if let PsUnit::Pes(packet) = unit {
            out.entry(packet.stream_id).or_default().push(packet);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pes::build_pes_header;

    fn pack_header_bytes(base: u64, extension: u16, mux_rate: u32) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x01, PACK_START_CODE];
        out.extend_from_slice(&encode_scr(&Scr { base, extension }));
        out.push(((mux_rate >> 14) & 0xff) as u8);
        out.push(((mux_rate >> 6) & 0xff) as u8);
        out.push((((mux_rate << 2) & 0xfc) as u8) | 0x03);
        out.push(0xf8); // stuffing_length = 0, reserved bits set
        out
    }

    #[test]
    fn scr_round_trips_through_encode_decode() {
        let scr = Scr {
            base: 0x1_2345_6789 & ((1 << 33) - 1),
            extension: 257,
        };
        assert_eq!(decode_scr(&encode_scr(&scr)), scr);
    }

    #[test]
    fn pack_header_parses_mux_rate() {
        let bytes = pack_header_bytes(0, 0, 1234);
        let mut ps = PsReader::new(&bytes[..]);
        let unit = ps.next_unit().unwrap().unwrap();
        match unit {
            PsUnit::Pack(header) => assert_eq!(header.mux_rate, 1234),
            other => panic!("expected pack header, got {:?}", other),
        }
    }

    #[test]
    fn pack_header_round_trips_nonzero_scr() {
        let bytes = pack_header_bytes(0x1_ffff_fffe, 299, 5000);
        let mut ps = PsReader::new(&bytes[..]);
        let unit = ps.next_unit().unwrap().unwrap();
        match unit {
            PsUnit::Pack(header) => {
                assert_eq!(header.scr.base, 0x1_ffff_fffe);
                assert_eq!(header.scr.extension, 299);
                assert_eq!(header.mux_rate, 5000);
            }
            other => panic!("expected pack header, got {:?}", other),
        }
    }

    #[test]
    fn system_header_parses_bounds() {
        let mut bytes = pack_header_bytes(0, 0, 1);
        bytes.extend_from_slice(&[0x00, 0x00, 0x01, SYSTEM_HEADER_START_CODE]);
        let mut body = Vec::new();
        body.extend_from_slice(&[0x80, 0x00, 0x01]); // marker+rate_bound+marker
        body.push(0b00000110); // audio_bound=1, fixed_flag=1, csps_flag=0
        body.push(0b10000001); // system_audio_lock_flag=1, marker, video_bound=1
        body.push(0x00);
        body.extend_from_slice(&[0xe0, 0xe0 | 0x1f, 0xff]); // one stream bound entry
        bytes.extend_from_slice(&(body.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&body);

        let mut ps = PsReader::new(&bytes[..]);
        ps.next_unit().unwrap(); // pack
        let unit = ps.next_unit().unwrap().unwrap();
        match unit {
            PsUnit::System(header) => {
                assert_eq!(header.audio_bound, 1);
                assert!(header.fixed_flag);
                assert!(!header.csps_flag);
                assert_eq!(header.video_bound, 1);
                assert_eq!(header.stream_bounds.len(), 1);
                assert_eq!(header.stream_bounds[0].stream_id, 0xe0);
            }
            other => panic!("expected system header, got {:?}", other),
        }
    }

    #[test]
    fn program_end_code_ends_the_stream() {
        let mut bytes = pack_header_bytes(0, 0, 1);
        bytes.extend_from_slice(&[0x00, 0x00, 0x01, PROGRAM_END_CODE]);
        let mut ps = PsReader::new(&bytes[..]);
        ps.next_unit().unwrap();
        assert_eq!(ps.next_unit().unwrap(), Some(PsUnit::End));
        assert_eq!(ps.next_unit().unwrap(), None);
    }

    #[test]
    fn video_pes_unit_is_dispatched() {
        let mut bytes = pack_header_bytes(0, 0, 1);
        let header = build_pes_header(0xe0, 3, None, None);
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&[1, 2, 3]);
        let mut ps = PsReader::new(&bytes[..]);
        ps.next_unit().unwrap();
        let unit = ps.next_unit().unwrap().unwrap();
        match unit {
            PsUnit::Pes(packet) => assert_eq!(packet.stream_id, 0xe0),
            other => panic!("expected PES packet, got {:?}", other),
        }
    }

    #[test]
    fn second_audio_stream_id_is_dropped_after_first_sticks() {
        let mut bytes = pack_header_bytes(0, 0, 1);
        bytes.extend_from_slice(&build_pes_header(0xc0, 2, None, None));
        bytes.extend_from_slice(&[1, 2]);
        bytes.extend_from_slice(&build_pes_header(0xc1, 2, None, None));
        bytes.extend_from_slice(&[3, 4]);
        let mut ps = PsReader::new(&bytes[..]);
        ps.next_unit().unwrap(); // pack
        let first = ps.next_unit().unwrap().unwrap();
        assert!(matches!(first, PsUnit::Pes(ref p) if p.stream_id == 0xc0));
        assert_eq!(ps.next_unit().unwrap(), None);
        assert_eq!(ps.selected_audio_stream_id(), Some(0xc0));
    }
}
