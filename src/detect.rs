//! Stream-kind detector (C13): classifies a byte source as TS, PS, or bare ES at the file level,
//! and further narrows a bare ES to H.262, H.264, or AVS by reading its start codes.

use crate::error::Result;
use crate::es::scan_bytes;
use crate::ps::PACK_START_CODE;
use crate::ts::{SYNC_BYTE, TS_PACKET_LEN};
use std::io::{Read, Seek, SeekFrom};

/// Maximum number of TS-packet-period sync bytes checked before deciding a source is TS.
const TS_SYNC_CHECKS: u64 = 500;
/// Maximum number of ES units read before deciding an ES stream's kind.
const ES_UNIT_SAMPLE: usize = 500;
/// Chunk size read while sampling a bare ES for start codes.
const ES_SAMPLE_BYTES: usize = 64 * 1024;

/// The container-level classification of a byte source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// 188-byte-packet Transport Stream.
    Ts,
    /// Pack-framed Program Stream.
    Ps,
    /// Bare Elementary Stream, further classified by [`EsKind`].
    Es(EsKind),
}

/// The coded-video kind of a bare Elementary Stream, determined by elimination over its start
/// codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsKind {
    /// ITU-T H.262 / MPEG-2 Part 2.
    H262,
    /// ITU-T H.264 / MPEG-4 AVC.
    H264,
    /// AVS (GB/T 20090.2).
    Avs,
    /// Every candidate was eliminated, or more than one candidate survived.
    Unknown,
}

impl EsKind {
    /// The `stream_type` byte a PMT would carry for this kind, or `None` for
    /// [`EsKind::Unknown`].
    pub fn stream_type(&self) -> Option<u8> {
        match self {
            EsKind::H262 => Some(0x02),
            EsKind::H264 => Some(0x1b),
            EsKind::Avs => Some(0x42),
            EsKind::Unknown => None,
        }
    }
}

/// H.262 start codes that never appear in H.262 itself; their presence rules H.262 out.
const H262_RESERVED: [u8; 3] = [0xb0, 0xb1, 0xb6];
/// AVS start codes that never appear in AVS itself; their presence rules AVS out.
const AVS_RESERVED: [u8; 2] = [0xb4, 0xb8];

/// H.264 `nal_unit_type` values reserved or extension-only in the base spec.
fn is_reserved_nal_type(nal_unit_type: u8) -> bool {
    (13..=23).contains(&nal_unit_type)
}

/// Eliminate the H.264 candidate for one start-code byte, given running elimination state.
fn eliminates_h264(start_code: u8) -> bool {
    if start_code & 0x80 != 0 {
        return true;
    }
    let nal_ref_idc = (start_code >> 5) & 0x3;
    let nal_unit_type = start_code & 0x1f;
    if is_reserved_nal_type(nal_unit_type) {
        return true;
    }
    // IDR=5, SPS=7, PPS=8 must carry a non-zero nal_ref_idc.
    if nal_ref_idc == 0 && matches!(nal_unit_type, 5 | 7 | 8) {
        return true;
    }
    // SEI=6, AUD=9, end-of-sequence=10, end-of-stream=11, filler=12 must carry a zero nal_ref_idc.
    if nal_ref_idc != 0 && matches!(nal_unit_type, 6 | 9 | 10 | 11 | 12) {
        return true;
    }
    false
}

/// Classify a sample of ES start-code bytes (the 4th byte of each `00 00 01 xx` unit) by
/// elimination over the candidate kinds.
pub fn classify_start_codes<I: IntoIterator<Item = u8>>(start_codes: I) -> EsKind {
    let mut h262_alive = true;
    let mut h264_alive = true;
    let mut avs_alive = true;

    for sc in start_codes {
        if H262_RESERVED.contains(&sc) {
            h262_alive = false;
        }
        if AVS_RESERVED.contains(&sc) {
            avs_alive = false;
        }
        if h264_alive && eliminates_h264(sc) {
            h264_alive = false;
        }
    }

    match (h262_alive, h264_alive, avs_alive) {
        (true, false, false) => EsKind::H262,
        (false, true, false) => EsKind::H264,
        (false, false, true) => EsKind::Avs,
        _ => EsKind::Unknown,
    }
}

/// Sample up to [`ES_UNIT_SAMPLE`] units from a bare ES source and classify it.
fn detect_es_kind<R: Read>(mut source: R) -> Result<EsKind> {
    let mut sample = Vec::new();
    let mut buf = [0u8; ES_SAMPLE_BYTES];
    let mut unit_count = 0usize;
    loop {
        let n = source.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sample.extend_from_slice(&buf[..n]);
        unit_count = scan_bytes(&sample).len();
        if unit_count >= ES_UNIT_SAMPLE {
            break;
        }
    }
    let units = scan_bytes(&sample);
    let codes = units.iter().take(ES_UNIT_SAMPLE).map(|u| u.start_code);
    Ok(classify_start_codes(codes))
}

/// Check whether every `TS_PACKET_LEN`-periodic byte starting at the source's current position
/// is [`SYNC_BYTE`], for up to [`TS_SYNC_CHECKS`] packet periods (or until EOF).
fn looks_like_ts<R: Read + Seek>(source: &mut R, start: u64) -> Result<bool> {
    for i in 0..TS_SYNC_CHECKS {
        let pos = start + i * TS_PACKET_LEN as u64;
        source.seek(SeekFrom::Start(pos))?;
        let mut byte = [0u8; 1];
        if source.read(&mut byte)? == 0 {
            break;
        }
        if byte[0] != SYNC_BYTE {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Classify `source` as TS, PS, or ES (further narrowed to H.262/H.264/AVS/Unknown). `source` is
/// seeked back to its original position before returning, in either the success or error case.
pub fn detect_stream_kind<R: Read + Seek>(source: &mut R) -> Result<StreamKind> {
    let start = source.stream_position()?;
    let result = detect_stream_kind_inner(source, start);
    source.seek(SeekFrom::Start(start))?;
    result
}

fn detect_stream_kind_inner<R: Read + Seek>(source: &mut R, start: u64) -> Result<StreamKind> {
    let mut first = [0u8; 1];
    if source.read(&mut first)? == 0 {
        return Ok(StreamKind::Es(EsKind::Unknown));
    }
    if first[0] == SYNC_BYTE {
        source.seek(SeekFrom::Start(start))?;
        if looks_like_ts(source, start)? {
            return Ok(StreamKind::Ts);
        }
    }

    source.seek(SeekFrom::Start(start))?;
    let mut head = [0u8; 4];
    let read = source.read(&mut head)?;
    if read == 4 && head[0] == 0x00 && head[1] == 0x00 && head[2] == 0x01 && head[3] == PACK_START_CODE {
        return Ok(StreamKind::Ps);
    }

    source.seek(SeekFrom::Start(start))?;
    Ok(StreamKind::Es(detect_es_kind(source)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn h262_survives_with_only_non_reserved_codes() {
        // Start codes in {B3, B5, B8, 00} survive only the H.262 candidate.
        let codes = [0xb3u8, 0xb5, 0xb8, 0x00];
        assert_eq!(classify_start_codes(codes), EsKind::H262);
    }

    #[test]
    fn h262_reserved_code_eliminates_h262() {
        let codes = [0xb0u8, 0xb3];
        assert_eq!(classify_start_codes(codes), EsKind::Unknown);
    }

    #[test]
    fn plain_h264_nal_sequence_is_detected() {
        // SPS (7, ref_idc=3), PPS (8, ref_idc=3), IDR slice (5, ref_idc=3), non-IDR slice (1, ref_idc=2).
        let codes = [0x67u8, 0x68, 0x65, 0x41];
        assert_eq!(classify_start_codes(codes), EsKind::H264);
    }

    #[test]
    fn h264_sei_with_nonzero_ref_idc_eliminates_h264() {
        let codes = [0x67u8, 0x20 | 0x06]; // ref_idc=1, SEI=6: invalid combination.
        assert_eq!(classify_start_codes(codes), EsKind::Unknown);
    }

    #[test]
    fn avs_reserved_code_eliminates_avs() {
        let codes = [0xb4u8];
        assert_eq!(classify_start_codes(codes), EsKind::Unknown);
    }

    #[test]
    fn empty_sample_is_unknown() {
        assert_eq!(classify_start_codes(std::iter::empty()), EsKind::Unknown);
    }

    #[test]
    fn stream_type_bytes_match_assigned_values() {
        assert_eq!(EsKind::H262.stream_type(), Some(0x02));
        assert_eq!(EsKind::H264.stream_type(), Some(0x1b));
        assert_eq!(EsKind::Avs.stream_type(), Some(0x42));
        assert_eq!(EsKind::Unknown.stream_type(), None);
    }

    fn ts_stream(num_packets: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..num_packets {
            let mut p = [0xffu8; TS_PACKET_LEN];
            p[0] = SYNC_BYTE;
            p[1] = 0x1f;
            p[2] = 0xff;
            p[3] = 0x10 | (i as u8 & 0x0f);
            out.extend_from_slice(&p);
        }
        out
    }

    #[test]
    fn detects_ts_container() {
        let mut cursor = Cursor::new(ts_stream(10));
        assert_eq!(detect_stream_kind(&mut cursor).unwrap(), StreamKind::Ts);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn detects_ps_container() {
        let mut bytes = vec![0x00, 0x00, 0x01, PACK_START_CODE];
        bytes.extend_from_slice(&[0u8; 10]);
        let mut cursor = Cursor::new(bytes);
        assert_eq!(detect_stream_kind(&mut cursor).unwrap(), StreamKind::Ps);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn detects_bare_es_and_classifies_it() {
        let mut bytes = Vec::new();
        for sc in [0x67u8, 0x68, 0x65] {
            bytes.extend_from_slice(&[0x00, 0x00, 0x01, sc, 1, 2, 3]);
        }
        let mut cursor = Cursor::new(bytes);
        assert_eq!(
            detect_stream_kind(&mut cursor).unwrap(),
            StreamKind::Es(EsKind::H264)
        );
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn detection_restores_original_position() {
        let mut cursor = Cursor::new(ts_stream(3));
        cursor.seek(SeekFrom::Start(5)).unwrap();
        detect_stream_kind(&mut cursor).unwrap();
        assert_eq!(cursor.position(), 5);
    }
}
