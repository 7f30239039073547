//! TS writer (C11): continuity assignment, adaptation-field stuffing, PES wrapping, and
//! single-section PAT/PMT emission.

use crate::bits::{encode_pcr, PcrTimestamp};
use crate::config::WriterConfig;
use crate::error::Result;
use crate::pes::stream_id;
use crate::psi::{encode_pat_section, encode_pmt_section, PatEntry, PAT_PID};
use crate::ts::{AdaptationFieldControl, AdaptationFieldHeader, PacketHeader, TransportScramblingControl, NULL_PID, SYNC_BYTE, TS_PACKET_LEN};
use log::warn;
use std::collections::HashMap;
use std::io::Write;

/// Build one complete 188-byte TS packet, splitting `184 - payload.len()` bytes into an
/// adaptation field (carrying `pcr` if given, stuffed with `0xFF` to make up the remainder).
fn build_ts_packet(pid: u16, pusi: bool, cc: u8, pcr: Option<PcrTimestamp>, payload: &[u8]) -> [u8; TS_PACKET_LEN] {
    assert!(payload.len() <= 184, "payload chunk must fit in one TS packet");
    let adaptation_total = 184 - payload.len();

    let afc = if adaptation_total == 0 {
        AdaptationFieldControl::PayloadOnly
    } else {
        AdaptationFieldControl::Both
    };
    let header = PacketHeader::new()
        .with_sync_byte(SYNC_BYTE)
        .with_transport_error_indicator(false)
        .with_payload_unit_start_indicator(pusi)
        .with_transport_priority(false)
        .with_pid(pid)
        .with_transport_scrambling_control(TransportScramblingControl::NotScrambled)
        .with_adaptation_field_control(afc)
        .with_continuity_counter(cc);

    let mut packet = [0u8; TS_PACKET_LEN];
    packet[0..4].copy_from_slice(&header.into_bytes());
    let mut idx = 4;

    if adaptation_total == 1 {
        packet[idx] = 0;
        idx += 1;
    } else if adaptation_total > 1 {
        let flags = AdaptationFieldHeader::new()
            .with_length((adaptation_total - 1) as u8)
            .with_pcr_flag(pcr.is_some());
        packet[idx..idx + 2].copy_from_slice(&flags.into_bytes());
        idx += 2;
        if let Some(pcr) = pcr {
            packet[idx..idx + 6].copy_from_slice(&encode_pcr(&pcr));
            idx += 6;
        }
        let stuffing_end = 4 + adaptation_total;
        packet[idx..stuffing_end].fill(0xff);
        idx = stuffing_end;
    }

    packet[idx..idx + payload.len()].copy_from_slice(payload);
    packet
}

/// Writes TS packets: PES-wrapped elementary stream data, PAT/PMT sections, and null stuffing.
///
/// Maintains one continuity counter per PID, scoped to this writer instance rather than a
/// program-global array.
pub struct TsWriter<W> {
    sink: W,
    cfg: WriterConfig,
    continuity: HashMap<u16, u8>,
}

impl<W: Write> TsWriter<W> {
    /// Wrap a byte sink that TS packets are written to in order.
    pub fn new(sink: W, cfg: WriterConfig) -> Self {
        Self {
            sink,
            cfg,
            continuity: HashMap::new(),
        }
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let slot = self.continuity.entry(pid).or_insert(0);
        let cc = *slot;
        *slot = (cc + 1) % 16;
        cc
    }

    fn write_packet(&mut self, packet: &[u8; TS_PACKET_LEN]) -> Result<()> {
        self.sink.write_all(packet)?;
        Ok(())
    }

    /// Write one all-`0xFF` null packet on the configured stuffing PID (`0x1FFF` by default).
    pub fn write_null_packet(&mut self) -> Result<()> {
        let payload = [0xffu8; 184];
        let packet = build_ts_packet(self.cfg.null_stuffing_pid, false, 0, None, &payload);
        self.write_packet(&packet)
    }

    /// Write a single-section PAT.
    pub fn write_pat(&mut self, transport_stream_id: u16, programs: &[PatEntry]) -> Result<()> {
        let section = encode_pat_section(transport_stream_id, programs);
        self.write_section(PAT_PID, &section)
    }

    /// Write a single-section PMT on `pmt_pid`. Fails if `streams` and `program_info` don't fit
    /// in one section (`section_length` > 1021).
    pub fn write_pmt(
        &mut self,
        pmt_pid: u16,
        program_number: u16,
        version_number: u8,
        pcr_pid: u16,
        program_info: &[u8],
        streams: &[(u8, u16, &[u8])],
    ) -> Result<()> {
        let section = encode_pmt_section(program_number, version_number, pcr_pid, program_info, streams)?;
        self.write_section(pmt_pid, &section)
    }

    fn write_section(&mut self, pid: u16, section: &[u8]) -> Result<()> {
        // Pointer field (always 0x00 here: the section begins immediately) precedes the section
        // on the first packet only.
        let mut remaining: Vec<u8> = Vec::with_capacity(section.len() + 1);
        remaining.push(0x00);
        remaining.extend_from_slice(section);

        let mut pusi = true;
        let mut pos = 0usize;
        while pos < remaining.len() {
            let take = (remaining.len() - pos).min(184);
            let mut chunk = remaining[pos..pos + take].to_vec();
            if chunk.len() < 184 {
                chunk.resize(184, 0xff);
            }
            let cc = self.next_cc(pid);
            let packet = build_ts_packet(pid, pusi, cc, None, &chunk);
            self.write_packet(&packet)?;
            pos += take;
            pusi = false;
        }
        Ok(())
    }

    /// Wrap `data` (one elementary-stream access unit) in a PES header and emit it across as many
    /// TS packets as needed.
    ///
    /// `pcr`, if given, is carried in the adaptation field of the first TS packet only.
    pub fn write_es_as_ts_pes(
        &mut self,
        pid: u16,
        stream_id: u8,
        data: &[u8],
        pts: Option<u64>,
        dts: Option<u64>,
        pcr: Option<PcrTimestamp>,
    ) -> Result<()> {
        let header = build_pes_header_checked(stream_id, data.len(), pts, dts);
        let mut payload = Vec::with_capacity(header.len() + data.len());
        payload.extend_from_slice(&header);
        payload.extend_from_slice(data);

        let mut pos = 0usize;
        let mut pusi = true;
        let mut first = true;
        while pos < payload.len() {
            let remaining = payload.len() - pos;
            let this_pcr = if first { pcr } else { None };
            let capacity = if this_pcr.is_some() { 176 } else { 184 };
            let take = remaining.min(capacity);
            let chunk = &payload[pos..pos + take];
            let cc = self.next_cc(pid);
            let packet = build_ts_packet(pid, pusi, cc, this_pcr, chunk);
            self.write_packet(&packet)?;
            pos += take;
            pusi = false;
            first = false;
        }
        Ok(())
    }
}

/// `build_pes_header` with an overlong-payload warning: video may declare a zero (unbounded)
/// `pes_packet_length` when the payload exceeds 16 bits, but no other stream id can.
fn build_pes_header_checked(stream_id_val: u8, payload_len: usize, pts: Option<u64>, dts: Option<u64>) -> Vec<u8> {
    let optional_len = match (pts, dts) {
        (Some(_), Some(d)) if Some(d) != pts => 10,
        (Some(_), _) => 5,
        (None, _) => 0,
    };
    if payload_len + 3 + optional_len > 0xffff && !stream_id::is_video(stream_id_val) {
        warn!(
            "stream_id {:#04x}: payload of {} bytes exceeds 16-bit PES length and is not video; \
             an unbounded pes_packet_length is only legal for video",
            stream_id_val, payload_len
        );
    }
    crate::pes::build_pes_header(stream_id_val, payload_len, pts, dts)
}
