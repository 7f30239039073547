//! The per-PID PES reassembly engine, tying together the TS framer, continuity tracking, the PSI
//! assembler, and the PES body parser.
//!
//! A PID-keyed map holds in-progress units, continued across TS packets, with the completion
//! rules a PES reassembler needs: unbounded PES terminated by the next start or EOF, a "deferred
//! slot" for when finalizing an old unbounded PES and completing a new bounded one happen in the
//! same TS packet, and a configurable cap on unbounded accumulation.

use crate::config::{OverlongPesPolicy, ReaderConfig};
use crate::continuity::ContinuityTracker;
use crate::error::{Error, ErrorDetails, Result};
use crate::offset::Offset;
use crate::pes::PesPacket;
use crate::psi::{Pat, Pmt, PsiAssembler, PAT_PID};
use crate::ts::{TsFramer, NULL_PID};
use log::warn;
use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek};

/// One unit produced by the demuxer.
#[derive(Debug)]
pub enum DemuxedUnit {
    /// A freshly parsed Program Association Table.
    Pat(Pat),
    /// A freshly parsed Program Map Table.
    Pmt(Pmt),
    /// A completed PES packet.
    Pes {
        /// PID the packet was reassembled from.
        pid: u16,
        /// Offset of the PES packet's first byte.
        offset: Offset,
        /// The parsed packet.
        packet: PesPacket,
    },
}

fn is_video_stream_type(stream_type: u8) -> bool {
    matches!(stream_type, 0x01 | 0x02 | 0x1b | 0x24 | 0x42)
}

struct InProgressPes {
    pid: u16,
    declared_length: Option<usize>,
    first_byte_offset: Offset,
    data: Vec<u8>,
}

/// Demuxes a TS byte source into [`DemuxedUnit`]s.
///
/// Mirrors the streaming-iterator shape of [`TsFramer`]: call [`Demuxer::next_unit`] in a loop
/// until it returns `Ok(None)`, at which point the source is exhausted and any in-progress
/// unbounded PES packets have already been drained.
pub struct Demuxer<R: Read + Seek> {
    framer: TsFramer<R>,
    cfg: ReaderConfig,
    continuity: ContinuityTracker,
    psi: PsiAssembler,
    elementary_pids: HashSet<u16>,
    video_pids: HashSet<u16>,
    in_progress: HashMap<u16, InProgressPes>,
    deferred: Option<DemuxedUnit>,
    eof_drain: Vec<DemuxedUnit>,
    at_eof: bool,
}

impl<R: Read + Seek> Demuxer<R> {
    /// Construct a demuxer over `source`, watching only the PAT PID until a PAT names programs.
    pub fn new(source: R, cfg: ReaderConfig) -> Self {
        Self {
            framer: TsFramer::new(source),
            cfg,
            continuity: ContinuityTracker::new(),
            psi: PsiAssembler::new(),
            elementary_pids: HashSet::new(),
            video_pids: HashSet::new(),
            in_progress: HashMap::new(),
            deferred: None,
            eof_drain: Vec::new(),
            at_eof: false,
        }
    }

    /// Produce the next demuxed unit, or `None` once the source and all in-progress state have
    /// been fully drained.
    pub fn next_unit(&mut self) -> Result<Option<DemuxedUnit>> {
        if let Some(unit) = self.deferred.take() {
            return Ok(Some(unit));
        }
        loop {
            if self.at_eof {
                return Ok(self.eof_drain.pop());
            }
            let packet = match self.framer.read_next(&self.cfg)? {
                Some(packet) => packet,
                None => {
                    self.at_eof = true;
                    for (_, entry) in self.in_progress.drain() {
                        if entry.declared_length.is_none() {
                            match PesPacket::parse(&entry.data) {
                                Ok(packet) => self.eof_drain.push(DemuxedUnit::Pes {
                                    pid: entry.pid,
                                    offset: entry.first_byte_offset,
                                    packet,
                                }),
                                Err(e) => warn!("discarding unparseable trailing PES: {}", e),
                            }
                        }
                    }
                    continue;
                }
            };

            if packet.is_null() {
                continue;
            }
            let pid = packet.pid();
            self.continuity.feed(pid, packet.header.continuity_counter());
            let offset = packet.offset;
            let pusi = packet.pusi();
            // Copied out of the framer's read-ahead buffer so the feed/feed_pes calls below,
            // which need `&mut self`, aren't blocked by a borrow tied to `self.framer`.
            let payload = match packet.payload {
                Some(p) => p.to_vec(),
                None => continue,
            };
            let payload = payload.as_slice();

            if pid == PAT_PID || !self.elementary_pids.contains(&pid) {
                if let Some(section) = self.psi.feed(pid, pusi, payload, offset)? {
                    if !section.crc_valid() {
                        if pid == PAT_PID {
                            return Err(Error::new(offset, ErrorDetails::PsiCrcMismatch));
                        }
                        warn!("PMT on PID {:#06x} failed CRC check; discarding", pid);
                        continue;
                    }
                    if pid == PAT_PID {
                        let pat = section.as_pat()?;
                        for program in pat.programs() {
                            self.psi.watch_pmt_pid(program.pmt_pid);
                        }
                        return Ok(Some(DemuxedUnit::Pat(pat)));
                    } else {
                        let pmt = section.as_pmt()?;
                        for stream in &pmt.streams {
                            self.elementary_pids.insert(stream.elementary_pid);
                            if is_video_stream_type(stream.stream_type) {
                                self.video_pids.insert(stream.elementary_pid);
                            }
                        }
                        return Ok(Some(DemuxedUnit::Pmt(pmt)));
                    }
                }
                continue;
            }

            if self.elementary_pids.contains(&pid) {
                if let Some(unit) = self.feed_pes(pid, pusi, payload, offset)? {
                    return Ok(Some(unit));
                }
                continue;
            }
        }
    }

    fn feed_pes(
        &mut self,
        pid: u16,
        pusi: bool,
        payload: &[u8],
        offset: Offset,
    ) -> Result<Option<DemuxedUnit>> {
        if pusi {
            let finalized_old = match self.in_progress.remove(&pid) {
                Some(old) if old.declared_length.is_none() => Some(finalize(old)?),
                Some(_) => {
                    warn!("dropping incomplete bounded PES on PID {:#06x}", pid);
                    None
                }
                None => None,
            };

            if payload.len() < 6 || payload[0] != 0 || payload[1] != 0 || payload[2] != 1 {
                return Err(Error::new(offset, ErrorDetails::BadPesHeader));
            }
            let pes_len16 = u16::from_be_bytes([payload[4], payload[5]]) as usize;
            let is_video = self.video_pids.contains(&pid);
            let declared_length = if pes_len16 == 0 {
                if is_video {
                    None
                } else {
                    warn!(
                        "unbounded PES declared on non-video PID {:#06x}; treating as bounded to this packet",
                        pid
                    );
                    Some(payload.len())
                }
            } else {
                Some(pes_len16 + 6)
            };

            let mut entry = InProgressPes {
                pid,
                declared_length,
                first_byte_offset: offset,
                data: Vec::new(),
            };
            entry.data.extend_from_slice(payload);

            match self.try_complete(&mut entry)? {
                Some(new_unit) => {
                    if let Some(old_unit) = finalized_old {
                        self.deferred = Some(new_unit);
                        Ok(Some(old_unit))
                    } else {
                        Ok(Some(new_unit))
                    }
                }
                None => {
                    self.in_progress.insert(pid, entry);
                    Ok(finalized_old)
                }
            }
        } else {
            match self.in_progress.get_mut(&pid) {
                None => {
                    warn!("PID {:#06x}: PES continuation with no packet in progress", pid);
                    Ok(None)
                }
                Some(entry) => {
                    entry.data.extend_from_slice(payload);
                    if self.try_complete(entry)?.is_some() {
                        let entry = self.in_progress.remove(&pid).unwrap();
                        Ok(Some(finalize(entry)?))
                    } else {
                        Ok(None)
                    }
                }
            }
        }
    }

    fn try_complete(&self, entry: &mut InProgressPes) -> Result<Option<DemuxedUnit>> {
        match entry.declared_length {
            Some(total) => {
                if entry.data.len() < total {
                    return Ok(None);
                }
                if entry.data.len() > total {
                    match self.cfg.overlong_pes_policy {
                        OverlongPesPolicy::Error => {
                            return Err(Error::new(entry.first_byte_offset, ErrorDetails::BadPesHeader));
                        }
                        OverlongPesPolicy::WarnAndTruncate => {
                            warn!(
                                "overlong PES on PID {:#06x}: declared {} got {}",
                                entry.pid,
                                total,
                                entry.data.len()
                            );
                            entry.data.truncate(total);
                        }
                    }
                }
                let packet = PesPacket::parse(&entry.data)?;
                Ok(Some(DemuxedUnit::Pes { pid: entry.pid, offset: entry.first_byte_offset, packet }))
            }
            None => match self.cfg.max_unbounded_pes_bytes {
                Some(max) if entry.data.len() >= max => {
                    warn!(
                        "unbounded PES on PID {:#06x} hit configured cap of {} bytes",
                        entry.pid, max
                    );
                    let packet = PesPacket::parse(&entry.data)?;
                    Ok(Some(DemuxedUnit::Pes { pid: entry.pid, offset: entry.first_byte_offset, packet }))
                }
                _ => Ok(None),
            },
        }
    }
}

fn finalize(entry: InProgressPes) -> Result<DemuxedUnit> {
    let packet = PesPacket::parse(&entry.data)?;
    Ok(DemuxedUnit::Pes { pid: entry.pid, offset: entry.first_byte_offset, packet })
}

#[allow(unused)]
fn assert_null_pid_is_filtered(pid: u16) {
    debug_assert_ne!(pid, NULL_PID);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pes::build_pes_header;
    use crate::psi::{section_crc, PMT_TABLE_ID};
    use crate::ts::{AdaptationFieldControl, PacketHeader, TransportScramblingControl, TS_PACKET_LEN};
    use std::io::Cursor;

    fn pack_packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
        let header = PacketHeader::new()
            .with_sync_byte(0x47)
            .with_transport_error_indicator(false)
            .with_payload_unit_start_indicator(pusi)
            .with_transport_priority(false)
            .with_pid(pid)
            .with_transport_scrambling_control(TransportScramblingControl::NotScrambled)
            .with_adaptation_field_control(AdaptationFieldControl::PayloadOnly)
            .with_continuity_counter(cc);
        let mut packet = header.into_bytes().to_vec();
        packet.extend_from_slice(payload);
        packet.resize(TS_PACKET_LEN, 0xff);
        packet
    }

    fn pat_packet(pmt_pid: u16) -> Vec<u8> {
        let mut section = vec![0x00, 0xb0, 0x0d, 0x00, 0x01, 0xc1, 0x00, 0x00, 0x00, 0x01];
        section.push(0xe0 | ((pmt_pid >> 8) as u8 & 0x1f));
        section.push((pmt_pid & 0xff) as u8);
        let crc = section_crc(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        let mut payload = vec![0x00u8];
        payload.extend_from_slice(&section);
        pack_packet(PAT_PID, true, 0, &payload)
    }

    /// Hand-packs a single-stream PMT section (table syntax + PMT header + one ES info record),
    /// matching the bit layout of the private bitfields in `psi.rs`.
    fn pmt_section_bytes(pcr_pid: u16, es_pid: u16, stream_type: u8) -> Vec<u8> {
        let mut body = vec![
            0xe0 | ((pcr_pid >> 8) as u8 & 0x1f),
            (pcr_pid & 0xff) as u8,
            0xf0, // reserved2 + unused, program_info_length top bits (length 0)
            0x00,
        ];
        body.push(stream_type);
        body.push(0xe0 | ((es_pid >> 8) as u8 & 0x1f));
        body.push((es_pid & 0xff) as u8);
        body.push(0xf0);
        body.push(0x00);

        let syntax = vec![0x00, 0x01, 0xc1, 0x00, 0x00];
        let section_length = (5 + body.len() + 4) as u16;
        let mut section = vec![
            PMT_TABLE_ID,
            0xb0 | ((section_length >> 8) as u8 & 0x3),
            (section_length & 0xff) as u8,
        ];
        section.extend_from_slice(&syntax);
        section.extend_from_slice(&body);
        let crc = section_crc(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    fn pmt_packet(pmt_pid: u16, es_pid: u16, stream_type: u8) -> Vec<u8> {
        let section = pmt_section_bytes(es_pid, es_pid, stream_type);
        let mut payload = vec![0x00u8];
        payload.extend_from_slice(&section);
        pack_packet(pmt_pid, true, 0, &payload)
    }

    #[test]
    fn demuxes_pat_then_pmt_then_video_pes() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&pat_packet(0x1000));
        stream.extend_from_slice(&pmt_packet(0x1000, 0x101, 0x1b));

        let mut pes_bytes = build_pes_header(0xe0, 4, None, None);
        pes_bytes.extend_from_slice(&[1, 2, 3, 4]);
        stream.extend_from_slice(&pack_packet(0x101, true, 0, &pes_bytes));

        let mut demuxer = Demuxer::new(Cursor::new(stream), ReaderConfig::default());
        let pat = demuxer.next_unit().unwrap().unwrap();
        assert!(matches!(pat, DemuxedUnit::Pat(_)));
        let pmt = demuxer.next_unit().unwrap().unwrap();
        assert!(matches!(pmt, DemuxedUnit::Pmt(_)));
        let pes = demuxer.next_unit().unwrap().unwrap();
        match pes {
            DemuxedUnit::Pes { pid, .. } => assert_eq!(pid, 0x101),
            _ => panic!("expected PES"),
        }
        assert!(demuxer.next_unit().unwrap().is_none());
    }

    #[test]
    fn unbounded_video_pes_closed_by_next_start() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&pat_packet(0x1000));
        stream.extend_from_slice(&pmt_packet(0x1000, 0x101, 0x1b));

        let mut first = vec![0x00, 0x00, 0x01, 0xe0, 0x00, 0x00, 0x80, 0x00, 0x00];
        first.extend_from_slice(&[0xaa; 100]);
        stream.extend_from_slice(&pack_packet(0x101, true, 0, &first));

        let mut second = vec![0x00, 0x00, 0x01, 0xe0, 0x00, 0x00, 0x80, 0x00, 0x00];
        second.extend_from_slice(&[0xbb; 50]);
        stream.extend_from_slice(&pack_packet(0x101, true, 1, &second));

        let mut demuxer = Demuxer::new(Cursor::new(stream), ReaderConfig::default());
        assert!(matches!(demuxer.next_unit().unwrap().unwrap(), DemuxedUnit::Pat(_)));
        assert!(matches!(demuxer.next_unit().unwrap().unwrap(), DemuxedUnit::Pmt(_)));

        let first_unit = demuxer.next_unit().unwrap().unwrap();
        match first_unit {
            DemuxedUnit::Pes { packet, .. } => match packet.body {
                crate::pes::PesBody::Normal { data, .. } => assert_eq!(data.len(), 100),
                _ => panic!(),
            },
            _ => panic!("expected PES"),
        }

        let second_unit = demuxer.next_unit().unwrap().unwrap();
        match second_unit {
            DemuxedUnit::Pes { packet, .. } => match packet.body {
                crate::pes::PesBody::Normal { data, .. } => assert_eq!(data.len(), 50),
                _ => panic!(),
            },
            _ => panic!("expected PES"),
        }

        assert!(demuxer.next_unit().unwrap().is_none());
    }
}
