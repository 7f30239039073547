//! PCR timing buffer: attaches an interpolated 27 MHz timestamp to every TS packet, not only the
//! ones that carry a PCR.
//!
//! Wraps a [`TsFramer`] with a read-ahead ring (bounded by
//! [`crate::config::ReaderConfig::pcr_lookahead_packets`]) and linearly interpolates between
//! successive PCR-bearing packets on a configured PID.

use crate::bits::{PcrTimestamp, PCR_MODULUS};
use crate::config::ReaderConfig;
use crate::error::Result;
use crate::offset::Offset;
use crate::ts::{AdaptationField, PacketHeader, TsFramer};
use std::collections::VecDeque;
use std::io::{Read, Seek};

/// A TS packet with an attached, possibly-interpolated, PCR.
#[derive(Debug, Clone)]
pub struct TimedPacket {
    /// Stream position this packet was read from.
    pub offset: Offset,
    /// Link-layer header.
    pub header: PacketHeader,
    /// Optional adaptation field.
    pub adaptation_field: Option<AdaptationField>,
    /// Payload bytes, if any (owned, unlike [`crate::ts::TsPacket`]'s borrowed slice, since this
    /// packet has been sitting in the timing ring rather than delivered straight off the framer).
    pub payload: Option<Vec<u8>>,
    /// The 27 MHz timestamp assigned to this packet: exact if this packet itself carried a PCR
    /// on the configured PCR PID, linearly interpolated otherwise.
    pub pcr: PcrTimestamp,
}

impl TimedPacket {
    /// 13-bit Packet Identifier.
    pub fn pid(&self) -> u16 {
        self.header.pid()
    }
}

struct BufferedPacket {
    index: u64,
    offset: Offset,
    header: PacketHeader,
    adaptation_field: Option<AdaptationField>,
    payload: Option<Vec<u8>>,
}

/// Reads ahead on a TS byte source to assign every packet an interpolated PCR.
pub struct PcrBuffer<R> {
    framer: TsFramer<R>,
    cfg: ReaderConfig,
    pcr_pid: u16,
    capacity: usize,
    ring: VecDeque<BufferedPacket>,
    next_index: u64,
    prev_pcr: Option<PcrTimestamp>,
    prev_pcr_posn: u64,
    end_pcr: Option<PcrTimestamp>,
    end_pcr_posn: Option<u64>,
    ticks_per_packet: i64,
    eof: bool,
}

impl<R: Read + Seek> PcrBuffer<R> {
    /// Wrap `source`, interpolating PCRs carried on `pcr_pid`.
    pub fn new(source: R, cfg: ReaderConfig, pcr_pid: u16) -> Self {
        let capacity = cfg.pcr_lookahead_packets.max(1);
        Self {
            framer: TsFramer::new(source),
            cfg,
            pcr_pid,
            capacity,
            ring: VecDeque::new(),
            next_index: 0,
            prev_pcr: None,
            prev_pcr_posn: 0,
            end_pcr: None,
            end_pcr_posn: None,
            ticks_per_packet: 0,
            eof: false,
        }
    }

    /// Read ahead until the next PCR on `pcr_pid` is found, EOF is hit, or the ring fills to
    /// its configured capacity.
    fn refill(&mut self) -> Result<()> {
        while !self.eof && self.end_pcr_posn.is_none() && self.ring.len() < self.capacity {
            let packet = match self.framer.read_next(&self.cfg)? {
                Some(packet) => packet,
                None => {
                    self.eof = true;
                    break;
                }
            };
            let index = self.next_index;
            self.next_index += 1;
            let pcr_here = if packet.pid() == self.pcr_pid {
                packet.adaptation_field.as_ref().and_then(|af| af.pcr)
            } else {
                None
            };
            self.ring.push_back(BufferedPacket {
                index,
                offset: packet.offset,
                header: packet.header,
                adaptation_field: packet.adaptation_field,
                payload: packet.payload.map(|p| p.to_vec()),
            });

            if let Some(pcr) = pcr_here {
                match self.prev_pcr {
                    None => {
                        self.prev_pcr = Some(pcr);
                        self.prev_pcr_posn = index;
                    }
                    Some(prev) => {
                        let span = index - self.prev_pcr_posn;
                        self.ticks_per_packet = if span == 0 {
                            0
                        } else {
                            pcr.wrapping_diff(&prev) / span as i64
                        };
                        self.end_pcr = Some(pcr);
                        self.end_pcr_posn = Some(index);
                    }
                }
            }
        }
        Ok(())
    }

    fn pcr_for(&self, raw: &BufferedPacket) -> PcrTimestamp {
        if raw.header.pid() == self.pcr_pid {
            if let Some(pcr) = raw.adaptation_field.as_ref().and_then(|af| af.pcr) {
                return pcr;
            }
        }
        match self.prev_pcr {
            Some(prev) => {
                let delta = raw.index as i128 - self.prev_pcr_posn as i128;
                let ticks = (prev.ticks() as i128 + self.ticks_per_packet as i128 * delta)
                    .rem_euclid(PCR_MODULUS as i128) as u64;
                PcrTimestamp::from_ticks(ticks)
            }
            None => PcrTimestamp::default(),
        }
    }

    /// Pull the next packet in source order, with its PCR assigned. Returns `Ok(None)` once the
    /// source and the ring are both exhausted.
    pub fn next_timed_packet(&mut self) -> Result<Option<TimedPacket>> {
        self.refill()?;
        let raw = match self.ring.pop_front() {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let pcr = self.pcr_for(&raw);
        // Roll the interpolation window forward right as its far edge is delivered, rather than
        // waiting for a packet beyond it to show up in the ring: that packet may not have been
        // read yet, and refill() only looks for a new window once this one is cleared.
        if self.end_pcr_posn == Some(raw.index) {
            self.prev_pcr = self.end_pcr.take();
            self.prev_pcr_posn = self.end_pcr_posn.take().unwrap();
        }
        Ok(Some(TimedPacket {
            offset: raw.offset,
            header: raw.header,
            adaptation_field: raw.adaptation_field,
            payload: raw.payload,
            pcr,
        }))
    }
}
