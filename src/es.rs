//! Elementary Stream unit scanner (C10).
//!
//! Finds `00 00 01 xx` start codes over either a bare byte source or the concatenated payload
//! bytes of the PES packets belonging to one PID, emitting whole ES units with accurate source
//! offsets. The two input shapes are unified by [`EsScanner::feed`]: a bare file feeds itself in
//! one (or a few) chunks, while a PES-backed scan feeds one chunk per completed PES packet,
//! tagging each with whether that PES packet's optional header carried a PTS.

use crate::error::Result;
use crate::offset::Offset;
use std::collections::VecDeque;
use std::io::Read;

/// One elementary-stream unit: the bytes from one `00 00 01 xx` start code up to (but not
/// including) the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsUnit {
    /// The byte immediately following the `00 00 01` prefix (e.g. a NAL unit type/ref_idc byte
    /// for H.264, or a picture/slice start code for H.262).
    pub start_code: u8,
    /// Complete unit bytes, including the `00 00 01 xx` prefix.
    pub data: Vec<u8>,
    /// Offset of the unit's first byte (the first `0x00` of its start code).
    pub start_offset: Offset,
    /// Whether any PES packet this unit's bytes were drawn from declared a PTS in its optional
    /// header (always `false` for a bare, non-PES-backed scan).
    pub pes_had_pts: bool,
}

struct OpenUnit {
    start_code: u8,
    data: Vec<u8>,
    start_offset: Offset,
    pes_had_pts: bool,
}

impl OpenUnit {
    fn push(&mut self, byte: u8) {
        self.data.push(byte);
    }

    fn finish(self) -> EsUnit {
        EsUnit {
            start_code: self.start_code,
            data: self.data,
            start_offset: self.start_offset,
            pes_had_pts: self.pes_had_pts,
        }
    }
}

/// Byte-oriented `00 00 01` start-code scanner.
///
/// Feed it bytes in any chunking via [`EsScanner::feed`]; completed units are returned
/// immediately and any trailing partial unit is flushed by [`EsScanner::finish`]. A 2-byte
/// "pending zero" buffer (never more, since three zero bytes in a row only ever leaves the last
/// two live as a possible prefix) lets start codes split across feed calls still be found, and
/// each pending byte remembers its own origin offset/PTS tag so a start code that happens to
/// straddle a chunk boundary is still timestamped precisely.
pub struct EsScanner {
    pending_zeros: Vec<(Offset, bool)>,
    need_id_byte: Option<(Offset, bool)>,
    open: Option<OpenUnit>,
    ready: VecDeque<EsUnit>,
}

impl Default for EsScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl EsScanner {
    /// Construct an empty scanner.
    pub fn new() -> Self {
        Self {
            pending_zeros: Vec::with_capacity(2),
            need_id_byte: None,
            open: None,
            ready: VecDeque::new(),
        }
    }

    fn flush_zero(&mut self, had_pts: bool) {
        if let Some(open) = self.open.as_mut() {
            open.push(0x00);
            open.pes_had_pts |= had_pts;
        }
    }

    fn flush_byte(&mut self, byte: u8, had_pts: bool) {
        if let Some(open) = self.open.as_mut() {
            open.push(byte);
            open.pes_had_pts |= had_pts;
        }
    }

    /// Feed one chunk of bytes, whose first byte lives at `chunk_offset`. `had_pts` tags whether
    /// the PES packet this chunk was drawn from (if any) declared a PTS; pass `false` for a bare
    /// file scan.
    pub fn feed(&mut self, bytes: &[u8], chunk_offset: Offset, had_pts: bool) {
        for (i, &b) in bytes.iter().enumerate() {
            let offset = Offset::in_pes(chunk_offset.file_offset, chunk_offset.packet_offset + i as u64);

            if let Some((start_offset, prefix_had_pts)) = self.need_id_byte.take() {
                if let Some(prev) = self.open.take() {
                    self.ready.push_back(prev.finish());
                }
                self.open = Some(OpenUnit {
                    start_code: b,
                    data: vec![0x00, 0x00, 0x01, b],
                    start_offset,
                    pes_had_pts: prefix_had_pts || had_pts,
                });
                continue;
            }

            if b == 0x00 {
                if self.pending_zeros.len() == 2 {
                    let (_, zpts) = self.pending_zeros.remove(0);
                    self.flush_zero(zpts);
                }
                self.pending_zeros.push((offset, had_pts));
            } else if b == 0x01 && self.pending_zeros.len() == 2 {
                let (_, newer_pts) = self.pending_zeros.pop().unwrap();
                let (start_offset, older_pts) = self.pending_zeros.pop().unwrap();
                self.need_id_byte = Some((start_offset, older_pts || newer_pts));
            } else {
                for (_, zpts) in self.pending_zeros.drain(..).collect::<Vec<_>>() {
                    self.flush_zero(zpts);
                }
                self.flush_byte(b, had_pts);
            }
        }
    }

    /// Retrieve the next completed unit, if any are ready.
    pub fn next_ready(&mut self) -> Option<EsUnit> {
        self.ready.pop_front()
    }

    /// Signal end of input: flush any still-pending zero bytes into the open unit as literal
    /// data, then finalize it. Call this once after the final [`EsScanner::feed`].
    pub fn finish(&mut self) {
        for (_, zpts) in self.pending_zeros.drain(..).collect::<Vec<_>>() {
            self.flush_zero(zpts);
        }
        if let Some(open) = self.open.take() {
            self.ready.push_back(open.finish());
        }
    }
}

/// Scan a complete in-memory buffer (a bare ES file read fully into memory) into its units.
pub fn scan_bytes(bytes: &[u8]) -> Vec<EsUnit> {
    let mut scanner = EsScanner::new();
    scanner.feed(bytes, Offset::default(), false);
    scanner.finish();
    let mut out = Vec::new();
    while let Some(unit) = scanner.next_ready() {
        out.push(unit);
    }
    out
}

/// Scan a bare byte source (C1), reading in fixed-size chunks.
pub fn scan_reader<R: Read>(mut source: R) -> Result<Vec<EsUnit>> {
    let mut scanner = EsScanner::new();
    let mut buf = [0u8; 8192];
    let mut pos = 0u64;
    let mut out = Vec::new();
    loop {
        let n = source.read(&mut buf)?;
        if n == 0 {
            break;
        }
        scanner.feed(&buf[..n], Offset::bare(pos), false);
        pos += n as u64;
        while let Some(unit) = scanner.next_ready() {
            out.push(unit);
        }
    }
    scanner.finish();
    while let Some(unit) = scanner.next_ready() {
        out.push(unit);
    }
    Ok(out)
}
