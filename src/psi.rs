//! PSI section assembly and the PAT/PMT data model.
//!
//! Bitfield layouts for the PSI header, table syntax, PAT entries, PMT header, and elementary
//! stream info follow the wire format field-for-field; the assembler reconstitutes sections that
//! span TS packets and the PAT/PMT types define set-equal comparison over their entries.

use crate::crc::{crc32_mpeg2, verify_trailing_crc};
use crate::error::{Error, ErrorDetails, Result, UnsupportedKind};
use crate::offset::Offset;
use crate::read_bitfield;
use crate::slice_reader::SliceReader;
use log::warn;
use modular_bitfield_msb::prelude::*;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::convert::TryInto;

/// `table_id` of a Program Association Table section.
pub const PAT_TABLE_ID: u8 = 0x00;
/// `table_id` of a Program Map Table section.
pub const PMT_TABLE_ID: u8 = 0x02;
/// PID carrying the PAT.
pub const PAT_PID: u16 = 0x0000;

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PsiHeader {
    table_id: B8,
    section_syntax_indicator: bool,
    private_bit: bool,
    reserved_bits: B2,
    #[skip]
    unused_bits: B2,
    section_length: B10,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PsiTableSyntax {
    table_id_extension: B16,
    reserved_bits: B2,
    version: B5,
    current_next_indicator: bool,
    section_number: B8,
    last_section_number: B8,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PatEntryBits {
    program_num: B16,
    reserved: B3,
    program_map_pid: B13,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PmtHeaderBits {
    reserved: B3,
    pcr_pid: B13,
    reserved2: B4,
    #[skip]
    unused_bits: B2,
    program_info_length: B10,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct ElementaryStreamInfoHeaderBits {
    stream_type: B8,
    reserved: B3,
    elementary_pid: B13,
    reserved2: B4,
    #[skip]
    unused_bits: B2,
    es_info_length: B10,
}

/// An opaque, tag-prefixed descriptor. Data is retained byte-for-byte and never interpreted,
/// including non-standard-length descriptors such as an HEVC descriptor that doesn't match the
/// expected 6 or 9 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Descriptor tag byte.
    pub tag: u8,
    /// Raw descriptor payload.
    pub data: SmallVec<[u8; 8]>,
}

impl Descriptor {
    /// Parse one `(tag, length, data)` descriptor from a reader.
    pub fn parse(reader: &mut SliceReader) -> Result<Self> {
        let tag = reader.read_u8()?;
        let len = reader.read_u8()? as usize;
        let mut data = SmallVec::<[u8; 8]>::new();
        data.extend_from_slice(reader.read(len)?);
        Ok(Self { tag, data })
    }

    /// Parse every descriptor in `bytes` (a complete, non-nested descriptor loop).
    pub fn parse_all(bytes: &[u8]) -> Result<Vec<Descriptor>> {
        let mut reader = SliceReader::new(bytes, Offset::default());
        let mut out = Vec::new();
        while reader.remaining_len() > 0 {
            out.push(Descriptor::parse(&mut reader)?);
        }
        Ok(out)
    }
}

/// One `(program_number, pmt_pid)` entry from a PAT.
///
/// `program_number == 0` denotes the network PID, which is surfaced separately via
/// [`Pat::network_pid`] rather than through [`Pat::programs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatEntry {
    /// Program number.
    pub program_number: u16,
    /// PID of the associated PMT.
    pub pmt_pid: u16,
}

/// A fully parsed Program Association Table.
#[derive(Debug, Clone)]
pub struct Pat {
    /// PID of the Network Information Table, if a `program_number == 0` entry was present.
    pub network_pid: Option<u16>,
    programs: Vec<PatEntry>,
}

impl Pat {
    /// Parse a complete PAT section body (the bytes from the first entry through the last,
    /// i.e. the table-syntax-to-CRC span with the 5-byte table syntax already stripped).
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(body, Offset::default());
        let mut network_pid = None;
        let mut programs = Vec::with_capacity(body.len() / 4);
        while reader.remaining_len() >= 4 {
            let bits: PatEntryBits = read_bitfield!(reader, PatEntryBits);
            if bits.program_num() == 0 {
                network_pid = Some(bits.program_map_pid());
            } else {
                programs.push(PatEntry {
                    program_number: bits.program_num(),
                    pmt_pid: bits.program_map_pid(),
                });
            }
        }
        Ok(Self { network_pid, programs })
    }

    /// The programs listed, in the order the PAT declared them (network PID excluded).
    pub fn programs(&self) -> &[PatEntry] {
        &self.programs
    }
}

impl PartialEq for Pat {
    fn eq(&self, other: &Self) -> bool {
        self.network_pid == other.network_pid
            && self.programs.iter().collect::<HashSet<_>>()
                == other.programs.iter().collect::<HashSet<_>>()
    }
}
impl Eq for Pat {}

/// One elementary stream entry from a PMT.
#[derive(Debug, Clone)]
pub struct PmtStreamInfo {
    /// Stream type byte (e.g. 0x02 H.262, 0x1B H.264, 0x42 AVS).
    pub stream_type: u8,
    /// Elementary stream PID.
    pub elementary_pid: u16,
    /// Raw `es_info` descriptor-loop bytes, retained byte-for-byte.
    pub es_info: Vec<u8>,
}

impl PmtStreamInfo {
    /// Parse `es_info` into a descriptor list. Parsed on demand; equality compares raw bytes.
    pub fn descriptors(&self) -> Result<Vec<Descriptor>> {
        Descriptor::parse_all(&self.es_info)
    }
}

impl PartialEq for PmtStreamInfo {
    fn eq(&self, other: &Self) -> bool {
        self.elementary_pid == other.elementary_pid && self.es_info == other.es_info
    }
}
impl Eq for PmtStreamInfo {}

/// A fully parsed Program Map Table.
///
/// Equality compares all listed scalar fields, `program_info` byte-for-byte, and `streams` as a
/// set keyed by `elementary_pid` with byte-equal `es_info`.
#[derive(Debug, Clone)]
pub struct Pmt {
    /// Program this PMT describes.
    pub program_number: u16,
    /// 5-bit version number; increments when the PMT's contents change.
    pub version_number: u8,
    /// Whether this section is currently applicable.
    pub current_next_indicator: bool,
    /// PID carrying this program's PCR, or `0x1FFF` if unset.
    pub pcr_pid: u16,
    /// Raw `program_info` descriptor-loop bytes, retained byte-for-byte.
    pub program_info: Vec<u8>,
    /// Elementary streams in this program.
    pub streams: Vec<PmtStreamInfo>,
}

impl Pmt {
    fn parse_body(
        table_id_extension: u16,
        version: u8,
        current_next_indicator: bool,
        body: &[u8],
    ) -> Result<Self> {
        let mut reader = SliceReader::new(body, Offset::default());
        let header: PmtHeaderBits = read_bitfield!(reader, PmtHeaderBits);
        let program_info = reader.read(header.program_info_length() as usize)?.to_vec();

        let mut streams = Vec::new();
        while reader.remaining_len() > 0 {
            if reader.remaining_len() < 5 {
                return Err(reader.make_error(ErrorDetails::BadPsiHeader));
            }
            let es_header: ElementaryStreamInfoHeaderBits =
                read_bitfield!(reader, ElementaryStreamInfoHeaderBits);
            let es_info = reader.read(es_header.es_info_length() as usize)?.to_vec();
            streams.push(PmtStreamInfo {
                stream_type: es_header.stream_type(),
                elementary_pid: es_header.elementary_pid(),
                es_info,
            });
        }

        Ok(Self {
            program_number: table_id_extension,
            version_number: version,
            current_next_indicator,
            pcr_pid: header.pcr_pid(),
            program_info,
            streams,
        })
    }

    /// An empty PMT, returned when a section claims a `table_id` other than [`PMT_TABLE_ID`]
    /// (other values are user-private or forbidden; log and return an empty PMT).
    fn empty() -> Self {
        Self {
            program_number: 0,
            version_number: 0,
            current_next_indicator: false,
            pcr_pid: 0x1fff,
            program_info: Vec::new(),
            streams: Vec::new(),
        }
    }
}

impl PartialEq for Pmt {
    fn eq(&self, other: &Self) -> bool {
        self.program_number == other.program_number
            && self.version_number == other.version_number
            && self.current_next_indicator == other.current_next_indicator
            && self.pcr_pid == other.pcr_pid
            && self.program_info == other.program_info
            && self.streams.len() == other.streams.len()
            && self.streams.iter().all(|s| {
                other
                    .streams
                    .iter()
                    .any(|o| o.elementary_pid == s.elementary_pid && o.es_info == s.es_info)
            })
    }
}
impl Eq for Pmt {}

/// A reassembled PSI section: complete bytes from `table_id` through the trailing CRC.
#[derive(Debug, Clone)]
pub struct RawSection {
    /// PID the section was read from.
    pub pid: u16,
    /// Offset of the first byte of the section (the `table_id` byte).
    pub offset: Offset,
    /// `table_id` through trailing CRC, inclusive.
    pub bytes: Vec<u8>,
}

impl RawSection {
    fn header(&self) -> PsiHeader {
        PsiHeader::from_bytes(self.bytes[0..3].try_into().unwrap())
    }

    /// Whether the section's own trailing CRC-32/MPEG-2 checks out.
    pub fn crc_valid(&self) -> bool {
        verify_trailing_crc(&self.bytes)
    }

    /// Parse this section as a PAT. Does not check `table_id`; callers route by PID.
    pub fn as_pat(&self) -> Result<Pat> {
        let header = self.header();
        let body_start = if header.section_syntax_indicator() { 8 } else { 3 };
        if self.bytes.len() < body_start + 4 {
            return Err(Error::new(self.offset, ErrorDetails::BadPsiHeader));
        }
        let body_end = self.bytes.len() - 4;
        Pat::parse(&self.bytes[body_start..body_end])
    }

    /// Parse this section as a PMT, returning an empty PMT for any `table_id` other than
    /// [`PMT_TABLE_ID`].
    pub fn as_pmt(&self) -> Result<Pmt> {
        let header = self.header();
        if header.table_id() != PMT_TABLE_ID {
            warn!("section with table_id {:#x} is not a PMT", header.table_id());
            return Ok(Pmt::empty());
        }
        if !header.section_syntax_indicator() || self.bytes.len() < 12 {
            return Err(Error::new(self.offset, ErrorDetails::BadPsiHeader));
        }
        let syntax = PsiTableSyntax::from_bytes(self.bytes[3..8].try_into().unwrap());
        let body_end = self.bytes.len() - 4;
        Pmt::parse_body(
            syntax.table_id_extension(),
            syntax.version(),
            syntax.current_next_indicator(),
            &self.bytes[8..body_end],
        )
    }
}

struct SectionState {
    buf: Vec<u8>,
    expected_len: usize,
    offset: Offset,
}

/// Reassembles PAT/PMT sections that may span multiple TS packets (C6).
///
/// One assembler instance tracks state for every PID it is asked about; callers register PMT
/// PIDs (learned from a parsed PAT) via [`PsiAssembler::watch_pmt_pid`].
#[derive(Default)]
pub struct PsiAssembler {
    states: HashMap<u16, SectionState>,
    pmt_pids: HashSet<u16>,
}

impl PsiAssembler {
    /// Construct an assembler watching only the PAT PID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or continue) watching `pid` as a PMT section PID.
    pub fn watch_pmt_pid(&mut self, pid: u16) {
        self.pmt_pids.insert(pid);
    }

    /// Stop watching `pid` as a PMT section PID (e.g. after a PAT update drops a program).
    pub fn unwatch_pmt_pid(&mut self, pid: u16) {
        self.pmt_pids.remove(&pid);
        self.states.remove(&pid);
    }

    fn is_watched(&self, pid: u16) -> bool {
        pid == PAT_PID || self.pmt_pids.contains(&pid)
    }

    /// Feed one TS payload belonging to a watched PID. Returns a complete [`RawSection`] once
    /// enough packets have arrived to satisfy the section's declared length.
    pub fn feed(
        &mut self,
        pid: u16,
        pusi: bool,
        payload: &[u8],
        offset: Offset,
    ) -> Result<Option<RawSection>> {
        if !self.is_watched(pid) {
            return Ok(None);
        }

        if pusi {
            if payload.is_empty() {
                warn!("PID {:#06x}: short read of PSI pointer field", pid);
                return Ok(None);
            }
            let pointer = payload[0] as usize;
            if self.states.remove(&pid).is_some() {
                warn!("PID {:#06x}: discarding incomplete PSI section on new start", pid);
            }
            let data = payload.get(1 + pointer..).unwrap_or(&[]);
            if data.len() < 3 {
                warn!("PID {:#06x}: short read of PSI section header", pid);
                return Ok(None);
            }
            let header = PsiHeader::from_bytes(data[0..3].try_into().unwrap());
            let expected_len = header.section_length() as usize + 3;
            let mut buf = Vec::with_capacity(expected_len);
            let take = expected_len.min(data.len());
            buf.extend_from_slice(&data[..take]);
            if buf.len() >= expected_len {
                return Ok(Some(RawSection { pid, offset, bytes: buf }));
            }
            self.states.insert(pid, SectionState { buf, expected_len, offset });
            Ok(None)
        } else {
            match self.states.get_mut(&pid) {
                None => {
                    warn!("PID {:#06x}: PSI continuation with no section in progress", pid);
                    Ok(None)
                }
                Some(state) => {
                    let remaining = state.expected_len - state.buf.len();
                    let take = remaining.min(payload.len());
                    state.buf.extend_from_slice(&payload[..take]);
                    if state.buf.len() >= state.expected_len {
                        let state = self.states.remove(&pid).unwrap();
                        Ok(Some(RawSection { pid, offset: state.offset, bytes: state.buf }))
                    } else {
                        Ok(None)
                    }
                }
            }
        }
    }
}

/// Single-TS-packet convenience path for reading a PMT's elementary-stream list.
///
/// This path explicitly refuses a PMT whose declared `section_length` does not fit entirely
/// within the one payload it is given, returning [`UnsupportedKind::MultiPacketPmt`]. Callers
/// that want multi-packet PMT support must drive [`PsiAssembler`] instead.
pub fn extract_stream_list_from_pmt(payload: &[u8]) -> Result<Vec<PmtStreamInfo>> {
    if payload.is_empty() {
        return Err(Error::new(Offset::default(), ErrorDetails::BadPsiHeader));
    }
    let pointer = payload[0] as usize;
    let data = payload
        .get(1 + pointer..)
        .ok_or_else(|| Error::new(Offset::default(), ErrorDetails::BadPsiHeader))?;
    if data.len() < 3 {
        return Err(Error::new(Offset::default(), ErrorDetails::BadPsiHeader));
    }
    let header = PsiHeader::from_bytes(data[0..3].try_into().unwrap());
    let expected_len = header.section_length() as usize + 3;
    if expected_len > data.len() {
        return Err(Error::new(
            Offset::default(),
            ErrorDetails::Unsupported(UnsupportedKind::MultiPacketPmt),
        ));
    }
    let section = RawSection { pid: 0, offset: Offset::default(), bytes: data[..expected_len].to_vec() };
    Ok(section.as_pmt()?.streams)
}

/// Compute the trailing CRC-32/MPEG-2 for a section body (everything up to but excluding the
/// 4-byte CRC), as used by the writer.
pub fn section_crc(body_without_crc: &[u8]) -> u32 {
    crc32_mpeg2(body_without_crc)
}

/// Maximum `section_length` the writer will emit for a PMT.
pub const MAX_PMT_SECTION_LENGTH: u16 = 1021;

/// Encode a complete single-section PAT, including its trailing CRC-32/MPEG-2.
///
/// `version_number` and `current_next_indicator` are fixed at `0`/`true`.
pub fn encode_pat_section(transport_stream_id: u16, programs: &[PatEntry]) -> Vec<u8> {
    let mut body = PsiTableSyntax::new()
        .with_table_id_extension(transport_stream_id)
        .with_reserved_bits(0b11)
        .with_version(0)
        .with_current_next_indicator(true)
        .with_section_number(0)
        .with_last_section_number(0)
        .into_bytes()
        .to_vec();

    for program in programs {
        let entry = PatEntryBits::new()
            .with_program_num(program.program_number)
            .with_reserved(0b111)
            .with_program_map_pid(program.pmt_pid);
        body.extend_from_slice(&entry.into_bytes());
    }

    let section_length = (body.len() + 4) as u16;
    let header = PsiHeader::new()
        .with_table_id(PAT_TABLE_ID)
        .with_section_syntax_indicator(true)
        .with_reserved_bits(0b11)
        .with_section_length(section_length);

    let mut section = header.into_bytes().to_vec();
    section.extend_from_slice(&body);
    let crc = section_crc(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

/// Encode a complete single-section PMT, including its trailing CRC-32/MPEG-2.
///
/// Returns [`ErrorDetails::Unsupported`]`(`[`UnsupportedKind::MultiPacketPmt`]`)` if the streams
/// and descriptors given would not fit in one section (`section_length` > 1021).
pub fn encode_pmt_section(
    program_number: u16,
    version_number: u8,
    pcr_pid: u16,
    program_info: &[u8],
    streams: &[(u8, u16, &[u8])],
) -> Result<Vec<u8>> {
    let mut body = PmtHeaderBits::new()
        .with_reserved(0b111)
        .with_pcr_pid(pcr_pid)
        .with_reserved2(0b1111)
        .with_program_info_length(program_info.len() as u16)
        .into_bytes()
        .to_vec();
    body.extend_from_slice(program_info);

    for &(stream_type, elementary_pid, es_info) in streams {
        let es_header = ElementaryStreamInfoHeaderBits::new()
            .with_stream_type(stream_type)
            .with_reserved(0b111)
            .with_elementary_pid(elementary_pid)
            .with_reserved2(0b1111)
            .with_es_info_length(es_info.len() as u16);
        body.extend_from_slice(&es_header.into_bytes());
        body.extend_from_slice(es_info);
    }

    let syntax = PsiTableSyntax::new()
        .with_table_id_extension(program_number)
        .with_reserved_bits(0b11)
        .with_version(version_number)
        .with_current_next_indicator(true)
        .with_section_number(0)
        .with_last_section_number(0);

    let section_length = (syntax.into_bytes().len() + body.len() + 4) as u16;
    if section_length > MAX_PMT_SECTION_LENGTH {
        return Err(Error::new(
            Offset::default(),
            ErrorDetails::Unsupported(UnsupportedKind::MultiPacketPmt),
        ));
    }

    let header = PsiHeader::new()
        .with_table_id(PMT_TABLE_ID)
        .with_section_syntax_indicator(true)
        .with_reserved_bits(0b11)
        .with_section_length(section_length);

    let mut section = header.into_bytes().to_vec();
    section.extend_from_slice(&syntax.into_bytes());
    section.extend_from_slice(&body);
    let crc = section_crc(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    Ok(section)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat_section_bytes() -> Vec<u8> {
        let mut section = vec![
            0x00, 0xb0, 0x0d, 0x00, 0x01, 0xc1, 0x00, 0x00, 0x00, 0x01, 0xe1, 0x00,
        ];
        let crc = section_crc(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    #[test]
    fn single_packet_pat_assembles() {
        let section = pat_section_bytes();
        let mut payload = vec![0x00u8];
        payload.extend_from_slice(&section);
        let mut asm = PsiAssembler::new();
        let raw = asm
            .feed(PAT_PID, true, &payload, Offset::default())
            .unwrap()
            .expect("complete in one packet");
        assert!(raw.crc_valid());
        let pat = raw.as_pat().unwrap();
        assert_eq!(pat.programs(), &[PatEntry { program_number: 1, pmt_pid: 0x0100 }]);
    }

    fn build_pmt_section(streams: &[(u16, u8)]) -> Vec<u8> {
        let mut stream_records = Vec::new();
        for &(pid, stype) in streams {
            let bits = ElementaryStreamInfoHeaderBits::new()
                .with_stream_type(stype)
                .with_elementary_pid(pid)
                .with_es_info_length(0);
            stream_records.extend_from_slice(&bits.into_bytes());
        }
        let pmt_header = PmtHeaderBits::new().with_pcr_pid(0x101).with_program_info_length(0);
        let mut body = pmt_header.into_bytes().to_vec();
        body.extend_from_slice(&stream_records);

        let syntax = PsiTableSyntax::new()
            .with_table_id_extension(1)
            .with_version(0)
            .with_current_next_indicator(true)
            .with_section_number(0)
            .with_last_section_number(0);
        let section_length = (5 + body.len() + 4) as u16;
        let header = PsiHeader::new()
            .with_table_id(PMT_TABLE_ID)
            .with_section_syntax_indicator(true)
            .with_reserved_bits(0b11)
            .with_section_length(section_length);

        let mut section = header.into_bytes().to_vec();
        section.extend_from_slice(&syntax.into_bytes());
        section.extend_from_slice(&body);
        let crc = section_crc(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    #[test]
    fn pmt_split_across_two_packets_reassembles() {
        let section = build_pmt_section(&[(0x101, 0x1b), (0x102, 0x0f)]);

        let mut first_payload = vec![0x00u8];
        first_payload.extend_from_slice(&section[..10]);
        let second_payload = section[10..].to_vec();

        let mut asm = PsiAssembler::new();
        asm.watch_pmt_pid(0x1000);
        assert!(asm
            .feed(0x1000, true, &first_payload, Offset::default())
            .unwrap()
            .is_none());
        let raw = asm
            .feed(0x1000, false, &second_payload, Offset::default())
            .unwrap()
            .expect("completes on second packet");
        assert!(raw.crc_valid());
        let pmt = raw.as_pmt().unwrap();
        assert_eq!(pmt.program_number, 1);
        assert_eq!(pmt.pcr_pid, 0x101);
        assert_eq!(pmt.streams.len(), 2);
        assert_eq!(pmt.streams[0].elementary_pid, 0x101);
        assert_eq!(pmt.streams[1].elementary_pid, 0x102);
    }

    #[test]
    fn pmt_equality_is_set_like_and_byte_exact() {
        let a = Pmt {
            program_number: 1,
            version_number: 0,
            current_next_indicator: true,
            pcr_pid: 0x100,
            program_info: vec![],
            streams: vec![
                PmtStreamInfo { stream_type: 0x1b, elementary_pid: 0x101, es_info: vec![] },
                PmtStreamInfo { stream_type: 0x0f, elementary_pid: 0x102, es_info: vec![1] },
            ],
        };
        let mut b = a.clone();
        b.streams.reverse();
        assert_eq!(a, b);

        let mut c = a.clone();
        c.streams[1].es_info = vec![2];
        assert_ne!(a, c);
    }

    #[test]
    fn single_packet_extractor_rejects_multi_packet_pmt() {
        let section = build_pmt_section(&[(0x101, 0x1b)]);
        let mut payload = vec![0x00u8];
        // Truncate so the declared section does not fit in this one payload.
        payload.extend_from_slice(&section[..section.len() - 3]);

        let err = extract_stream_list_from_pmt(&payload).unwrap_err();
        assert!(matches!(
            err.details,
            ErrorDetails::Unsupported(UnsupportedKind::MultiPacketPmt)
        ));
    }

    #[test]
    fn encoded_pat_section_parses_back_to_the_same_programs() {
        let programs = [
            PatEntry { program_number: 1, pmt_pid: 0x0100 },
            PatEntry { program_number: 2, pmt_pid: 0x0200 },
        ];
        let section_bytes = encode_pat_section(0x1234, &programs);
        let section = RawSection { pid: PAT_PID, offset: Offset::default(), bytes: section_bytes };
        assert!(section.crc_valid());
        let pat = section.as_pat().unwrap();
        assert_eq!(pat.programs(), &programs);
    }

    #[test]
    fn encoded_pmt_section_parses_back_to_the_same_streams() {
        let streams = [(0x1bu8, 0x101u16, &[][..]), (0x0fu8, 0x102u16, &[0xaa, 0xbb][..])];
        let section_bytes = encode_pmt_section(7, 3, 0x101, &[], &streams).unwrap();
        let section = RawSection { pid: 0x1000, offset: Offset::default(), bytes: section_bytes };
        assert!(section.crc_valid());
        let pmt = section.as_pmt().unwrap();
        assert_eq!(pmt.program_number, 7);
        assert_eq!(pmt.version_number, 3);
        assert_eq!(pmt.pcr_pid, 0x101);
        assert_eq!(pmt.streams.len(), 2);
        assert_eq!(pmt.streams[1].es_info, vec![0xaa, 0xbb]);
    }

    #[test]
    fn encode_pmt_section_rejects_overlong_section() {
        let es_info = vec![0u8; 200];
        let streams: Vec<(u8, u16, &[u8])> =
            (0..10).map(|i| (0x1b, 0x100 + i, es_info.as_slice())).collect();
        let err = encode_pmt_section(1, 0, 0x100, &[], &streams).unwrap_err();
        assert!(matches!(
            err.details,
            ErrorDetails::Unsupported(UnsupportedKind::MultiPacketPmt)
        ));
    }

    #[test]
    fn single_packet_extractor_accepts_complete_pmt() {
        let section = build_pmt_section(&[(0x101, 0x1b), (0x102, 0x0f)]);
        let mut payload = vec![0x00u8];
        payload.extend_from_slice(&section);
        let streams = extract_stream_list_from_pmt(&payload).unwrap();
        assert_eq!(streams.len(), 2);
    }
}
