//! Runtime configuration knobs for the reader and writer.
//!
//! These are plain fields on a `Default`-able config struct passed into the reader/writer at
//! construction time, rather than compile-time flags or module-level globals.

/// What to do when a bounded PES packet accumulates more bytes than its declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlongPesPolicy {
    /// Log a warning and truncate to the declared length (the default).
    WarnAndTruncate,
    /// Treat the overrun as a fatal framing error.
    Error,
}

impl Default for OverlongPesPolicy {
    fn default() -> Self {
        OverlongPesPolicy::WarnAndTruncate
    }
}

/// Configuration for [`crate::demux::Demuxer`] and the lower-level framer/PSI/PES components.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Whether reserved-bit violations (e.g. a non-0b11 reserved field) are logged.
    ///
    /// The source gates this behind a single global flag; here it is per-reader.
    pub warn_on_reserved_bits: bool,
    /// Policy applied when a bounded PES packet overruns its declared length.
    pub overlong_pes_policy: OverlongPesPolicy,
    /// Hard cap, in bytes, on how large an unbounded (length-0) PES packet may grow before the
    /// reader finalizes it on its own rather than waiting for the next start code or EOF.
    /// `None` means no cap (the PES grows until one of the two legitimate terminators arrives).
    pub max_unbounded_pes_bytes: Option<usize>,
    /// Number of TS packets the PCR timing buffer (C12) reads ahead to find the next PCR.
    pub pcr_lookahead_packets: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            warn_on_reserved_bits: true,
            overlong_pes_policy: OverlongPesPolicy::default(),
            max_unbounded_pes_bytes: None,
            pcr_lookahead_packets: 500,
        }
    }
}

impl ReaderConfig {
    /// Start from the defaults and disable reserved-bit warnings.
    pub fn quiet_reserved_bits(mut self) -> Self {
        self.warn_on_reserved_bits = false;
        self
    }

    /// Start from the defaults and make overlong PES packets a fatal error.
    pub fn strict_pes_length(mut self) -> Self {
        self.overlong_pes_policy = OverlongPesPolicy::Error;
        self
    }

    /// Start from the defaults and cap unbounded PES accumulation at `bytes`.
    pub fn with_max_unbounded_pes_bytes(mut self, bytes: usize) -> Self {
        self.max_unbounded_pes_bytes = Some(bytes);
        self
    }

    /// Start from the defaults with a different PCR look-ahead window.
    pub fn with_pcr_lookahead(mut self, packets: usize) -> Self {
        self.pcr_lookahead_packets = packets;
        self
    }
}

/// Configuration for [`crate::writer::TsWriter`].
#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    /// Number of TS packets read at a time by callers that buffer output before flushing.
    /// Purely advisory; the writer itself emits one packet at a time.
    pub null_stuffing_pid: u16,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            null_stuffing_pid: 0x1fff,
        }
    }
}
