//! Bounds-checked cursor over a byte slice, tracking location for error reporting.

use crate::error::{Error, ErrorDetails, Result};
use crate::offset::Offset;

/// Simple reader state for extracting data from a `&[u8]` slice.
///
/// Unlike the [`std::io::Read`] implementation for `&[u8]`, this keeps track of the location
/// within the packet so errors can report exactly where the bitstream went wrong.
#[derive(Debug)]
pub struct SliceReader<'a> {
    slice: &'a [u8],
    base_offset: Offset,
    location: usize,
}

impl<'a> SliceReader<'a> {
    /// Initializes a reader from any byte slice. `base_offset` is the stream position of the
    /// slice's first byte, used to produce informative error locations.
    pub fn new(slice: &'a [u8], base_offset: Offset) -> Self {
        Self {
            slice,
            base_offset,
            location: 0,
        }
    }

    /// Creates a fixed-`length` sub-reader at the current position, then advances this reader
    /// past it.
    pub fn new_sub_reader(&mut self, length: usize) -> Result<Self> {
        let offset = self.current_offset();
        Ok(Self {
            slice: self.read(length)?,
            base_offset: offset,
            location: 0,
        })
    }

    /// The stream offset of the next unread byte.
    pub fn current_offset(&self) -> Offset {
        Offset::in_pes(
            self.base_offset.file_offset,
            self.base_offset.packet_offset + self.location as u64,
        )
    }

    /// Creates an [`Error`] located at the reader's current position.
    pub fn make_error(&self, details: ErrorDetails) -> Error {
        Error::new(self.current_offset(), details)
    }

    /// Number of bytes remaining in the slice reader.
    pub fn remaining_len(&self) -> usize {
        self.slice.len()
    }

    /// Advance the reader without extracting any data from the slice.
    pub fn skip(&mut self, length: usize) -> Result<()> {
        if length > self.slice.len() {
            Err(self.make_error(ErrorDetails::PacketOverrun(length)))
        } else {
            self.location += length;
            self.slice = &self.slice[length..];
            Ok(())
        }
    }

    /// Extract a fixed-`length` sub-slice from this reader and advance past it.
    pub fn read(&mut self, length: usize) -> Result<&'a [u8]> {
        if length > self.slice.len() {
            Err(self.make_error(ErrorDetails::PacketOverrun(length)))
        } else {
            self.location += length;
            let (left, right) = self.slice.split_at(length);
            self.slice = right;
            Ok(left)
        }
    }

    /// Extract a sub-slice of all data remaining to be read.
    pub fn read_to_end(&mut self) -> Result<&'a [u8]> {
        self.read(self.slice.len())
    }

    /// Same as [`SliceReader::read`] but converts the result to a fixed-size array reference.
    #[allow(unsafe_code)]
    pub fn read_array_ref<const N: usize>(&mut self) -> Result<&'a [u8; N]> {
        let slice = self.read(N)?;
        // Bounds checked by read() above; slice.len() == N exactly.
        Ok(unsafe { &*(slice.as_ptr() as *const [u8; N]) })
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array_ref::<1>()?[0])
    }

    /// Read two bytes as big-endian `u16`.
    pub fn read_be_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(*self.read_array_ref::<2>()?))
    }

    /// Extract a fixed-`length` sub-slice without advancing.
    pub fn peek(&mut self, length: usize) -> Result<&'a [u8]> {
        if length > self.slice.len() {
            Err(self.make_error(ErrorDetails::PacketOverrun(length)))
        } else {
            Ok(&self.slice[0..length])
        }
    }

    /// Same as [`SliceReader::peek`] but converts to a fixed-size array reference.
    #[allow(unsafe_code)]
    pub fn peek_array_ref<const N: usize>(&mut self) -> Result<&'a [u8; N]> {
        let slice = self.peek(N)?;
        Ok(unsafe { &*(slice.as_ptr() as *const [u8; N]) })
    }
}

/// Convenience macro to read a `modular_bitfield_msb` bitfield from a [`SliceReader`].
///
/// Wraps [`SliceReader::read_array_ref`] to read exactly the number of bytes the bitfield type
/// occupies. Must be expanded in a function returning [`crate::error::Result`].
#[macro_export]
macro_rules! read_bitfield {
    ($reader:expr, $type:ty) => {
        <$type>::from_bytes(*$reader.read_array_ref::<{ std::mem::size_of::<$type>() }>()?)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_and_peek_advance_correctly() {
        let data = [1u8, 2, 3, 4, 5];
        let mut r = SliceReader::new(&data, Offset::default());
        assert_eq!(r.peek(2).unwrap(), &[1, 2]);
        assert_eq!(r.read(2).unwrap(), &[1, 2]);
        assert_eq!(r.remaining_len(), 3);
        assert_eq!(r.read_u8().unwrap(), 3);
        assert_eq!(r.read_to_end().unwrap(), &[4, 5]);
    }

    #[test]
    fn overrun_is_an_error() {
        let data = [1u8];
        let mut r = SliceReader::new(&data, Offset::default());
        assert!(matches!(
            r.read(2).unwrap_err().details,
            ErrorDetails::PacketOverrun(2)
        ));
    }

    #[test]
    fn sub_reader_tracks_offset() {
        let data = [0u8; 10];
        let mut r = SliceReader::new(&data, Offset::bare(100));
        r.skip(4).unwrap();
        let sub = r.new_sub_reader(4).unwrap();
        assert_eq!(sub.current_offset(), Offset::bare(104));
    }
}
