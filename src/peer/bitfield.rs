use bytes::Bytes;

/// A bitfield representing which pieces a peer has.
///
/// Each bit marks whether a piece is complete (1) or not (0). Bits are
/// numbered from the high bit of the first byte. The wire form is always
/// `ceil(piece_count / 8)` bytes with trailing pad bits zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// Creates a new empty bitfield for the given number of pieces.
    pub fn new(piece_count: usize) -> Self {
        let byte_count = piece_count.div_ceil(8);
        Self {
            bits: vec![0; byte_count],
            piece_count,
        }
    }

    /// Parses a received `Bitfield` message payload.
    ///
    /// Returns `None` if the payload is not exactly `ceil(piece_count / 8)`
    /// bytes or if any trailing pad bit is set; receivers treat that as a
    /// protocol violation.
    pub fn from_message(bytes: &Bytes, piece_count: usize) -> Option<Self> {
        if bytes.len() != piece_count.div_ceil(8) {
            return None;
        }

        let bf = Self {
            bits: bytes.to_vec(),
            piece_count,
        };

        let spare = bf.bits.len() * 8 - piece_count;
        if spare > 0 {
            let mask = (1u8 << spare) - 1;
            if bf.bits[bf.bits.len() - 1] & mask != 0 {
                return None;
            }
        }

        Some(bf)
    }

    /// Returns true if the piece at the given index is available.
    pub fn has(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        (self.bits[byte_index] >> bit_index) & 1 == 1
    }

    /// Sets the bit for the piece at the given index.
    pub fn set(&mut self, index: usize) {
        if index >= self.piece_count {
            return;
        }
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        self.bits[byte_index] |= 1 << bit_index;
    }

    /// Clears the bit for the piece at the given index.
    pub fn clear(&mut self, index: usize) {
        if index >= self.piece_count {
            return;
        }
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        self.bits[byte_index] &= !(1 << bit_index);
    }

    /// Returns the number of pieces that are available.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Returns true if all pieces are available.
    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    /// Returns true if no pieces are available.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    /// Returns the total number of pieces.
    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Returns the raw bytes of the bitfield.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Converts the bitfield to owned bytes for a `Bitfield` message.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Returns true if `self` has any piece that `ours` lacks.
    pub fn has_piece_missing_from(&self, ours: &Bitfield) -> bool {
        (0..self.piece_count).any(|i| self.has(i) && !ours.has(i))
    }
}
