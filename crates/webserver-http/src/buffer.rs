/// Elastic, NUL-terminated input buffer.
///
/// Starts at 255 bytes and doubles whenever the free capacity — not
/// counting the one byte permanently reserved for the trailing NUL —
/// drops below 10 bytes. The NUL byte is never written to by a read; it
/// exists purely so the parser can treat the filled region as a
/// C-string-shaped slice without a separate length check at every byte.
pub struct ReadBuffer {
    data: Vec<u8>,
    filled: usize,
}

const INITIAL_CAPACITY: usize = 255;
const LOW_WATERMARK: usize = 10;

impl ReadBuffer {
    pub fn new() -> Self {
        Self { data: vec![0u8; INITIAL_CAPACITY], filled: 0 }
    }

    pub fn filled_len(&self) -> usize {
        self.filled
    }

    /// The bytes read so far, not including the trailing NUL.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// The filled region plus its trailing NUL, as the parser expects.
    pub fn as_nul_terminated(&self) -> &[u8] {
        &self.data[..=self.filled]
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.filled - 1
    }

    fn grow_if_low(&mut self) {
        while self.free() < LOW_WATERMARK {
            let new_capacity = self.capacity() * 2;
            self.data.resize(new_capacity, 0);
        }
    }

    /// The writable region a non-blocking read should target. Grows the
    /// buffer first if free capacity is low, so the returned slice is
    /// always at least `LOW_WATERMARK` bytes.
    pub fn spare_capacity_mut(&mut self) -> &mut [u8] {
        self.grow_if_low();
        let filled = self.filled;
        let last_usable = self.data.len() - 1;
        &mut self.data[filled..last_usable]
    }

    /// Records that `n` bytes were just written into the slice returned
    /// by `spare_capacity_mut`. `n` must not exceed that slice's length.
    pub fn record_filled(&mut self, n: usize) {
        self.filled += n;
        webserver_utils::safe_assert!(
            self.filled < self.capacity(),
            "filled must stay below capacity to preserve the trailing NUL"
        );
    }

}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_255_bytes_with_room_to_spare() {
        let buf = ReadBuffer::new();
        assert_eq!(buf.capacity(), INITIAL_CAPACITY);
        assert_eq!(buf.filled_len(), 0);
    }

    #[test]
    fn nul_terminated_view_always_ends_in_a_zero_byte() {
        let mut buf = ReadBuffer::new();
        let spare = buf.spare_capacity_mut();
        spare[..5].copy_from_slice(b"hello");
        buf.record_filled(5);

        assert_eq!(buf.filled(), b"hello");
        assert_eq!(buf.as_nul_terminated(), b"hello\0");
    }

    #[test]
    fn doubles_when_free_capacity_drops_below_the_watermark() {
        let mut buf = ReadBuffer::new();
        buf.record_filled(INITIAL_CAPACITY - LOW_WATERMARK);

        assert!(buf.free() < LOW_WATERMARK);
        let spare_len = buf.spare_capacity_mut().len();
        assert!(buf.capacity() > INITIAL_CAPACITY);
        assert!(spare_len >= LOW_WATERMARK);
    }

    #[test]
    fn doubling_preserves_already_filled_bytes() {
        let mut buf = ReadBuffer::new();
        buf.spare_capacity_mut()[..3].copy_from_slice(b"abc");
        buf.record_filled(3);
        buf.record_filled(INITIAL_CAPACITY - LOW_WATERMARK - 3);

        buf.spare_capacity_mut(); // forces growth
        assert!(buf.filled().starts_with(b"abc"));
    }
}
