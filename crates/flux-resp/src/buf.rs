/// Growable byte buffer used for per-connection write and packet staging.
///
/// Appending never shrinks the backing allocation; callers that want the
/// memory back after a burst call [`Buf::clear_or_release`].
#[derive(Debug, Default)]
pub struct Buf {
    data: Vec<u8>,
}

/// Capacity above which an emptied buffer gives its allocation back
/// instead of keeping it warm for the next command.
pub const RELEASE_THRESHOLD: usize = 4096;

impl Buf {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Fallible append, used by reply writers so an allocation failure can
    /// latch the connection closed instead of aborting the process.
    #[inline]
    pub fn try_extend_from_slice(&mut self, bytes: &[u8]) -> bool {
        if self.data.try_reserve(bytes.len()).is_err() {
            return false;
        }
        self.data.extend_from_slice(bytes);
        true
    }

    /// Fallible single-byte append, mirroring [`Buf::try_extend_from_slice`].
    #[inline]
    pub fn try_push(&mut self, byte: u8) -> bool {
        if self.data.try_reserve(1).is_err() {
            return false;
        }
        self.data.push(byte);
        true
    }

    /// Replaces every byte `< 0x20` from `from` to the end with a space,
    /// matching `writeln`'s control-byte scan over the payload it just
    /// appended.
    #[inline]
    pub fn sanitize_control_bytes_from(&mut self, from: usize) {
        for byte in &mut self.data[from..] {
            if *byte < 0x20 {
                *byte = b' ';
            }
        }
    }

    /// Drops the unread `consumed` bytes from the front, keeping the rest.
    /// Used after a partial protocol parse to retain only the trailing
    /// fragment of an in-flight command.
    #[inline]
    pub fn drain_front(&mut self, consumed: usize) {
        self.data.drain(..consumed);
    }

    /// Resets logical length to zero. Frees the allocation if it grew past
    /// [`RELEASE_THRESHOLD`] so a single oversized command doesn't keep an
    /// idle connection's buffer pinned in memory.
    #[inline]
    pub fn clear_or_release(&mut self) {
        if self.data.capacity() > RELEASE_THRESHOLD {
            self.data = Vec::new();
        } else {
            self.data.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_reproduces_concatenation() {
        let mut buf = Buf::new();
        buf.extend_from_slice(b"hello ");
        buf.extend_from_slice(b"world");
        assert_eq!(buf.as_slice(), b"hello world");
    }

    #[test]
    fn clear_or_release_frees_large_buffers() {
        let mut buf = Buf::new();
        buf.extend_from_slice(&vec![b'x'; RELEASE_THRESHOLD + 1]);
        buf.clear_or_release();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn clear_or_release_keeps_small_buffers_warm() {
        let mut buf = Buf::new();
        buf.extend_from_slice(b"short");
        let cap_before = buf.capacity();
        buf.clear_or_release();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), cap_before);
    }

    #[test]
    fn drain_front_keeps_trailing_bytes() {
        let mut buf = Buf::new();
        buf.extend_from_slice(b"abcdef");
        buf.drain_front(4);
        assert_eq!(buf.as_slice(), b"ef");
    }
}
