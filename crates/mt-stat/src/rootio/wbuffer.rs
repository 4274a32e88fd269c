//! Binary writer for ROOT's big-endian serialization format.

/// Flag marking the leading `u32` of a streamed object as a byte count.
pub const BYTE_COUNT_MASK: u32 = 0x4000_0000;
/// Tag announcing a class name the first time a class appears in a buffer.
pub const NEW_CLASS_TAG: u32 = 0xFFFF_FFFF;

/// An append-only buffer using ROOT's big-endian conventions.
#[derive(Debug, Default)]
pub struct WBuffer {
    data: Vec<u8>,
}

impl WBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write position.
    #[inline]
    pub fn pos(&self) -> usize {
        self.data.len()
    }

    /// Written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Take the written bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, b: &[u8]) {
        self.data.extend_from_slice(b);
    }

    /// Append `n` zero bytes.
    pub fn write_zeros(&mut self, n: usize) {
        self.data.resize(self.data.len() + n, 0);
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    /// Write a big-endian u16.
    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Write a big-endian i16.
    pub fn write_i16(&mut self, v: i16) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Write a big-endian u32.
    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Write a big-endian i32.
    pub fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Write a big-endian f32.
    pub fn write_f32(&mut self, v: f32) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Write a big-endian f64.
    pub fn write_f64(&mut self, v: f64) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Overwrite a previously written u32.
    pub fn patch_u32(&mut self, at: usize, v: u32) {
        self.data[at..at + 4].copy_from_slice(&v.to_be_bytes());
    }

    /// Write a ROOT string: one length byte (or 255 + u32 length), then the bytes.
    pub fn write_string(&mut self, s: &str) {
        let b = s.as_bytes();
        if b.len() < 255 {
            self.write_u8(b.len() as u8);
        } else {
            self.write_u8(255);
            self.write_u32(b.len() as u32);
        }
        self.write_bytes(b);
    }

    /// Write a NUL-terminated class name.
    pub fn write_cstring(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_u8(0);
    }

    /// Open a versioned object: a byte-count placeholder followed by the
    /// version. Returns the position to pass to [`end_version`](Self::end_version).
    pub fn begin_version(&mut self, version: u16) -> usize {
        let start = self.pos();
        self.write_u32(0);
        self.write_u16(version);
        start
    }

    /// Close an object opened at `start`; the byte count covers everything
    /// after the leading u32.
    pub fn end_version(&mut self, start: usize) {
        let count = (self.pos() - start - 4) as u32;
        self.patch_u32(start, count | BYTE_COUNT_MASK);
    }

    /// Write a `TObject` header (version 1, no unique id).
    pub fn write_tobject(&mut self, bits: u32) {
        self.write_u16(1);
        self.write_u32(0);
        self.write_u32(bits);
    }

    /// Write a `TNamed`: TObject + fName + fTitle.
    pub fn write_tnamed(&mut self, name: &str, title: &str) {
        let start = self.begin_version(1);
        self.write_tobject(TOBJECT_BITS);
        self.write_string(name);
        self.write_string(title);
        self.end_version(start);
    }

    /// Write a `TArrayD`: length then values.
    pub fn write_array_f64(&mut self, values: &[f64]) {
        self.write_i32(values.len() as i32);
        for v in values {
            self.write_f64(*v);
        }
    }
}

/// `kNotDeleted` as stored on disk.
pub const TOBJECT_BITS: u32 = 0x0200_0000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_and_byte_counts() {
        let mut w = WBuffer::new();
        w.write_string("abc");
        assert_eq!(w.as_slice(), &[3, b'a', b'b', b'c']);

        let mut w = WBuffer::new();
        let start = w.begin_version(3);
        w.write_f64(1.0);
        w.end_version(start);
        let b = w.into_inner();
        // 2 (version) + 8 (f64) after the count
        assert_eq!(u32::from_be_bytes([b[0], b[1], b[2], b[3]]), BYTE_COUNT_MASK | 10);
        assert_eq!(u16::from_be_bytes([b[4], b[5]]), 3);

        let mut w = WBuffer::new();
        w.write_string(&"x".repeat(300));
        assert_eq!(w.as_slice()[0], 255);
        assert_eq!(w.pos(), 1 + 4 + 300);
    }
}
