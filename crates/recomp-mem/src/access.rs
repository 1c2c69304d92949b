/// Sized little-endian access to simulated memory.
///
/// Accessors are total on in-range addresses and do not return errors: translated code performs
/// millions of them and has no recovery path for a bad address anyway. An out-of-range access is
/// a translation bug and panics.
pub trait GuestMemory {
    /// Reads `dst.len()` bytes starting at `addr`.
    fn read_into(&self, addr: u32, dst: &mut [u8]);

    /// Writes `src` starting at `addr`.
    fn write_from(&mut self, addr: u32, src: &[u8]);

    fn read_u8(&self, addr: u32) -> u8 {
        let mut buf = [0u8; 1];
        self.read_into(addr, &mut buf);
        buf[0]
    }

    fn read_u16(&self, addr: u32) -> u16 {
        let mut buf = [0u8; 2];
        self.read_into(addr, &mut buf);
        u16::from_le_bytes(buf)
    }

    fn read_u32(&self, addr: u32) -> u32 {
        let mut buf = [0u8; 4];
        self.read_into(addr, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn read_u64(&self, addr: u32) -> u64 {
        let mut buf = [0u8; 8];
        self.read_into(addr, &mut buf);
        u64::from_le_bytes(buf)
    }

    fn read_i8(&self, addr: u32) -> i8 {
        self.read_u8(addr) as i8
    }

    fn read_i16(&self, addr: u32) -> i16 {
        self.read_u16(addr) as i16
    }

    fn read_i32(&self, addr: u32) -> i32 {
        self.read_u32(addr) as i32
    }

    fn read_f32(&self, addr: u32) -> f32 {
        f32::from_bits(self.read_u32(addr))
    }

    fn read_f64(&self, addr: u32) -> f64 {
        f64::from_bits(self.read_u64(addr))
    }

    fn write_u8(&mut self, addr: u32, value: u8) {
        self.write_from(addr, &[value]);
    }

    fn write_u16(&mut self, addr: u32, value: u16) {
        self.write_from(addr, &value.to_le_bytes());
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        self.write_from(addr, &value.to_le_bytes());
    }

    fn write_u64(&mut self, addr: u32, value: u64) {
        self.write_from(addr, &value.to_le_bytes());
    }

    fn write_i8(&mut self, addr: u32, value: i8) {
        self.write_u8(addr, value as u8);
    }

    fn write_i16(&mut self, addr: u32, value: i16) {
        self.write_u16(addr, value as u16);
    }

    fn write_i32(&mut self, addr: u32, value: i32) {
        self.write_u32(addr, value as u32);
    }

    fn write_f32(&mut self, addr: u32, value: f32) {
        self.write_u32(addr, value.to_bits());
    }

    fn write_f64(&mut self, addr: u32, value: f64) {
        self.write_u64(addr, value.to_bits());
    }

    fn read_bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read_into(addr, &mut out);
        out
    }

    /// `rep stosb` over `[addr, addr + len)`.
    fn fill(&mut self, addr: u32, len: usize, value: u8) {
        let chunk = [value; 256];
        let mut done = 0usize;
        while done < len {
            let n = (len - done).min(chunk.len());
            self.write_from(addr.wrapping_add(done as u32), &chunk[..n]);
            done += n;
        }
    }

    /// `memmove` semantics: overlapping ranges copy as if through a temporary.
    fn copy_within(&mut self, src: u32, dst: u32, len: usize) {
        let tmp = self.read_bytes(src, len);
        self.write_from(dst, &tmp);
    }

    /// Reads a NUL-terminated byte string of at most `max` bytes.
    fn read_cstr(&self, addr: u32, max: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..max {
            let b = self.read_u8(addr.wrapping_add(i as u32));
            if b == 0 {
                break;
            }
            out.push(b);
        }
        out
    }
}

/// A flat zero-initialised buffer starting at simulated address `base`.
///
/// Useful as a stand-in for the full address space in tests of code that only needs a few pages.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    base: u32,
    data: Vec<u8>,
}

impl DenseMemory {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            data: vec![0u8; size],
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn range(&self, addr: u32, len: usize) -> core::ops::Range<usize> {
        let start = addr.wrapping_sub(self.base) as usize;
        start..start + len
    }
}

impl GuestMemory for DenseMemory {
    fn read_into(&self, addr: u32, dst: &mut [u8]) {
        let r = self.range(addr, dst.len());
        dst.copy_from_slice(&self.data[r]);
    }

    fn write_from(&mut self, addr: u32, src: &[u8]) {
        let r = self.range(addr, src.len());
        self.data[r].copy_from_slice(src);
    }
}
