use thiserror::Error;

/// A read or skip would run past the end of the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("read past end of packet ({requested} bytes requested, {remaining} remaining)")]
pub struct Truncated {
    pub requested: usize,
    pub remaining: usize,
}

/// Cursor-based reader over a fixed byte buffer. Knows nothing about the
/// measurement protocol; every access is bounds-checked so malformed packets
/// surface as [`Truncated`] instead of a panic.
pub struct PacketReader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    fn check(&self, requested: usize) -> Result<(), Truncated> {
        if requested > self.remaining() {
            return Err(Truncated {
                requested,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<(), Truncated> {
        self.check(count)?;
        self.cursor += count;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, Truncated> {
        self.check(1)?;
        let byte = self.data[self.cursor];
        self.cursor += 1;
        Ok(byte)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, Truncated> {
        let b0 = self.read_u8()?;
        let b1 = self.read_u8()?;
        Ok(u16::from(b0) | (u16::from(b1) << 8))
    }
}
