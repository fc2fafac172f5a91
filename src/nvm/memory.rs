use crate::nvm::NonVolatileMemory;
use crate::Result;

/// メモリベースの`NonVolatileMemory`の実装.
///
/// # 注意
///
/// これは主にテストや性能計測、あるいはスナップショットからの一時的な復元用途を意図した実装であり、
/// `NonVolatileMemory`が本来要求する"不揮発性"は満たしていない.
#[derive(Debug, Clone)]
pub struct MemoryNvm {
    memory: Vec<u8>,
}
impl MemoryNvm {
    /// 新しい`MemoryNvm`インスタンスを生成する.
    pub fn new(memory: Vec<u8>) -> Self {
        MemoryNvm { memory }
    }

    /// `capacity`バイトのゼロ埋めされた領域を確保する.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(vec![0; capacity])
    }

    /// 内部のバイト列への参照を返す.
    pub fn as_bytes(&self) -> &[u8] {
        &self.memory
    }

    /// インスタンスを破棄して、内部のバイト列を返す.
    pub fn into_bytes(self) -> Vec<u8> {
        self.memory
    }
}
impl NonVolatileMemory for MemoryNvm {
    fn capacity(&self) -> u64 {
        self.memory.len() as u64
    }
    fn read_bytes(&self, offset: u64, buf: &mut [u8]) {
        let start = offset as usize;
        buf.copy_from_slice(&self.memory[start..start + buf.len()]);
    }
    fn write_bytes(&mut self, offset: u64, buf: &[u8]) {
        let start = offset as usize;
        self.memory[start..start + buf.len()].copy_from_slice(buf);
    }
    fn fill(&mut self, offset: u64, len: u64, value: u8) {
        let start = offset as usize;
        for b in &mut self.memory[start..start + len as usize] {
            *b = value;
        }
    }
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;

    #[test]
    fn it_works() -> TestResult {
        let mut nvm = MemoryNvm::with_capacity(1024);
        assert_eq!(nvm.capacity(), 1024);
        assert_eq!(nvm.read_u64(0), 0);

        nvm.write_u8(0, 0xAB);
        nvm.write_u16(1, 0x1234);
        nvm.write_u32(3, 0xDEAD_BEEF);
        nvm.write_u64(7, 0x0102_0304_0506_0708);
        assert_eq!(nvm.read_u8(0), 0xAB);
        assert_eq!(nvm.read_u16(1), 0x1234);
        assert_eq!(nvm.read_u32(3), 0xDEAD_BEEF);
        assert_eq!(nvm.read_u64(7), 0x0102_0304_0506_0708);

        // little endian
        assert_eq!(&nvm.as_bytes()[1..3], &[0x34, 0x12]);

        nvm.fill(100, 10, 7);
        assert_eq!(&nvm.as_bytes()[99..111], &[0, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 0]);

        track!(nvm.sync())?;
        Ok(())
    }

    #[test]
    fn variable_width_values_work() {
        let mut nvm = MemoryNvm::with_capacity(64);

        nvm.write_val(10, 0xFF_FFFF_FFFF, 5);
        assert_eq!(nvm.read_val(10, 5), 0xFF_FFFF_FFFF);
        assert_eq!(nvm.read_u8(15), 0);

        // 上位バイトは切り捨てられる
        nvm.write_val(20, 0x1234_5678, 3);
        assert_eq!(nvm.read_val(20, 3), 0x34_5678);
        assert_eq!(nvm.read_val(20, 1), 0x78);
        assert_eq!(nvm.read_u8(23), 0);
    }

    #[test]
    #[should_panic]
    fn out_of_range_access_panics() {
        let nvm = MemoryNvm::with_capacity(8);
        nvm.read_u64(1);
    }
}
