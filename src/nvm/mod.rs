//! ヒープの格納先となるメモリ領域のインターフェース定義と実装群.
//!
//! このモジュールは[SmallObjectHeap](../heap/struct.SmallObjectHeap.html)が
//! データの読み書きに使用する、平坦なバイト列を提供する.
//!
//! `NonVolatileMemory`自体は構造を一切持たず、ブロックの境界等は全てヒープ側が決める.
use byteorder::{ByteOrder, LittleEndian};

pub use self::memory::MemoryNvm;
pub use self::mmap::{MmapNvm, MmapNvmBuilder};

use crate::Result;

mod memory;
mod mmap;

/// ヒープ用のバイト列を表すトレイト.
///
/// 位置は全て先頭を`0`とするオフセットで指定する.
/// 複数バイトの値は、リトルエンディアンで読み書きされる.
///
/// 容量を超える位置へのアクセスは、呼び出し側の契約違反であり、
/// 実装はパニックして構わない(スライスのインデックスアクセスと同様).
pub trait NonVolatileMemory {
    /// メモリの容量(バイト単位)を返す.
    fn capacity(&self) -> u64;

    /// `offset`の位置から`buf.len()`バイトを読み込む.
    fn read_bytes(&self, offset: u64, buf: &mut [u8]);

    /// `offset`の位置に`buf`の内容を書き込む.
    fn write_bytes(&mut self, offset: u64, buf: &[u8]);

    /// `offset`から`len`バイトを`value`で埋める.
    fn fill(&mut self, offset: u64, len: u64, value: u8);

    /// メモリの内容を、物理デバイスに同期する.
    ///
    /// 内部的にバッファ管理等を行っておらず、常に内容が同期されている場合には、
    /// このメソッド内で特に何かを行う必要はない.
    fn sync(&mut self) -> Result<()>;

    /// 1バイトを読み込む.
    fn read_u8(&self, offset: u64) -> u8 {
        let mut buf = [0; 1];
        self.read_bytes(offset, &mut buf);
        buf[0]
    }

    /// 2バイト整数を読み込む.
    fn read_u16(&self, offset: u64) -> u16 {
        let mut buf = [0; 2];
        self.read_bytes(offset, &mut buf);
        LittleEndian::read_u16(&buf)
    }

    /// 4バイト整数を読み込む.
    fn read_u32(&self, offset: u64) -> u32 {
        let mut buf = [0; 4];
        self.read_bytes(offset, &mut buf);
        LittleEndian::read_u32(&buf)
    }

    /// 8バイト整数を読み込む.
    fn read_u64(&self, offset: u64) -> u64 {
        let mut buf = [0; 8];
        self.read_bytes(offset, &mut buf);
        LittleEndian::read_u64(&buf)
    }

    /// 1バイトを書き込む.
    fn write_u8(&mut self, offset: u64, value: u8) {
        self.write_bytes(offset, &[value]);
    }

    /// 2バイト整数を書き込む.
    fn write_u16(&mut self, offset: u64, value: u16) {
        let mut buf = [0; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.write_bytes(offset, &buf);
    }

    /// 4バイト整数を書き込む.
    fn write_u32(&mut self, offset: u64, value: u32) {
        let mut buf = [0; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_bytes(offset, &buf);
    }

    /// 8バイト整数を書き込む.
    fn write_u64(&mut self, offset: u64, value: u64) {
        let mut buf = [0; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.write_bytes(offset, &buf);
    }

    /// `count`バイト(1..=8)幅の整数を読み込む.
    ///
    /// ヒープの可変長の長さフィールドやポインタの読み込みに使われる.
    fn read_val(&self, offset: u64, count: usize) -> u64 {
        debug_assert!(1 <= count && count <= 8, "count={}", count);
        let mut buf = [0; 8];
        self.read_bytes(offset, &mut buf[..count]);
        LittleEndian::read_uint(&buf[..count], count)
    }

    /// `value`の下位`count`バイト(1..=8)を書き込む.
    fn write_val(&mut self, offset: u64, value: u64, count: usize) {
        debug_assert!(1 <= count && count <= 8, "count={}", count);
        let mut buf = [0; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.write_bytes(offset, &buf[..count]);
    }
}
