//! ブロック境界のマーカーと長さフィールドのエンコーディング.
//!
//! ヒープ上の各ブロックは、1バイトのマーカーバイトで区切られている.
//! マーカーバイトの上位4bit(左ニブル)は直前のブロックの種別を、
//! 下位4bit(右ニブル)は直後のブロックの種別を表す.
//!
//! ```text
//! [marker][length][payload.......][length?][marker][length][payload...]
//!      ^                                      ^
//!      |                                      +-- 左: 直前のブロック, 右: 直後のブロック
//!      +-- 右ニブルが直後のブロックの種別
//! ```
use crate::nvm::NonVolatileMemory;

/// 空きリストのリンクやチェインの継続先を表すポインタのバイト幅.
pub const POINTER_SIZE: u64 = 5;

/// このサイズ未満の空きブロックは、空きリストにはリンクされない.
///
/// 長さフィールド(1バイト)が両端にあり、その間に前後へのポインタが二つ入る最小サイズ.
pub const MIN_LINKED_FREE_BLOCK_SIZE: u64 = 12;

const ALLOCATED_MARKER_OFFSET: u8 = 5;
const CHAINED_MARKER: u8 = 10;
const SINGLE_BYTE_GAP_MARKER: u8 = 0xF;

/// マーカーニブルの種別.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// 空きリストにリンクされない小さな空きブロック(1..=11バイト).
    ///
    /// ブロックの先頭と末尾のバイトに、自身のサイズが格納されている.
    SmallFree,

    /// 空きリストにリンクされている空きブロック.
    ///
    /// 値は長さフィールドのバイト幅(1..=5).
    /// 長さフィールドはブロックの両端に格納されている.
    Free(u8),

    /// 割当済みのブロック.
    ///
    /// 値はペイロード長を保持する長さフィールドのバイト幅(1..=4).
    Allocated(u8),

    /// 複数のセグメントに分割された巨大なブロックの、最後以外のセグメント.
    ///
    /// 長さフィールドの位置には、次のセグメントのアドレス(5バイト)が格納されている.
    /// ペイロードのサイズは常にヒープの最大ブロックサイズと等しい.
    Chained,

    /// 一バイトだけ余った領域を、追加のマーカーバイトとして扱ったもの.
    SingleByteGap,
}
impl Marker {
    /// ニブル値をデコードする.
    ///
    /// 未定義の値(11..=14)の場合には`None`が返される.
    pub fn decode(nibble: u8) -> Option<Self> {
        match nibble {
            0 => Some(Marker::SmallFree),
            1..=5 => Some(Marker::Free(nibble)),
            6..=9 => Some(Marker::Allocated(nibble - ALLOCATED_MARKER_OFFSET)),
            CHAINED_MARKER => Some(Marker::Chained),
            SINGLE_BYTE_GAP_MARKER => Some(Marker::SingleByteGap),
            _ => None,
        }
    }

    /// ニブル値にエンコードする.
    pub fn encode(self) -> u8 {
        match self {
            Marker::SmallFree => 0,
            Marker::Free(width) => {
                debug_assert!(1 <= width && width <= 5, "width={}", width);
                width
            }
            Marker::Allocated(width) => {
                debug_assert!(1 <= width && width <= 4, "width={}", width);
                width + ALLOCATED_MARKER_OFFSET
            }
            Marker::Chained => CHAINED_MARKER,
            Marker::SingleByteGap => SINGLE_BYTE_GAP_MARKER,
        }
    }

    /// マーカーの直後に続く、長さフィールド(ないしポインタ)のバイト幅を返す.
    pub fn field_size(self) -> u64 {
        match self {
            Marker::SmallFree | Marker::SingleByteGap => 0,
            Marker::Free(width) | Marker::Allocated(width) => u64::from(width),
            Marker::Chained => POINTER_SIZE,
        }
    }

    /// 割当済みのブロック(ないしセグメント)を表すマーカーかどうか.
    pub fn is_allocated(self) -> bool {
        match self {
            Marker::Allocated(_) | Marker::Chained => true,
            _ => false,
        }
    }
}

/// ペイロードサイズを格納するのに必要な長さフィールドのバイト幅(1..=4)を返す.
pub fn length_field_size(payload_size: u64) -> u8 {
    if payload_size < 1 << 8 {
        1
    } else if payload_size < 1 << 16 {
        2
    } else if payload_size < 1 << 24 {
        3
    } else {
        4
    }
}

/// 空きブロックのサイズを格納するのに必要な長さフィールドのバイト幅(1..=5)を返す.
pub fn free_length_field_size(block_size: u64) -> u8 {
    if block_size < 1 << 8 {
        1
    } else if block_size < 1 << 16 {
        2
    } else if block_size < 1 << 24 {
        3
    } else if block_size < 1 << 32 {
        4
    } else {
        5
    }
}

/// マーカーバイトを(左ニブル, 右ニブル)に分割する.
pub fn split_nibbles(byte: u8) -> (u8, u8) {
    (byte >> 4, byte & 0xF)
}

/// 左右のニブルを一つのマーカーバイトに結合する.
pub fn merge_nibbles(left: u8, right: u8) -> u8 {
    debug_assert!(left <= 0xF && right <= 0xF);
    (left << 4) | right
}

/// `position`のマーカーバイトを読み込み、(左ニブル, 右ニブル)を返す.
pub fn read_nibbles<N: NonVolatileMemory + ?Sized>(nvm: &N, position: u64) -> (u8, u8) {
    split_nibbles(nvm.read_u8(position))
}

/// `position`のマーカーバイトの左ニブル(直前のブロックの種別)をデコードする.
pub fn read_left<N: NonVolatileMemory + ?Sized>(nvm: &N, position: u64) -> Option<Marker> {
    Marker::decode(read_nibbles(nvm, position).0)
}

/// `position`のマーカーバイトの右ニブル(直後のブロックの種別)をデコードする.
pub fn read_right<N: NonVolatileMemory + ?Sized>(nvm: &N, position: u64) -> Option<Marker> {
    Marker::decode(read_nibbles(nvm, position).1)
}

/// `position`のマーカーバイトの左ニブルだけを書き換える.
pub fn write_left<N: NonVolatileMemory + ?Sized>(nvm: &mut N, position: u64, marker: Marker) {
    let (_, right) = read_nibbles(nvm, position);
    nvm.write_u8(position, merge_nibbles(marker.encode(), right));
}

/// `position`のマーカーバイトの右ニブルだけを書き換える.
pub fn write_right<N: NonVolatileMemory + ?Sized>(nvm: &mut N, position: u64, marker: Marker) {
    let (left, _) = read_nibbles(nvm, position);
    nvm.write_u8(position, merge_nibbles(left, marker.encode()));
}

/// `position`から`width`バイト幅の長さフィールドを読み込む.
pub fn read_length_field<N: NonVolatileMemory + ?Sized>(nvm: &N, position: u64, width: u64) -> u64 {
    nvm.read_val(position, width as usize)
}

/// `position`に`width`バイト幅の長さフィールドを書き込む.
pub fn write_length_field<N: NonVolatileMemory + ?Sized>(
    nvm: &mut N,
    position: u64,
    value: u64,
    width: u64,
) {
    debug_assert!(
        width == 8 || value < 1 << (width * 8),
        "value={}, width={}",
        value,
        width
    );
    nvm.write_val(position, value, width as usize);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvm::MemoryNvm;

    #[test]
    fn marker_codec_works() {
        for nibble in 0..16 {
            match Marker::decode(nibble) {
                None => assert!(11 <= nibble && nibble <= 14, "nibble={}", nibble),
                Some(m) => assert_eq!(m.encode(), nibble),
            }
        }
        assert_eq!(Marker::decode(0), Some(Marker::SmallFree));
        assert_eq!(Marker::decode(3), Some(Marker::Free(3)));
        assert_eq!(Marker::decode(6), Some(Marker::Allocated(1)));
        assert_eq!(Marker::decode(9), Some(Marker::Allocated(4)));
        assert_eq!(Marker::decode(10), Some(Marker::Chained));
        assert_eq!(Marker::decode(15), Some(Marker::SingleByteGap));

        assert_eq!(Marker::Allocated(2).field_size(), 2);
        assert_eq!(Marker::Chained.field_size(), POINTER_SIZE);
        assert_eq!(Marker::SingleByteGap.field_size(), 0);
        assert!(Marker::Chained.is_allocated());
        assert!(!Marker::Free(1).is_allocated());
    }

    #[test]
    fn length_field_size_works() {
        assert_eq!(length_field_size(1), 1);
        assert_eq!(length_field_size(255), 1);
        assert_eq!(length_field_size(256), 2);
        assert_eq!(length_field_size(65_535), 2);
        assert_eq!(length_field_size(65_536), 3);
        assert_eq!(length_field_size((1 << 24) - 1), 3);
        assert_eq!(length_field_size(1 << 24), 4);

        assert_eq!(free_length_field_size(12), 1);
        assert_eq!(free_length_field_size(256), 2);
        assert_eq!(free_length_field_size(1 << 24), 4);
        assert_eq!(free_length_field_size((1 << 32) - 1), 4);
        assert_eq!(free_length_field_size(1 << 32), 5);
    }

    #[test]
    fn nibbles_work() {
        assert_eq!(split_nibbles(0xA6), (0xA, 0x6));
        assert_eq!(merge_nibbles(0xA, 0x6), 0xA6);

        let mut nvm = MemoryNvm::with_capacity(16);
        write_right(&mut nvm, 3, Marker::Allocated(2));
        write_left(&mut nvm, 3, Marker::Chained);
        assert_eq!(nvm.read_u8(3), 0xA7);
        assert_eq!(read_left(&nvm, 3), Some(Marker::Chained));
        assert_eq!(read_right(&nvm, 3), Some(Marker::Allocated(2)));

        write_right(&mut nvm, 3, Marker::SingleByteGap);
        assert_eq!(read_nibbles(&nvm, 3), (0xA, 0xF));

        nvm.write_u8(4, 0xB0);
        assert_eq!(read_left(&nvm, 4), None);
    }

    #[test]
    fn length_field_works() {
        let mut nvm = MemoryNvm::with_capacity(16);
        write_length_field(&mut nvm, 2, 0x0102_03, 3);
        assert_eq!(read_length_field(&nvm, 2, 3), 0x0102_03);
        assert_eq!(&nvm.as_bytes()[2..5], &[3, 2, 1]);
    }
}
