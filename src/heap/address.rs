use std::fmt;
use std::ops::{Add, Sub};

/// ヒープ内のブロックを指す40bit幅のアドレス.
///
/// ヒープ上のポインタ(空きリストのリンクやチェインの継続先)は5バイトで格納されるので、
/// アドレス空間もそれに合わせて40bitに制限されている.
///
/// アドレスの値は、ブロック先頭のマーカーバイトの直後(i.e., 長さフィールドの先頭)のオフセット.
/// 位置`0`は常にマーカーバイトであるため、有効なブロックのアドレスが`0`になることはない.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Address(u64);
impl Address {
    /// 取り得るアドレスの最大値.
    pub const MAX: u64 = (1 << 40) - 1;

    pub(crate) fn new(value: u64) -> Self {
        debug_assert!(value <= Self::MAX, "value={}", value);
        Address(value)
    }

    /// アドレスの値を返す.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// `value`を対応する位置のアドレスに変換する.
    ///
    /// `value`の値が40bit以内に収まらない場合には`None`が返される.
    pub fn from_u64(value: u64) -> Option<Self> {
        if value <= Self::MAX {
            Some(Address(value))
        } else {
            None
        }
    }
}
impl From<u32> for Address {
    fn from(from: u32) -> Self {
        Address(u64::from(from))
    }
}
impl Add<u64> for Address {
    type Output = Self;
    fn add(self, rhs: u64) -> Self {
        let value = self.0 + rhs;
        Address::from_u64(value).expect("address overflow")
    }
}
impl Sub<u64> for Address {
    type Output = Self;
    fn sub(self, rhs: u64) -> Self {
        let value = self.0.checked_sub(rhs).expect("address underflow");
        Address(value)
    }
}
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:010x}", self.0)
    }
}
