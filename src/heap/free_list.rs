//! サイズクラス毎の空きブロックリスト.
//!
//! 空きリストの根(各リストの先頭ブロックへのポインタ)は、ヒープ末尾のトレーラ領域に格納されている.
//!
//! ```text
//! [block area ....................][root(0)][root(1)]...[root(n-1)]
//!                                  ^
//!                                  base
//! ```
//!
//! リンク済みの空きブロックのレイアウトは以下の通り(`w`は長さフィールドのバイト幅):
//!
//! ```text
//! [len(w)][prev(5)][next(5)] ... [len(w)]
//! ```
//!
//! `prev`が`base`以上の値を指している場合には、それはブロックが属するリストの根を意味する.
//! `next`が`0`の場合には、リストの末尾であることを意味する.
//!
//! ヒープ上のポインタの参照外し・書き換えは全てこのモジュールを経由して行われる.
use crate::heap::marker::{self, Marker, MIN_LINKED_FREE_BLOCK_SIZE, POINTER_SIZE};
use crate::nvm::NonVolatileMemory;

/// 末尾を示すポインタ値.
pub const NULL_POINTER: u64 = 0;

/// `position`に格納されている5バイトのポインタを読み込む.
pub fn read_pointer<N: NonVolatileMemory + ?Sized>(nvm: &N, position: u64) -> u64 {
    nvm.read_val(position, POINTER_SIZE as usize)
}

/// `position`に5バイトのポインタを書き込む.
pub fn write_pointer<N: NonVolatileMemory + ?Sized>(nvm: &mut N, position: u64, pointer: u64) {
    nvm.write_val(position, pointer, POINTER_SIZE as usize);
}

/// ヒープのサイズ毎に分類された空きブロックリスト群.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeBlockLists {
    base: u64,
    class_sizes: Vec<u64>,
}
impl FreeBlockLists {
    /// `heap_size`バイトのヒープ用の空きリスト群を構築する.
    ///
    /// クラス数は`floor(log2(heap_size)) - 2`となり、
    /// 各クラスの閾値は`[12, 24, 36, 48, 64, 128, 256, ...]`となる.
    ///
    /// このメソッドはメモリには一切触れないため、呼び出し側が根の領域を初期化する必要がある.
    pub fn new(heap_size: u64) -> Self {
        debug_assert!(heap_size >= 128);
        let log2 = 63 - u64::from(heap_size.leading_zeros());
        let count = (log2 - 2) as usize;
        let class_sizes = (0..count)
            .map(|i| {
                if i < 4 {
                    MIN_LINKED_FREE_BLOCK_SIZE * (i as u64 + 1)
                } else {
                    1 << (i + 2)
                }
            })
            .collect::<Vec<_>>();
        let base = heap_size - POINTER_SIZE * count as u64;
        FreeBlockLists { base, class_sizes }
    }

    /// スナップショットから読み込んだ値を使って、空きリスト群を復元する.
    pub fn from_parts(base: u64, class_sizes: Vec<u64>) -> Self {
        FreeBlockLists { base, class_sizes }
    }

    /// 根の領域の開始位置を返す.
    ///
    /// これはブロック領域のサイズとも等しい.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// 各クラスの閾値を返す.
    pub fn class_sizes(&self) -> &[u64] {
        &self.class_sizes
    }

    /// 根の領域のバイト数を返す.
    pub fn trailer_size(&self) -> u64 {
        POINTER_SIZE * self.class_sizes.len() as u64
    }

    /// `block_size`が属するクラスを返す.
    ///
    /// 閾値が`block_size`以下となる最大のクラスが選択される.
    /// `block_size`が最小の閾値未満の場合には`0`となる.
    pub fn class_for(&self, block_size: u64) -> usize {
        self.class_sizes
            .iter()
            .rposition(|&threshold| threshold <= block_size)
            .unwrap_or(0)
    }

    /// `class`番目のリストの根が格納されている位置を返す.
    pub fn root(&self, class: usize) -> u64 {
        self.base + POINTER_SIZE * class as u64
    }

    /// `class`番目のリストの先頭ブロックを返す.
    pub fn head<N: NonVolatileMemory + ?Sized>(&self, nvm: &N, class: usize) -> Option<u64> {
        let head = read_pointer(nvm, self.root(class));
        if head == NULL_POINTER {
            None
        } else {
            Some(head)
        }
    }

    /// `start`から始まる空きブロックのサイズを返す.
    pub fn block_size<N: NonVolatileMemory + ?Sized>(&self, nvm: &N, start: u64) -> u64 {
        let width = self.field_width(nvm, start);
        marker::read_length_field(nvm, start, width)
    }

    /// `start`から始まる空きブロックの、リスト内での次のブロックを返す.
    pub fn next<N: NonVolatileMemory + ?Sized>(&self, nvm: &N, start: u64) -> Option<u64> {
        let width = self.field_width(nvm, start);
        let next = read_pointer(nvm, start + width + POINTER_SIZE);
        if next == NULL_POINTER {
            None
        } else {
            Some(next)
        }
    }

    /// `start`から始まる`block_size`バイトの空きブロックを、対応するリストの先頭に追加する.
    ///
    /// ブロックの両端の長さフィールドは、呼び出し側が書き込み済みである必要がある.
    pub fn link<N: NonVolatileMemory + ?Sized>(&self, nvm: &mut N, start: u64, block_size: u64) {
        debug_assert!(block_size >= MIN_LINKED_FREE_BLOCK_SIZE);
        let width = u64::from(marker::free_length_field_size(block_size));
        let root = self.root(self.class_for(block_size));
        let head = read_pointer(nvm, root);

        write_pointer(nvm, start + width, root);
        write_pointer(nvm, start + width + POINTER_SIZE, head);
        if head != NULL_POINTER {
            let head_width = self.field_width(nvm, head);
            write_pointer(nvm, head + head_width, start);
        }
        write_pointer(nvm, root, start);
    }

    /// `start`から始まる空きブロックを、所属するリストから取り除く.
    pub fn unlink<N: NonVolatileMemory + ?Sized>(&self, nvm: &mut N, start: u64) {
        let width = self.field_width(nvm, start);
        let prev = read_pointer(nvm, start + width);
        let next = read_pointer(nvm, start + width + POINTER_SIZE);

        if prev >= self.base {
            write_pointer(nvm, prev, next);
        } else {
            let prev_width = self.field_width(nvm, prev);
            write_pointer(nvm, prev + prev_width + POINTER_SIZE, next);
        }
        if next != NULL_POINTER {
            let next_width = self.field_width(nvm, next);
            write_pointer(nvm, next + next_width, prev);
        }
    }

    /// `block_size`バイト以上の空きブロックを探す.
    ///
    /// まず、`block_size`が属するクラスより上のクラスを順に調べ、
    /// 空でない最初のリストの先頭ブロックを返す(そのリストの要素は全て`block_size`より大きい).
    /// それが見つからなかった場合には、`block_size`が属するクラスのリストを先頭から線形に走査する.
    ///
    /// 見つかったブロックはリストにリンクされたままである.
    pub fn find_fit<N: NonVolatileMemory + ?Sized>(&self, nvm: &N, block_size: u64) -> Option<u64> {
        let class = self.class_for(block_size);
        for upper in class + 1..self.class_sizes.len() {
            if let Some(head) = self.head(nvm, upper) {
                return Some(head);
            }
        }

        let mut current = self.head(nvm, class);
        while let Some(start) = current {
            if self.block_size(nvm, start) >= block_size {
                return Some(start);
            }
            current = self.next(nvm, start);
        }
        None
    }

    fn field_width<N: NonVolatileMemory + ?Sized>(&self, nvm: &N, start: u64) -> u64 {
        match marker::read_right(nvm, start - 1) {
            Some(Marker::Free(width)) => u64::from(width),
            other => panic!(
                "Not a linked free block: start={}, marker={:?}",
                start, other
            ),
        }
    }
}
