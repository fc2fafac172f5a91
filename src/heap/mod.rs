//! 小さなオブジェクト群を格納するためのヒープ.
//!
//! 一つの平坦なメモリ領域([NonVolatileMemory])の上に、数百万個規模の小さなオブジェクトを
//! 少ないオーバヘッドで詰め込むためのアロケータを提供する.
//!
//! # 領域の構成
//!
//! ```text
//! [block area ....................................][free list roots]
//! 0                                               base            size
//! ```
//!
//! - **ブロック領域**:
//!   - 割当済みブロックと空きブロックが、隙間なく並んでいる
//!   - 各ブロックはマーカーバイトで区切られており、その詳細は[marker]モジュールを参照のこと
//! - **空きリストの根**:
//!   - サイズクラス毎の空きブロックリストの先頭へのポインタ群
//!
//! # 割当戦略
//!
//! 要求サイズが属するクラスより上のクラスに空きブロックがあればその先頭を採用し、
//! なければ要求サイズが属するクラスのリストを線形に走査する(クラス内のFirstFit).
//!
//! 選択された空きブロックに余剰がある場合には、それは新しい空きブロックとして切り出される.
//! 余剰が1バイトの場合には、それはマーカーバイトとして扱われる.
//!
//! 解放時には、左右に隣接する空きブロックと即座に結合される.
//!
//! # 排他制御
//!
//! [SmallObjectHeap]自体は一切の排他制御を行わない.
//! 複数のスレッドから利用する場合には[Device](../device/struct.Device.html)を経由すること.
//!
//! [NonVolatileMemory]: ../nvm/trait.NonVolatileMemory.html
//! [marker]: marker/index.html
//! [SmallObjectHeap]: struct.SmallObjectHeap.html
use byteorder::{ByteOrder, LittleEndian};
use prometrics::metrics::MetricBuilder;
use slog::Logger;
use std::cmp;

pub use self::address::Address;
pub use self::builder::HeapBuilder;
pub use self::status::Status;

use self::free_list::FreeBlockLists;
use self::marker::{Marker, MIN_LINKED_FREE_BLOCK_SIZE};
use crate::metrics::HeapMetrics;
use crate::nvm::NonVolatileMemory;
use crate::Result;

pub mod marker;

mod address;
mod builder;
mod free_list;
mod snapshot;
mod status;
#[cfg(test)]
mod walker;

/// 最大ブロックサイズのデフォルト値(8MiB).
pub const DEFAULT_MAX_BLOCK_SIZE: u32 = 1 << 23;

/// ヒープの最小サイズ.
pub const MIN_HEAP_SIZE: u64 = 128;

/// ヒープの最大サイズ.
///
/// ヒープ内のポインタは5バイトなので、それで表現可能な範囲に制限される.
pub const MAX_HEAP_SIZE: u64 = Address::MAX;

/// 予約直後のチェインのセグメントに書き込まれる継続先アドレス.
///
/// 全てのセグメントの予約が完了した時点で、実際の継続先に置き換えられる.
const UNLINKED_SEGMENT: u64 = 0xFF_FFFF_FFFF;

/// 小さなオブジェクト群用のヒープ.
///
/// [モジュールドキュメント](index.html)も参照のこと.
///
/// # 契約違反
///
/// 以下は呼び出し側の契約違反であり、検出された場合にはパニックする:
///
/// - サイズが`0`の割当要求
/// - 割当済みブロック以外を指すアドレスの指定(二重解放を含む)
/// - ブロックのペイロードの範囲外へのアクセス
///
/// 領域不足は契約違反ではなく、割当系メソッドが`None`を返すことで通知される.
#[derive(Debug)]
pub struct SmallObjectHeap<N> {
    nvm: N,
    free_lists: FreeBlockLists,
    status: Status,
    metrics: HeapMetrics,
    logger: Logger,
}
impl<N> SmallObjectHeap<N>
where
    N: NonVolatileMemory,
{
    /// デフォルト設定で、`nvm`全体を使ったヒープを新規に作成する.
    ///
    /// 設定を変更したい場合には`HeapBuilder`を使用すること.
    pub fn create(nvm: N) -> Result<Self> {
        track!(HeapBuilder::new().create(nvm))
    }

    pub(crate) fn format(
        mut nvm: N,
        max_block_size: u32,
        metrics: &MetricBuilder,
        logger: Logger,
    ) -> Self {
        let size = nvm.capacity();
        nvm.fill(0, size, 0);

        let free_lists = FreeBlockLists::new(size);
        let initial_free_block = free_lists.base() - 2;
        let mut heap = SmallObjectHeap {
            nvm,
            free_lists,
            status: Status::new(size, max_block_size, initial_free_block),
            metrics: HeapMetrics::new(metrics, size),
            logger,
        };
        heap.create_free_block(1, initial_free_block);
        info!(heap.logger, "Heap created";
              "size" => size,
              "max_block_size" => max_block_size,
              "classes" => heap.free_lists.class_sizes().len());
        heap
    }

    pub(crate) fn from_parts(
        nvm: N,
        free_lists: FreeBlockLists,
        status: Status,
        metrics: &MetricBuilder,
        logger: Logger,
    ) -> Self {
        let metrics = HeapMetrics::new(metrics, status.size());
        SmallObjectHeap {
            nvm,
            free_lists,
            status,
            metrics,
            logger,
        }
    }

    /// `size`バイトのペイロードを有するブロックを割り当てる.
    ///
    /// `size`が最大ブロックサイズを超える場合には、複数のセグメントをチェインさせたブロックが割り当てられる.
    ///
    /// 十分な空き領域が存在しない場合には`None`が返される.
    /// その場合、ヒープの状態は変更されない.
    pub fn malloc(&mut self, size: u64) -> Option<Address> {
        assert!(size > 0, "Zero-sized allocation");
        let reserved = if size > u64::from(self.status.max_block_size()) {
            self.malloc_chained(size)
        } else {
            self.reserve_block(size, Marker::Allocated(marker::length_field_size(size)))
        };
        if let Some(start) = reserved {
            self.metrics.count_allocation(size);
            Some(Address::new(start))
        } else {
            self.metrics.nospace_failures.increment();
            debug!(self.logger, "No available space"; "size" => size);
            None
        }
    }

    /// `sizes`の各要素をペイロードサイズとする複数のブロックを、一度の探索でまとめて割り当てる.
    ///
    /// 全てのブロックは一つの連続した空きブロックから、マーカーバイトを共有する形で切り出される.
    ///
    /// 十分な大きさの連続した空きブロックが存在しない場合には`None`が返される.
    /// その場合に、個別の割当で代替したい場合には`malloc_each`を使用すること.
    ///
    /// # Panics
    ///
    /// `sizes`が空の場合や、要素の値が`1..=max_block_size`の範囲外の場合にはパニックする.
    pub fn multi_malloc(&mut self, sizes: &[u64]) -> Option<Vec<Address>> {
        assert!(!sizes.is_empty(), "Empty allocation request");
        let max_block_size = u64::from(self.status.max_block_size());
        let mut span = sizes.len() as u64 - 1;
        for &size in sizes {
            assert!(
                0 < size && size <= max_block_size,
                "size={}, max_block_size={}",
                size,
                max_block_size
            );
            span += u64::from(marker::length_field_size(size)) + size;
        }

        let start = if let Some(start) = self.reserve(span) {
            start
        } else {
            self.metrics.nospace_failures.increment();
            debug!(self.logger, "No available space for multiple blocks";
                   "count" => sizes.len(), "span" => span);
            return None;
        };

        let mut addresses = Vec::with_capacity(sizes.len());
        let mut position = start;
        let mut payload = 0;
        for &size in sizes {
            let marker = Marker::Allocated(marker::length_field_size(size));
            let block_size = marker.field_size() + size;
            self.write_block_frame(position, marker, block_size, size);
            addresses.push(Address::new(position));
            position += block_size + 1;
            payload += size;
        }
        debug_assert_eq!(position, start + span + 1);

        self.status.allocated_payload += payload;
        self.status.allocated_blocks += sizes.len() as u64;
        self.metrics.count_multi_allocation(payload);
        Some(addresses)
    }

    /// `multi_malloc`の各ブロックのサイズが全て等しい場合の簡易版.
    pub fn multi_malloc_repeated(&mut self, size: u64, count: usize) -> Option<Vec<Address>> {
        self.multi_malloc(&vec![size; count])
    }

    /// `sizes`の各要素に対して個別に`malloc`を呼び出す.
    ///
    /// 途中で割当に失敗した場合には、それまでに割り当てたブロック群を逆順に解放した上で`None`を返す.
    pub fn malloc_each(&mut self, sizes: &[u64]) -> Option<Vec<Address>> {
        let mut addresses = Vec::with_capacity(sizes.len());
        for &size in sizes {
            if let Some(address) = self.malloc(size) {
                addresses.push(address);
            } else {
                for &address in addresses.iter().rev() {
                    self.free(address);
                }
                return None;
            }
        }
        Some(addresses)
    }

    /// `address`のブロックを解放する.
    ///
    /// チェインされたブロックの場合には、全てのセグメントが解放される.
    ///
    /// # Panics
    ///
    /// `address`が割当済みのブロックを指していない場合にはパニックする.
    pub fn free(&mut self, address: Address) {
        let mut segment = address.as_u64();
        let mut released = 0;
        loop {
            let marker = self.segment_marker(segment);
            let next = if marker == Marker::Chained {
                Some(free_list::read_pointer(&self.nvm, segment))
            } else {
                None
            };
            released += self.free_segment(segment);
            if let Some(next) = next {
                segment = next;
            } else {
                break;
            }
        }
        self.metrics.count_releasion(released);
    }

    /// `address`のブロックのペイロードサイズを返す.
    ///
    /// チェインされたブロックの場合には、全セグメントの合計値が返される.
    pub fn size_of(&self, address: Address) -> u64 {
        let max_block_size = u64::from(self.status.max_block_size());
        let mut segment = address.as_u64();
        let mut size = 0;
        loop {
            match self.segment_marker(segment) {
                Marker::Chained => {
                    size += max_block_size;
                    segment = free_list::read_pointer(&self.nvm, segment);
                }
                Marker::Allocated(width) => {
                    size += marker::read_length_field(&self.nvm, segment, u64::from(width));
                    return size;
                }
                _ => unreachable!(),
            }
        }
    }

    /// `address`が割当済みのブロックの先頭を指しているように見えるかどうかを判定する.
    ///
    /// 直前のマーカーのみを見た簡易的な判定のため、
    /// ペイロードの途中を指すアドレスを誤って受け入れることはあり得る.
    pub fn is_allocated(&self, address: Address) -> bool {
        let position = address.as_u64();
        0 < position
            && position < self.block_area_size() - 1
            && marker::read_right(&self.nvm, position - 1).map_or(false, |m| m.is_allocated())
    }

    /// ペイロードの`offset`の位置から、`buf.len()`バイトを読み込む.
    pub fn read_bytes(&self, address: Address, offset: u64, buf: &mut [u8]) {
        let (mut segment, mut offset) = self.seek(address, offset, buf.len() as u64);
        let mut done = 0;
        while done < buf.len() {
            let (position, len) = self.extent(segment, offset, (buf.len() - done) as u64);
            let len = len as usize;
            self.nvm.read_bytes(position, &mut buf[done..done + len]);
            done += len;
            if done < buf.len() {
                segment = free_list::read_pointer(&self.nvm, segment);
                offset = 0;
            }
        }
    }

    /// ペイロードの`offset`の位置に、`buf`の内容を書き込む.
    pub fn write_bytes(&mut self, address: Address, offset: u64, buf: &[u8]) {
        let (mut segment, mut offset) = self.seek(address, offset, buf.len() as u64);
        let mut done = 0;
        while done < buf.len() {
            let (position, len) = self.extent(segment, offset, (buf.len() - done) as u64);
            let len = len as usize;
            self.nvm.write_bytes(position, &buf[done..done + len]);
            done += len;
            if done < buf.len() {
                segment = free_list::read_pointer(&self.nvm, segment);
                offset = 0;
            }
        }
    }

    /// ペイロードの`offset`の位置から`len`バイトを`value`で埋める.
    pub fn fill(&mut self, address: Address, offset: u64, len: u64, value: u8) {
        let (mut segment, mut offset) = self.seek(address, offset, len);
        let mut done = 0;
        while done < len {
            let (position, n) = self.extent(segment, offset, len - done);
            self.nvm.fill(position, n, value);
            done += n;
            if done < len {
                segment = free_list::read_pointer(&self.nvm, segment);
                offset = 0;
            }
        }
    }

    /// ペイロードの`offset`の位置から1バイトを読み込む.
    pub fn read_u8(&self, address: Address, offset: u64) -> u8 {
        let mut buf = [0; 1];
        self.read_bytes(address, offset, &mut buf);
        buf[0]
    }

    /// ペイロードの`offset`の位置から2バイト整数を読み込む.
    pub fn read_u16(&self, address: Address, offset: u64) -> u16 {
        let mut buf = [0; 2];
        self.read_bytes(address, offset, &mut buf);
        LittleEndian::read_u16(&buf)
    }

    /// ペイロードの`offset`の位置から4バイト整数を読み込む.
    pub fn read_u32(&self, address: Address, offset: u64) -> u32 {
        let mut buf = [0; 4];
        self.read_bytes(address, offset, &mut buf);
        LittleEndian::read_u32(&buf)
    }

    /// ペイロードの`offset`の位置から8バイト整数を読み込む.
    pub fn read_u64(&self, address: Address, offset: u64) -> u64 {
        let mut buf = [0; 8];
        self.read_bytes(address, offset, &mut buf);
        LittleEndian::read_u64(&buf)
    }

    /// ペイロードの`offset`の位置に1バイトを書き込む.
    pub fn write_u8(&mut self, address: Address, offset: u64, value: u8) {
        self.write_bytes(address, offset, &[value]);
    }

    /// ペイロードの`offset`の位置に2バイト整数を書き込む.
    pub fn write_u16(&mut self, address: Address, offset: u64, value: u16) {
        let mut buf = [0; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.write_bytes(address, offset, &buf);
    }

    /// ペイロードの`offset`の位置に4バイト整数を書き込む.
    pub fn write_u32(&mut self, address: Address, offset: u64, value: u32) {
        let mut buf = [0; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_bytes(address, offset, &buf);
    }

    /// ペイロードの`offset`の位置に8バイト整数を書き込む.
    pub fn write_u64(&mut self, address: Address, offset: u64, value: u64) {
        let mut buf = [0; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.write_bytes(address, offset, &buf);
    }

    /// ペイロードの`offset`の位置から、`buf.len()`個の2バイト整数を読み込む.
    pub fn read_u16s(&self, address: Address, offset: u64, buf: &mut [u16]) {
        let mut bytes = vec![0; buf.len() * 2];
        self.read_bytes(address, offset, &mut bytes);
        LittleEndian::read_u16_into(&bytes, buf);
    }

    /// ペイロードの`offset`の位置から、`buf.len()`個の4バイト整数を読み込む.
    pub fn read_u32s(&self, address: Address, offset: u64, buf: &mut [u32]) {
        let mut bytes = vec![0; buf.len() * 4];
        self.read_bytes(address, offset, &mut bytes);
        LittleEndian::read_u32_into(&bytes, buf);
    }

    /// ペイロードの`offset`の位置から、`buf.len()`個の8バイト整数を読み込む.
    pub fn read_u64s(&self, address: Address, offset: u64, buf: &mut [u64]) {
        let mut bytes = vec![0; buf.len() * 8];
        self.read_bytes(address, offset, &mut bytes);
        LittleEndian::read_u64_into(&bytes, buf);
    }

    /// ペイロードの`offset`の位置に、2バイト整数の列を書き込む.
    pub fn write_u16s(&mut self, address: Address, offset: u64, values: &[u16]) {
        let mut bytes = vec![0; values.len() * 2];
        LittleEndian::write_u16_into(values, &mut bytes);
        self.write_bytes(address, offset, &bytes);
    }

    /// ペイロードの`offset`の位置に、4バイト整数の列を書き込む.
    pub fn write_u32s(&mut self, address: Address, offset: u64, values: &[u32]) {
        let mut bytes = vec![0; values.len() * 4];
        LittleEndian::write_u32_into(values, &mut bytes);
        self.write_bytes(address, offset, &bytes);
    }

    /// ペイロードの`offset`の位置に、8バイト整数の列を書き込む.
    pub fn write_u64s(&mut self, address: Address, offset: u64, values: &[u64]) {
        let mut bytes = vec![0; values.len() * 8];
        LittleEndian::write_u64_into(values, &mut bytes);
        self.write_bytes(address, offset, &bytes);
    }

    /// ヒープの利用状況を返す.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// ヒープのメトリクスを返す.
    pub fn metrics(&self) -> &HeapMetrics {
        &self.metrics
    }

    /// 一つのブロック(セグメント)に格納可能なペイロードの最大サイズを返す.
    pub fn max_block_size(&self) -> u32 {
        self.status.max_block_size()
    }

    /// 空きリストの根の領域の開始位置を返す.
    pub fn free_list_base(&self) -> u64 {
        self.free_lists.base()
    }

    /// 空きリストの各サイズクラスの閾値を返す.
    pub fn free_list_sizes(&self) -> &[u64] {
        self.free_lists.class_sizes()
    }

    /// ブロック領域のサイズを返す.
    pub fn block_area_size(&self) -> u64 {
        self.free_lists.base()
    }

    /// `position`のマーカーバイトを(左ニブル, 右ニブル)として読み込む.
    ///
    /// ヒープの構造を外部から検査するための補助メソッド.
    pub fn read_marker(&self, position: u64) -> (u8, u8) {
        marker::read_nibbles(&self.nvm, position)
    }

    /// `position`から`width`バイト幅の長さフィールドを読み込む.
    ///
    /// ヒープの構造を外部から検査するための補助メソッド.
    pub fn read_length_field(&self, position: u64, width: u64) -> u64 {
        marker::read_length_field(&self.nvm, position, width)
    }

    /// ヒープが使用しているメモリへの参照を返す.
    pub fn nvm(&self) -> &N {
        &self.nvm
    }

    /// ヒープを破棄して、使用していたメモリを返す.
    pub fn into_nvm(self) -> N {
        self.nvm
    }

    /// メモリの内容を物理デバイスに同期する.
    pub fn sync(&mut self) -> Result<()> {
        track!(self.nvm.sync())
    }

    fn malloc_chained(&mut self, size: u64) -> Option<u64> {
        if size > self.status.free_space() {
            return None;
        }

        let max_block_size = u64::from(self.status.max_block_size());
        let count = (size + max_block_size - 1) / max_block_size;
        let mut segments = Vec::with_capacity(count as usize);
        for i in 0..count {
            let reserved = if i + 1 < count {
                self.reserve_block(max_block_size, Marker::Chained)
            } else {
                let last = size - max_block_size * (count - 1);
                self.reserve_block(last, Marker::Allocated(marker::length_field_size(last)))
            };
            if let Some(segment) = reserved {
                segments.push(segment);
            } else {
                for &segment in segments.iter().rev() {
                    self.free_segment(segment);
                }
                return None;
            }
        }
        for pair in segments.windows(2) {
            free_list::write_pointer(&mut self.nvm, pair[0], pair[1]);
        }

        self.metrics.chained_mallocs.increment();
        debug!(self.logger, "Chained block allocated";
               "size" => size, "segments" => count, "head" => segments[0]);
        Some(segments[0])
    }

    /// `payload_size`バイトのペイロードを持つ、一つのブロック(セグメント)を割り当てる.
    fn reserve_block(&mut self, payload_size: u64, marker: Marker) -> Option<u64> {
        let block_size = marker.field_size() + payload_size;
        let start = self.reserve(block_size)?;
        let field = if marker == Marker::Chained {
            UNLINKED_SEGMENT
        } else {
            payload_size
        };
        self.write_block_frame(start, marker, block_size, field);
        self.status.allocated_payload += payload_size;
        self.status.allocated_blocks += 1;
        Some(start)
    }

    /// `block_size`バイト以上の空きブロックを探して、その先頭から`block_size`バイトを切り出す.
    ///
    /// 切り出された領域の枠(マーカーと長さフィールド)の書き込みは、呼び出し側の責務.
    fn reserve(&mut self, block_size: u64) -> Option<u64> {
        let start = self.free_lists.find_fit(&self.nvm, block_size)?;
        let free_size = self.free_lists.block_size(&self.nvm, start);
        debug_assert!(free_size >= block_size);

        self.free_lists.unlink(&mut self.nvm, start);
        self.status.remove_free_block(free_size);
        if free_size == block_size + 1 {
            // 余った1バイトはマーカーとして扱う
            marker::write_right(&mut self.nvm, start + block_size, Marker::SingleByteGap);
            marker::write_left(&mut self.nvm, start + free_size, Marker::SingleByteGap);
        } else if free_size > block_size + 1 {
            let remainder = free_size - block_size - 1;
            self.create_free_block(start + block_size + 1, remainder);
            self.status.add_free_block(remainder);
        }
        Some(start)
    }

    fn write_block_frame(&mut self, start: u64, marker: Marker, block_size: u64, field: u64) {
        marker::write_right(&mut self.nvm, start - 1, marker);
        marker::write_left(&mut self.nvm, start + block_size, marker);
        marker::write_length_field(&mut self.nvm, start, field, marker.field_size());
    }

    /// 一つのセグメントを解放して、隣接する空きブロックと結合する.
    ///
    /// 解放されたペイロードのバイト数を返す.
    fn free_segment(&mut self, start: u64) -> u64 {
        let marker = self.segment_marker(start);
        let width = marker.field_size();
        let payload_size = if marker == Marker::Chained {
            u64::from(self.status.max_block_size())
        } else {
            marker::read_length_field(&self.nvm, start, width)
        };
        let end = start + width + payload_size;

        let mut block_start = start;
        let mut block_size = width + payload_size;
        if start - 1 != 0 {
            match marker::read_left(&self.nvm, start - 1) {
                Some(Marker::SmallFree) => {
                    let size = u64::from(self.nvm.read_u8(start - 2));
                    block_start -= size + 1;
                    block_size += size + 1;
                    self.status.remove_free_block(size);
                }
                Some(Marker::Free(w)) => {
                    let w = u64::from(w);
                    let size = marker::read_length_field(&self.nvm, start - 1 - w, w);
                    block_start -= size + 1;
                    block_size += size + 1;
                    self.free_lists.unlink(&mut self.nvm, block_start);
                    self.status.remove_free_block(size);
                }
                Some(Marker::SingleByteGap) => {
                    block_start -= 1;
                    block_size += 1;
                }
                _ => {}
            }
        }
        if end != self.block_area_size() - 1 {
            match marker::read_right(&self.nvm, end) {
                Some(Marker::SmallFree) => {
                    let size = u64::from(self.nvm.read_u8(end + 1));
                    block_size += size + 1;
                    self.status.remove_free_block(size);
                }
                Some(Marker::Free(w)) => {
                    let size = marker::read_length_field(&self.nvm, end + 1, u64::from(w));
                    block_size += size + 1;
                    self.free_lists.unlink(&mut self.nvm, end + 1);
                    self.status.remove_free_block(size);
                }
                Some(Marker::SingleByteGap) => {
                    block_size += 1;
                }
                _ => {}
            }
        }

        self.create_free_block(block_start, block_size);
        self.status.add_free_block(block_size);
        self.status.allocated_payload -= payload_size;
        self.status.allocated_blocks -= 1;
        payload_size
    }

    /// `start`から`size`バイトの空きブロックを作成する.
    ///
    /// 十分な大きさがある場合には、対応する空きリストにリンクされる.
    fn create_free_block(&mut self, start: u64, size: u64) {
        debug_assert!(size > 0);
        let marker = if size < MIN_LINKED_FREE_BLOCK_SIZE {
            self.nvm.write_u8(start, size as u8);
            self.nvm.write_u8(start + size - 1, size as u8);
            Marker::SmallFree
        } else {
            let width = marker::free_length_field_size(size);
            let w = u64::from(width);
            marker::write_length_field(&mut self.nvm, start, size, w);
            marker::write_length_field(&mut self.nvm, start + size - w, size, w);
            Marker::Free(width)
        };
        marker::write_right(&mut self.nvm, start - 1, marker);
        marker::write_left(&mut self.nvm, start + size, marker);
        if marker != Marker::SmallFree {
            self.free_lists.link(&mut self.nvm, start, size);
        }
    }

    fn segment_marker(&self, segment: u64) -> Marker {
        match marker::read_right(&self.nvm, segment - 1) {
            Some(m) if m.is_allocated() => m,
            other => panic!(
                "Not an allocated block: address={}, marker={:?}",
                Address::new(segment),
                other
            ),
        }
    }

    /// ペイロードの`offset`から`len`バイトの範囲が、ブロック内に収まっていることを確認した上で、
    /// `offset`を含むセグメントと、そのセグメント内でのオフセットを返す.
    fn seek(&self, address: Address, offset: u64, len: u64) -> (u64, u64) {
        let size = self.size_of(address);
        assert!(
            offset.checked_add(len).map_or(false, |end| end <= size),
            "Out of range access: address={}, offset={}, len={}, size={}",
            address,
            offset,
            len,
            size
        );

        let max_block_size = u64::from(self.status.max_block_size());
        let mut segment = address.as_u64();
        let mut offset = offset;
        while offset >= max_block_size && self.segment_marker(segment) == Marker::Chained {
            segment = free_list::read_pointer(&self.nvm, segment);
            offset -= max_block_size;
        }
        (segment, offset)
    }

    /// セグメント内の`offset`から、最大`len`バイトの連続した範囲を返す.
    ///
    /// 返り値は、メモリ上の開始位置と、実際の範囲のバイト数.
    fn extent(&self, segment: u64, offset: u64, len: u64) -> (u64, u64) {
        let marker = self.segment_marker(segment);
        let width = marker.field_size();
        let capacity = if marker == Marker::Chained {
            u64::from(self.status.max_block_size())
        } else {
            marker::read_length_field(&self.nvm, segment, width)
        };
        debug_assert!(offset < capacity);
        (segment + width + offset, cmp::min(len, capacity - offset))
    }
}
