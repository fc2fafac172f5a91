//! テスト用のヒープ検査器.
//!
//! ブロック領域を先頭から走査して、構造とステータスの整合性を確認する.
use std::collections::HashSet;

use super::free_list::{self, FreeBlockLists};
use super::marker::{self, Marker, MIN_LINKED_FREE_BLOCK_SIZE, POINTER_SIZE};
use super::{SmallObjectHeap, Status};
use crate::nvm::NonVolatileMemory;

/// ヒープの全体を検査して、不整合があればパニックする.
///
/// 確認項目:
///
/// - ブロック群がブロック領域を隙間なく埋めていること
/// - 各ブロックの両端のマーカーが一致していること
/// - 空きリストにリンクされているブロックの集合が、実際の空きブロックの集合と一致すること
/// - `Status`の値が、走査結果と一致すること
pub fn check_heap<N: NonVolatileMemory>(heap: &SmallObjectHeap<N>) {
    let nvm = &heap.nvm;
    let lists = &heap.free_lists;
    let max_block_size = u64::from(heap.status.max_block_size());
    let last_marker = lists.base() - 1;

    let mut expected = Status::new(heap.status.size(), heap.status.max_block_size(), 0);
    expected.free_blocks = 0;
    expected.free_small_blocks = 0;

    let mut linked = HashSet::new();
    let mut markers = 1;
    let mut fields = 0;
    let mut position = 0;
    while position < last_marker {
        let start = position + 1;
        let (_, right) = marker::read_nibbles(nvm, position);
        let block_marker = Marker::decode(right)
            .unwrap_or_else(|| panic!("Invalid marker: position={}, nibble={}", position, right));
        let size = match block_marker {
            Marker::SmallFree => {
                let size = u64::from(nvm.read_u8(start));
                assert!(0 < size && size < MIN_LINKED_FREE_BLOCK_SIZE);
                assert_eq!(u64::from(nvm.read_u8(start + size - 1)), size);
                expected.add_free_block(size);
                size
            }
            Marker::Free(width) => {
                let w = u64::from(width);
                let size = marker::read_length_field(nvm, start, w);
                assert!(size >= MIN_LINKED_FREE_BLOCK_SIZE, "start={}", start);
                assert_eq!(marker::free_length_field_size(size), width);
                assert_eq!(marker::read_length_field(nvm, start + size - w, w), size);
                expected.add_free_block(size);
                linked.insert(start);
                size
            }
            Marker::Allocated(width) => {
                let w = u64::from(width);
                let payload = marker::read_length_field(nvm, start, w);
                assert_eq!(marker::length_field_size(payload), width);
                assert!(payload <= max_block_size);
                expected.allocated_payload += payload;
                expected.allocated_blocks += 1;
                fields += w;
                w + payload
            }
            Marker::Chained => {
                let next = free_list::read_pointer(nvm, start);
                assert!(next < last_marker, "start={}, next={}", start, next);
                assert!(marker::read_right(nvm, next - 1).map_or(false, |m| m.is_allocated()));
                expected.allocated_payload += max_block_size;
                expected.allocated_blocks += 1;
                fields += POINTER_SIZE;
                POINTER_SIZE + max_block_size
            }
            Marker::SingleByteGap => 0,
        };

        let end = start + size;
        assert!(end <= last_marker, "start={}, size={}", start, size);
        let (left, _) = marker::read_nibbles(nvm, end);
        assert_eq!(
            Marker::decode(left),
            Some(block_marker),
            "Marker mismatch: start={}, end={}",
            start,
            end
        );
        markers += 1;
        position = end;
    }
    assert_eq!(position, last_marker);

    check_free_lists(nvm, lists, &linked);

    assert_eq!(heap.status, expected);

    // 空き領域とペイロードの合計に、枠のオーバヘッドを加えるとブロック領域のサイズとなる
    assert_eq!(
        expected.free_space + expected.allocated_payload + markers + fields,
        lists.base()
    );
}

fn check_free_lists<N: NonVolatileMemory>(nvm: &N, lists: &FreeBlockLists, linked: &HashSet<u64>) {
    let mut seen = 0;
    for class in 0..lists.class_sizes().len() {
        let mut prev = lists.root(class);
        let mut current = lists.head(nvm, class);
        while let Some(start) = current {
            assert!(linked.contains(&start), "Unknown free block: start={}", start);
            let size = lists.block_size(nvm, start);
            assert_eq!(lists.class_for(size), class, "start={}, size={}", start, size);

            let width = u64::from(marker::free_length_field_size(size));
            assert_eq!(free_list::read_pointer(nvm, start + width), prev);

            seen += 1;
            assert!(seen <= linked.len(), "Cyclic free list");
            prev = start;
            current = lists.next(nvm, start);
        }
    }
    assert_eq!(seen, linked.len());
}
