//! ヒープのスナップショット.
//!
//! # フォーマット
//!
//! ヘッダの整数値は全てビッグエンディアン:
//!
//! ```text
//! i32       max_block_size
//! i64       free_list_base
//! i32       free_list_trailer_size
//! i32       class_sizes.len()
//! i64[]     class_sizes
//! i32       class_count
//! Status    size:i64, max_block_size:i32, free_space:i64, allocated_payload:i64,
//!           allocated_blocks:i64, free_blocks:i64, free_small_blocks:i64
//! i64       SEPARATOR
//! u8[size]  heap image (SNAPSHOT_CHUNK_SIZE単位で書き出される)
//! ```
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use prometrics::metrics::MetricBuilder;
use slog::Logger;
use std::cmp;
use std::io::{Read, Write};

use crate::heap::free_list::FreeBlockLists;
use crate::heap::marker::POINTER_SIZE;
use crate::heap::{SmallObjectHeap, Status, MAX_HEAP_SIZE, MIN_HEAP_SIZE};
use crate::nvm::NonVolatileMemory;
use crate::{ErrorKind, Result};

/// ヘッダとヒープ本体の区切りを示す番兵値("SOHSNAP!").
pub const SEPARATOR: u64 = 0x534F_4853_4E41_5021;

/// ヒープ本体の読み書きの単位.
pub const SNAPSHOT_CHUNK_SIZE: usize = 1024 * 1024;

/// スナップショットのヘッダ.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SnapshotHeader {
    max_block_size: u32,
    free_list_base: u64,
    free_list_trailer_size: u32,
    class_sizes: Vec<u64>,
    status: Status,
}
impl SnapshotHeader {
    fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let max_block_size = track_io!(reader.read_i32::<BigEndian>())?;
        let free_list_base = track_io!(reader.read_i64::<BigEndian>())?;
        let free_list_trailer_size = track_io!(reader.read_i32::<BigEndian>())?;
        track_assert!(max_block_size > 0, ErrorKind::InvalidInput; max_block_size);
        track_assert!(free_list_base > 0, ErrorKind::InvalidInput; free_list_base);
        track_assert!(free_list_trailer_size >= 0, ErrorKind::InvalidInput; free_list_trailer_size);

        let table_len = track_io!(reader.read_i32::<BigEndian>())?;
        track_assert!(0 <= table_len && table_len < 64, ErrorKind::InvalidInput; table_len);
        let mut class_sizes = Vec::with_capacity(table_len as usize);
        for _ in 0..table_len {
            let size = track_io!(reader.read_i64::<BigEndian>())?;
            track_assert!(size > 0, ErrorKind::InvalidInput; size);
            class_sizes.push(size as u64);
        }
        let class_count = track_io!(reader.read_i32::<BigEndian>())?;
        track_assert_eq!(class_count, table_len, ErrorKind::InvalidInput);

        let status = track!(read_status(&mut reader))?;

        let separator = track_io!(reader.read_u64::<BigEndian>())?;
        track_assert_eq!(
            separator,
            SEPARATOR,
            ErrorKind::HeapCorrupted,
            "Snapshot separator mismatch"
        );

        Ok(SnapshotHeader {
            max_block_size: max_block_size as u32,
            free_list_base: free_list_base as u64,
            free_list_trailer_size: free_list_trailer_size as u32,
            class_sizes,
            status,
        })
    }

    fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        track_io!(writer.write_i32::<BigEndian>(self.max_block_size as i32))?;
        track_io!(writer.write_i64::<BigEndian>(self.free_list_base as i64))?;
        track_io!(writer.write_i32::<BigEndian>(self.free_list_trailer_size as i32))?;
        track_io!(writer.write_i32::<BigEndian>(self.class_sizes.len() as i32))?;
        for &size in &self.class_sizes {
            track_io!(writer.write_i64::<BigEndian>(size as i64))?;
        }
        track_io!(writer.write_i32::<BigEndian>(self.class_sizes.len() as i32))?;
        track!(write_status(&mut writer, &self.status))?;
        track_io!(writer.write_u64::<BigEndian>(SEPARATOR))?;
        Ok(())
    }

    /// ヘッダ内の値同士、およびヒープの格納先との整合性を確認する.
    fn validate(&self, capacity: u64) -> Result<()> {
        let status = &self.status;
        track_assert_eq!(
            status.size(),
            capacity,
            ErrorKind::InvalidInput,
            "Heap size mismatch"
        );
        track_assert!(
            MIN_HEAP_SIZE <= status.size() && status.size() <= MAX_HEAP_SIZE,
            ErrorKind::InvalidInput;
            status.size()
        );
        track_assert_eq!(
            status.max_block_size(),
            self.max_block_size,
            ErrorKind::InvalidInput
        );
        track_assert_eq!(
            u64::from(self.free_list_trailer_size),
            POINTER_SIZE * self.class_sizes.len() as u64,
            ErrorKind::InvalidInput
        );
        track_assert_eq!(
            self.free_list_base + u64::from(self.free_list_trailer_size),
            status.size(),
            ErrorKind::InvalidInput
        );
        track_assert!(
            status.free_space() + status.allocated_payload() <= self.free_list_base,
            ErrorKind::InvalidInput
        );
        Ok(())
    }
}

fn read_status<R: Read>(mut reader: R) -> Result<Status> {
    let size = track_io!(reader.read_i64::<BigEndian>())?;
    let max_block_size = track_io!(reader.read_i32::<BigEndian>())?;
    let mut values = [0; 5];
    for v in &mut values {
        *v = track_io!(reader.read_i64::<BigEndian>())?;
        track_assert!(*v >= 0, ErrorKind::InvalidInput; *v);
    }
    track_assert!(size >= 0, ErrorKind::InvalidInput; size);
    track_assert!(max_block_size > 0, ErrorKind::InvalidInput; max_block_size);
    Ok(Status {
        size: size as u64,
        max_block_size: max_block_size as u32,
        free_space: values[0] as u64,
        allocated_payload: values[1] as u64,
        allocated_blocks: values[2] as u64,
        free_blocks: values[3] as u64,
        free_small_blocks: values[4] as u64,
    })
}

fn write_status<W: Write>(mut writer: W, status: &Status) -> Result<()> {
    track_io!(writer.write_i64::<BigEndian>(status.size as i64))?;
    track_io!(writer.write_i32::<BigEndian>(status.max_block_size as i32))?;
    track_io!(writer.write_i64::<BigEndian>(status.free_space as i64))?;
    track_io!(writer.write_i64::<BigEndian>(status.allocated_payload as i64))?;
    track_io!(writer.write_i64::<BigEndian>(status.allocated_blocks as i64))?;
    track_io!(writer.write_i64::<BigEndian>(status.free_blocks as i64))?;
    track_io!(writer.write_i64::<BigEndian>(status.free_small_blocks as i64))?;
    Ok(())
}

impl<N> SmallObjectHeap<N>
where
    N: NonVolatileMemory,
{
    /// ヒープのスナップショットを`writer`に書き出す.
    ///
    /// スナップショットにはヒープのバイト列がそのまま含まれるため、
    /// 復元後のヒープでも、既存のアドレスはそのまま有効となる.
    ///
    /// 復元には`HeapBuilder::load`を使用する.
    pub fn dump<W: Write>(&self, mut writer: W) -> Result<()> {
        let header = SnapshotHeader {
            max_block_size: self.status.max_block_size(),
            free_list_base: self.free_lists.base(),
            free_list_trailer_size: self.free_lists.trailer_size() as u32,
            class_sizes: self.free_lists.class_sizes().to_owned(),
            status: self.status.clone(),
        };
        track!(header.write_to(&mut writer))?;

        let size = self.status.size();
        let mut buf = vec![0; cmp::min(size, SNAPSHOT_CHUNK_SIZE as u64) as usize];
        let mut position = 0;
        while position < size {
            let len = cmp::min(size - position, buf.len() as u64) as usize;
            self.nvm.read_bytes(position, &mut buf[..len]);
            track_io!(writer.write_all(&buf[..len]))?;
            position += len as u64;
        }
        info!(self.logger, "Heap dumped"; "size" => size);
        Ok(())
    }

    pub(crate) fn restore<R: Read>(
        mut nvm: N,
        mut reader: R,
        metrics: &MetricBuilder,
        logger: Logger,
    ) -> Result<Self> {
        let header = track!(SnapshotHeader::read_from(&mut reader))?;
        track!(header.validate(nvm.capacity()))?;

        let size = header.status.size();
        let mut buf = vec![0; cmp::min(size, SNAPSHOT_CHUNK_SIZE as u64) as usize];
        let mut position = 0;
        while position < size {
            let len = cmp::min(size - position, buf.len() as u64) as usize;
            track_io!(reader.read_exact(&mut buf[..len]))?;
            nvm.write_bytes(position, &buf[..len]);
            position += len as u64;
        }

        let free_lists = FreeBlockLists::from_parts(header.free_list_base, header.class_sizes);
        info!(logger, "Heap loaded";
              "size" => size,
              "max_block_size" => header.max_block_size,
              "allocated_blocks" => header.status.allocated_blocks());
        Ok(SmallObjectHeap::from_parts(
            nvm,
            free_lists,
            header.status,
            metrics,
            logger,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use tempdir::TempDir;
    use trackable::result::TestResult;

    use super::*;
    use crate::heap::walker::check_heap;
    use crate::heap::{Address, HeapBuilder};
    use crate::nvm::{MemoryNvm, MmapNvm};

    fn populated_heap() -> Result<(SmallObjectHeap<MemoryNvm>, Vec<(Address, u64)>)> {
        let mut heap = track!(HeapBuilder::new()
            .max_block_size(200)
            .create(MemoryNvm::with_capacity(8192)))?;
        let mut live = Vec::new();
        for i in 0..20u64 {
            let size = i * 37 % 500 + 1;
            let a = heap.malloc(size).expect("malloc");
            heap.fill(a, 0, size, i as u8);
            live.push((a, size));
        }
        for i in (0..20).step_by(3).rev() {
            let (a, _) = live.remove(i);
            heap.free(a);
        }
        Ok((heap, live))
    }

    #[test]
    fn dump_and_load_works() -> TestResult {
        let (heap, live) = track!(populated_heap())?;
        let mut snapshot = Vec::new();
        track!(heap.dump(&mut snapshot))?;

        let loaded = track!(HeapBuilder::new().load(MemoryNvm::with_capacity(8192), &snapshot[..]))?;
        check_heap(&loaded);
        assert_eq!(loaded.status(), heap.status());
        assert_eq!(loaded.free_list_base(), heap.free_list_base());
        assert_eq!(loaded.free_list_sizes(), heap.free_list_sizes());
        assert_eq!(loaded.nvm().as_bytes(), heap.nvm().as_bytes());
        for &(a, size) in &live {
            assert_eq!(loaded.size_of(a), size);
            let mut expected = vec![0; size as usize];
            let mut actual = vec![0; size as usize];
            heap.read_bytes(a, 0, &mut expected);
            loaded.read_bytes(a, 0, &mut actual);
            assert_eq!(actual, expected);
        }

        // 復元後のヒープも通常通り操作可能
        let mut loaded = loaded;
        for &(a, _) in &live {
            loaded.free(a);
        }
        check_heap(&loaded);
        assert_eq!(loaded.status().free_blocks(), 1);
        Ok(())
    }

    #[test]
    fn header_layout_works() -> TestResult {
        let heap = track!(HeapBuilder::new().create(MemoryNvm::with_capacity(1024)))?;
        let mut snapshot = Vec::new();
        track!(heap.dump(&mut snapshot))?;

        // 4 + 8 + 4 + (4 + 8 * 8) + 4 + (8 + 4 + 8 * 5) + 8
        let header_size = 148;
        assert_eq!(snapshot.len(), header_size + 1024);
        assert_eq!(&snapshot[0..4], &[0, 0x80, 0, 0]);
        assert_eq!(&snapshot[4..12], &[0, 0, 0, 0, 0, 0, 0x03, 0xD8]);
        assert_eq!(&snapshot[header_size - 8..header_size], b"SOHSNAP!");
        assert_eq!(&snapshot[header_size..], heap.nvm().as_bytes());
        Ok(())
    }

    #[test]
    fn broken_snapshot_is_rejected() -> TestResult {
        let (heap, _) = track!(populated_heap())?;
        let mut snapshot = Vec::new();
        track!(heap.dump(&mut snapshot))?;

        // 容量違い
        let e = HeapBuilder::new()
            .load(MemoryNvm::with_capacity(4096), &snapshot[..])
            .err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        // 番兵値の破損
        let mut broken = snapshot.clone();
        let separator_position = snapshot.len() - 8192 - 1;
        broken[separator_position] ^= 0xFF;
        let e = HeapBuilder::new()
            .load(MemoryNvm::with_capacity(8192), &broken[..])
            .err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::HeapCorrupted));

        // 途中で途切れている
        let truncated = &snapshot[..snapshot.len() - 100];
        let e = HeapBuilder::new()
            .load(MemoryNvm::with_capacity(8192), Cursor::new(truncated))
            .err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::HeapCorrupted));
        Ok(())
    }

    #[test]
    fn load_into_mmap_works() -> TestResult {
        let dir = track_io!(TempDir::new("soheap_test"))?;
        let path = dir.path().join("heap.soh");
        let (heap, live) = track!(populated_heap())?;
        let mut snapshot = Vec::new();
        track!(heap.dump(&mut snapshot))?;

        {
            let nvm = track!(MmapNvm::create(&path, 8192))?;
            let mut loaded = track!(HeapBuilder::new().load(nvm, &snapshot[..]))?;
            check_heap(&loaded);
            for &(a, size) in &live {
                assert_eq!(loaded.size_of(a), size);
            }
            track!(loaded.sync())?;
        }

        let nvm = track!(MmapNvm::open(&path))?;
        let mut bytes = vec![0; 8192];
        nvm.read_bytes(0, &mut bytes);
        assert_eq!(&bytes[..], heap.nvm().as_bytes());
        Ok(())
    }
}
