use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};
use std::io::Read;

use crate::heap::{SmallObjectHeap, DEFAULT_MAX_BLOCK_SIZE, MAX_HEAP_SIZE, MIN_HEAP_SIZE};
use crate::nvm::NonVolatileMemory;
use crate::{ErrorKind, Result};

/// `SmallObjectHeap`のビルダ.
#[derive(Debug, Clone)]
pub struct HeapBuilder {
    max_block_size: u32,
    metrics: MetricBuilder,
    logger: Logger,
}
impl HeapBuilder {
    /// 新しい`HeapBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        HeapBuilder {
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            metrics: MetricBuilder::new(),
            logger: Logger::root(Discard, o!()),
        }
    }

    /// 一つのブロックに格納可能なペイロードの最大サイズを設定する.
    ///
    /// これを超えるサイズの割当要求は、複数のセグメントをチェインさせることで処理される.
    ///
    /// 取り得る値は`1..=i32::MAX`.
    /// この範囲外の値が指定された場合には、ヒープの作成時にエラーが返される.
    ///
    /// デフォルト値は`DEFAULT_MAX_BLOCK_SIZE`(8MiB).
    ///
    /// なお、これはヒープの新規作成時にのみ反映される値であり、
    /// スナップショットからの復元時には、作成時に指定された値が使用される.
    pub fn max_block_size(&mut self, size: u32) -> &mut Self {
        self.max_block_size = size;
        self
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// ヒープ用のloggerを登録する.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// `nvm`の全体を使って、新しいヒープを作成する.
    ///
    /// ヒープのサイズは`nvm.capacity()`と等しくなる.
    /// `nvm`の既存の内容は、全てゼロで上書きされる.
    ///
    /// # Errors
    ///
    /// 以下の場合には`ErrorKind::InvalidInput`エラーが返される:
    ///
    /// - `nvm`の容量が`MIN_HEAP_SIZE..=MAX_HEAP_SIZE`の範囲外
    /// - 最大ブロックサイズが`1..=i32::MAX`の範囲外
    pub fn create<N>(&self, nvm: N) -> Result<SmallObjectHeap<N>>
    where
        N: NonVolatileMemory,
    {
        track!(self.check_max_block_size())?;
        let size = nvm.capacity();
        track_assert!(
            MIN_HEAP_SIZE <= size && size <= MAX_HEAP_SIZE,
            ErrorKind::InvalidInput,
            "Heap size is out of range: size={}, min={}, max={}",
            size,
            MIN_HEAP_SIZE,
            MAX_HEAP_SIZE
        );
        Ok(SmallObjectHeap::format(
            nvm,
            self.max_block_size,
            &self.metrics,
            self.logger.clone(),
        ))
    }

    /// `reader`から読み込んだスナップショットを`nvm`上に展開して、ヒープを復元する.
    ///
    /// スナップショットの形式に関しては`SmallObjectHeap::dump`を参照のこと.
    ///
    /// # Errors
    ///
    /// - `nvm`の容量がスナップショットのヒープサイズと異なる場合や、ヘッダの値に矛盾がある場合には
    ///   `ErrorKind::InvalidInput`エラーが返される
    /// - 区切りの番兵値が一致しない場合や、ヒープ本体の途中でストリームが終端した場合には
    ///   `ErrorKind::HeapCorrupted`エラーが返される
    pub fn load<N, R>(&self, nvm: N, reader: R) -> Result<SmallObjectHeap<N>>
    where
        N: NonVolatileMemory,
        R: Read,
    {
        track!(SmallObjectHeap::restore(
            nvm,
            reader,
            &self.metrics,
            self.logger.clone()
        ))
    }

    fn check_max_block_size(&self) -> Result<()> {
        track_assert!(
            1 <= self.max_block_size && self.max_block_size <= i32::max_value() as u32,
            ErrorKind::InvalidInput,
            "max_block_size={}",
            self.max_block_size
        );
        Ok(())
    }
}
impl Default for HeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;
    use crate::nvm::MemoryNvm;

    #[test]
    fn heap_size_is_validated() -> TestResult {
        assert!(HeapBuilder::new()
            .create(MemoryNvm::with_capacity(127))
            .is_err());
        let heap = track!(HeapBuilder::new().create(MemoryNvm::with_capacity(128)))?;
        assert_eq!(heap.status().size(), 128);
        Ok(())
    }

    #[test]
    fn max_block_size_is_validated() -> TestResult {
        let e = HeapBuilder::new()
            .max_block_size(0)
            .create(MemoryNvm::with_capacity(1024))
            .err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        let e = HeapBuilder::new()
            .max_block_size(i32::max_value() as u32 + 1)
            .create(MemoryNvm::with_capacity(1024))
            .err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        let heap = track!(HeapBuilder::new()
            .max_block_size(16)
            .create(MemoryNvm::with_capacity(1024)))?;
        assert_eq!(heap.max_block_size(), 16);
        Ok(())
    }
}
