use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};

use super::thread::DeviceThread;
use super::{Device, DeviceHandle};
use crate::heap::SmallObjectHeap;
use crate::nvm::NonVolatileMemory;
use crate::Result;

/// `Device`のビルダ.
#[derive(Debug, Clone)]
pub struct DeviceBuilder {
    pub(crate) metrics: MetricBuilder,
    pub(crate) logger: Logger,
}
impl DeviceBuilder {
    /// デフォルト設定で`DeviceBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        DeviceBuilder {
            metrics: MetricBuilder::new(),
            logger: Logger::root(Discard, o!()),
        }
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// デバイススレッド用の logger を登録する
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// 指定されたヒープを扱う`Device`を起動する.
    ///
    /// 起動したデバイス用に、一つの専用OSスレッドが割り当てられる.
    ///
    /// なお、スレッド起動後には、まず`init_heap()`が呼び出されて、
    /// ヒープインスタンスが生成される.
    ///
    /// # 注意
    ///
    /// 返り値の`Device`インスタンスが破棄されると、
    /// 起動したデバイススレッドも停止させられるので注意が必要.
    pub fn spawn<F, N>(&self, init_heap: F) -> Device
    where
        F: FnOnce() -> Result<SmallObjectHeap<N>> + Send + 'static,
        N: NonVolatileMemory + Send + 'static,
    {
        let (thread_handle, thread_monitor) = DeviceThread::spawn(self.clone(), init_heap);
        Device::new(thread_monitor, DeviceHandle(thread_handle))
    }
}
impl Default for DeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
