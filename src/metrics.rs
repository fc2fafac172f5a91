//! [Prometheus][prometheus]用のメトリクス.
//!
//! [prometheus]: https://prometheus.io/
use prometrics::metrics::{Counter, Gauge, MetricBuilder};

use crate::device::{Command, DeviceStatus};

/// [`SmallObjectHeap`]のメトリクス.
///
/// [`SmallObjectHeap`]: ../heap/struct.SmallObjectHeap.html
#[derive(Debug, Clone)]
pub struct HeapMetrics {
    pub(crate) capacity_bytes: Gauge,
    pub(crate) mallocs: Counter,
    pub(crate) multi_mallocs: Counter,
    pub(crate) chained_mallocs: Counter,
    pub(crate) frees: Counter,
    pub(crate) nospace_failures: Counter,
    pub(crate) allocated_bytes: Counter,
    pub(crate) released_bytes: Counter,
}
impl HeapMetrics {
    /// ヒープの容量.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_heap_capacity_bytes <GAUGE>
    /// ```
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes.value() as u64
    }

    /// `malloc`の成功回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_heap_mallocs_total <COUNTER>
    /// ```
    pub fn mallocs(&self) -> u64 {
        self.mallocs.value() as u64
    }

    /// `multi_malloc`(および`multi_malloc_repeated`)の成功回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_heap_multi_mallocs_total <COUNTER>
    /// ```
    pub fn multi_mallocs(&self) -> u64 {
        self.multi_mallocs.value() as u64
    }

    /// 複数のセグメントにまたがるブロックの割当回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_heap_chained_mallocs_total <COUNTER>
    /// ```
    pub fn chained_mallocs(&self) -> u64 {
        self.chained_mallocs.value() as u64
    }

    /// `free`の呼び出し回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_heap_frees_total <COUNTER>
    /// ```
    pub fn frees(&self) -> u64 {
        self.frees.value() as u64
    }

    /// 空き領域不足による割当失敗回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_heap_nospace_failures_total <COUNTER>
    /// ```
    pub fn nospace_failures(&self) -> u64 {
        self.nospace_failures.value() as u64
    }

    /// これまでに割り当てたペイロードのバイト数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_heap_allocated_bytes_total <COUNTER>
    /// ```
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.value() as u64
    }

    /// これまでに解放されたペイロードのバイト数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_heap_released_bytes_total <COUNTER>
    /// ```
    pub fn released_bytes(&self) -> u64 {
        self.released_bytes.value() as u64
    }

    /// 現在割り当てられているペイロードのバイト数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_heap_allocated_bytes_total - soheap_heap_released_bytes_total
    /// ```
    pub fn usage_bytes(&self) -> u64 {
        // NOTE: 以下の順番で値を取得しないとアンダーフローする可能性がある
        let dec = self.released_bytes();
        let inc = self.allocated_bytes();
        inc - dec
    }

    pub(crate) fn new(builder: &MetricBuilder, capacity_bytes: u64) -> Self {
        let mut builder = builder.clone();
        builder.namespace("soheap").subsystem("heap");
        let metrics = HeapMetrics {
            capacity_bytes: builder
                .gauge("capacity_bytes")
                .help("Capacity of the heap")
                .finish()
                .expect("Never fails"),
            mallocs: builder
                .counter("mallocs_total")
                .help("Number of successful single allocations")
                .finish()
                .expect("Never fails"),
            multi_mallocs: builder
                .counter("multi_mallocs_total")
                .help("Number of successful batched allocations")
                .finish()
                .expect("Never fails"),
            chained_mallocs: builder
                .counter("chained_mallocs_total")
                .help("Number of allocations split into chained segments")
                .finish()
                .expect("Never fails"),
            frees: builder
                .counter("frees_total")
                .help("Number of released blocks")
                .finish()
                .expect("Never fails"),
            nospace_failures: builder
                .counter("nospace_failures_total")
                .help("Number of allocation failures caused by no available space")
                .finish()
                .expect("Never fails"),
            allocated_bytes: builder
                .counter("allocated_bytes_total")
                .help("Number of allocated payload bytes")
                .finish()
                .expect("Never fails"),
            released_bytes: builder
                .counter("released_bytes_total")
                .help("Number of released payload bytes")
                .finish()
                .expect("Never fails"),
        };
        metrics.capacity_bytes.set(capacity_bytes as f64);
        metrics
    }

    pub(crate) fn count_allocation(&self, payload_size: u64) {
        self.mallocs.increment();
        self.allocated_bytes.add_u64(payload_size);
    }

    pub(crate) fn count_multi_allocation(&self, payload_size: u64) {
        self.multi_mallocs.increment();
        self.allocated_bytes.add_u64(payload_size);
    }

    pub(crate) fn count_releasion(&self, payload_size: u64) {
        self.frees.increment();
        self.released_bytes.add_u64(payload_size);
    }
}

/// [`Device`]のメトリクス.
///
/// [`Device`]: ../device/struct.Device.html
#[derive(Debug, Clone)]
pub struct DeviceMetrics {
    pub(crate) status: Gauge,
    pub(crate) enqueued_commands: DeviceCommandCounter,
    pub(crate) dequeued_commands: DeviceCommandCounter,
    pub(crate) failed_commands: DeviceCommandCounter,
    pub(crate) heap: Option<HeapMetrics>,
}
impl DeviceMetrics {
    /// デバイスの稼働状態.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// # 0=stopped
    /// # 1=starting
    /// # 2=running
    /// soheap_device_status = 0|1|2
    /// ```
    pub fn status(&self) -> DeviceStatus {
        match self.status.value() as u8 {
            0 => DeviceStatus::Stopped,
            1 => DeviceStatus::Starting,
            2 => DeviceStatus::Running,
            _ => unreachable!(),
        }
    }

    /// デバイスのキューに挿入されたコマンドの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_device_enqueued_commands_total { command="malloc" } = <COUNTER>
    /// soheap_device_enqueued_commands_total { command="multi_malloc" } = <COUNTER>
    /// soheap_device_enqueued_commands_total { command="free" } = <COUNTER>
    /// soheap_device_enqueued_commands_total { command="size_of" } = <COUNTER>
    /// soheap_device_enqueued_commands_total { command="read" } = <COUNTER>
    /// soheap_device_enqueued_commands_total { command="write" } = <COUNTER>
    /// soheap_device_enqueued_commands_total { command="status" } = <COUNTER>
    /// soheap_device_enqueued_commands_total { command="dump" } = <COUNTER>
    /// soheap_device_enqueued_commands_total { command="stop" } = <COUNTER>
    /// ```
    pub fn enqueued_commands(&self) -> &DeviceCommandCounter {
        &self.enqueued_commands
    }

    /// デバイスのキューから取り出されたコマンドの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_device_dequeued_commands_total { command="malloc|multi_malloc|...|stop" } = <COUNTER>
    /// ```
    pub fn dequeued_commands(&self) -> &DeviceCommandCounter {
        &self.dequeued_commands
    }

    /// 実行に失敗したコマンドの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// soheap_device_failed_commands_total { command="malloc|multi_malloc|...|stop" } = <COUNTER>
    /// ```
    pub fn failed_commands(&self) -> &DeviceCommandCounter {
        &self.failed_commands
    }

    /// デバイスキューの長さ(i.e., 実行待ちのコマンド数).
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sum(soheap_device_enqueued_commands_total - soheap_device_dequeued_commands_total)
    /// ```
    pub fn queue_len(&self) -> usize {
        // NOTE: 以下の順番で値を取得しないとアンダーフローする可能性がある
        let dec = self.dequeued_commands.sum();
        let inc = self.enqueued_commands.sum();
        (inc - dec) as usize
    }

    /// ヒープのメトリクスを返す.
    ///
    /// デバイスの状態が`Running`以外の場合には`None`が返る.
    pub fn heap(&self) -> Option<&HeapMetrics> {
        self.heap.as_ref()
    }

    pub(crate) fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("soheap").subsystem("device");
        DeviceMetrics {
            status: builder
                .gauge("status")
                .help("Status of the device (0=stopped, 1=starting, 2=running)")
                .finish()
                .expect("Never fails"),
            enqueued_commands: DeviceCommandCounter::new(
                &builder,
                "enqueued_commands_total",
                "Number of enqueued commands",
            ),
            dequeued_commands: DeviceCommandCounter::new(
                &builder,
                "dequeued_commands_total",
                "Number of dequeued commands",
            ),
            failed_commands: DeviceCommandCounter::new(
                &builder,
                "failed_commands_total",
                "Number of commands failed to execute",
            ),
            heap: None,
        }
    }
}

/// デバイスのコマンド毎のカウンタ.
#[derive(Debug, Clone)]
pub struct DeviceCommandCounter {
    pub(crate) malloc: Counter,
    pub(crate) multi_malloc: Counter,
    pub(crate) free: Counter,
    pub(crate) size_of: Counter,
    pub(crate) read: Counter,
    pub(crate) write: Counter,
    pub(crate) status: Counter,
    pub(crate) dump: Counter,
    pub(crate) stop: Counter,
}
impl DeviceCommandCounter {
    /// MALLOCコマンド用のカウンタの値を返す.
    pub fn malloc(&self) -> u64 {
        self.malloc.value() as u64
    }

    /// MULTI_MALLOCコマンド用のカウンタの値を返す.
    pub fn multi_malloc(&self) -> u64 {
        self.multi_malloc.value() as u64
    }

    /// FREEコマンド用のカウンタの値を返す.
    pub fn free(&self) -> u64 {
        self.free.value() as u64
    }

    /// SIZE_OFコマンド用のカウンタの値を返す.
    pub fn size_of(&self) -> u64 {
        self.size_of.value() as u64
    }

    /// READコマンド用のカウンタの値を返す.
    pub fn read(&self) -> u64 {
        self.read.value() as u64
    }

    /// WRITEコマンド用のカウンタの値を返す.
    pub fn write(&self) -> u64 {
        self.write.value() as u64
    }

    /// STATUSコマンド用のカウンタの値を返す.
    pub fn status(&self) -> u64 {
        self.status.value() as u64
    }

    /// DUMPコマンド用のカウンタの値を返す.
    pub fn dump(&self) -> u64 {
        self.dump.value() as u64
    }

    /// STOPコマンド用のカウンタの値を返す.
    pub fn stop(&self) -> u64 {
        self.stop.value() as u64
    }

    pub(crate) fn new(builder: &MetricBuilder, name: &str, help: &str) -> Self {
        let counter = |command| {
            builder
                .counter(name)
                .help(help)
                .label("command", command)
                .finish()
                .expect("Never fails")
        };
        DeviceCommandCounter {
            malloc: counter("malloc"),
            multi_malloc: counter("multi_malloc"),
            free: counter("free"),
            size_of: counter("size_of"),
            read: counter("read"),
            write: counter("write"),
            status: counter("status"),
            dump: counter("dump"),
            stop: counter("stop"),
        }
    }

    pub(crate) fn increment(&self, command: &Command) {
        match *command {
            Command::Malloc(_) => self.malloc.increment(),
            Command::MultiMalloc(_) => self.multi_malloc.increment(),
            Command::Free(_) => self.free.increment(),
            Command::SizeOf(_) => self.size_of.increment(),
            Command::Read(_) => self.read.increment(),
            Command::Write(_) => self.write.increment(),
            Command::Status(_) => self.status.increment(),
            Command::Dump(_) => self.dump.increment(),
            Command::Stop(_) => self.stop.increment(),
        }
    }

    fn sum(&self) -> u64 {
        self.malloc()
            + self.multi_malloc()
            + self.free()
            + self.size_of()
            + self.read()
            + self.write()
            + self.status()
            + self.dump()
            + self.stop()
    }
}

#[cfg(test)]
mod tests {
    use prometrics::metrics::MetricBuilder;

    use super::*;

    #[test]
    fn heap_metrics_works() {
        let metrics = HeapMetrics::new(&MetricBuilder::new(), 1024);
        assert_eq!(metrics.capacity_bytes(), 1024);

        metrics.count_allocation(10);
        metrics.count_multi_allocation(30);
        metrics.count_releasion(10);
        assert_eq!(metrics.mallocs(), 1);
        assert_eq!(metrics.multi_mallocs(), 1);
        assert_eq!(metrics.frees(), 1);
        assert_eq!(metrics.allocated_bytes(), 40);
        assert_eq!(metrics.released_bytes(), 10);
        assert_eq!(metrics.usage_bytes(), 30);
    }
}
