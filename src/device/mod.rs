//! ヒープを管理するためのデバイス.
//!
//! "デバイス"は[ヒープ]を専用のスレッド上で管理するための構成要素であり、
//! 複数のスレッドやタスクから一つのヒープを共有したい場合に使用する.
//!
//! 一つのデバイス(i.e., ヒープ)には、一つの管理スレッドが割り当てられて、
//! そのデバイスに対するリクエストは全て直列化され、到着順に処理される.
//!
//! [ヒープ]: ../heap/index.html
use futures::{Async, Future, Poll};
use std::sync::Arc;

pub use self::builder::DeviceBuilder;
pub use self::request::DeviceRequest;

pub(crate) use self::command::Command; // `metrics`モジュール用に公開されている

use self::thread::{DeviceThreadHandle, DeviceThreadMonitor};
use crate::heap::SmallObjectHeap;
use crate::metrics::DeviceMetrics;
use crate::nvm::NonVolatileMemory;
use crate::{Error, Result};

mod builder;
mod command;
mod request;
mod thread;

/// [ヒープ]を管理するためのデバイス.
///
/// [モジュールドキュメント](index.html)も参照のこと.
///
/// # Future実装
///
/// `Device`は[Future]を実装している.
///
/// 実際の処理は、別スレッドで実行されるため`Future::poll`を呼び出さなくても進行上は支障はないが、
/// このメソッドによりデバイス(スレッド)の終了(正常ないし異常)を検知することが可能となる.
///
/// なお`Device`インスタンスが破棄されると、裏で動いているデバイス用のOSスレッドも停止させられるので、
/// `Future::poll`を呼び出さない場合でも、インスタンス自体は保持しておく必要がある.
///
/// [ヒープ]: ../heap/index.html
/// [Future]: https://docs.rs/futures/0.1/futures/future/trait.Future.html
#[must_use]
#[derive(Debug)]
pub struct Device {
    monitor: DeviceThreadMonitor,
    handle: DeviceHandle,
    is_stopped: bool,
}
impl Device {
    /// デフォルト設定でデバイスを起動する.
    ///
    /// 設定を変更したい場合には`DeviceBuilder`を使用すること.
    pub fn spawn<F, N>(init_heap: F) -> Device
    where
        F: FnOnce() -> Result<SmallObjectHeap<N>> + Send + 'static,
        N: NonVolatileMemory + Send + 'static,
    {
        DeviceBuilder::new().spawn(init_heap)
    }

    /// デバイスを操作するためのハンドルを返す.
    pub fn handle(&self) -> DeviceHandle {
        self.handle.clone()
    }

    /// デバイスに停止リクエストを発行する.
    ///
    /// 停止リクエストは、それ以前に発行されたリクエスト群の処理が完了した後に処理される.
    ///
    /// このメソッドが返った時点でデバイスが停止している保証はないので、
    /// 確実に終了を検知したい場合には`Future::poll`メソッド経由で知る必要がある.
    ///
    /// なお`Device`インスタンスのドロップ時点で、そのデバイスがまだ稼働中の場合には
    /// `stop()`が自動で呼び出される.
    /// ただし、その後にデバイスの終了を待機したりはしないので注意は必要.
    pub fn stop(&self) {
        self.handle().request().stop();
    }

    /// デバイスの起動を待機するための`Future`を返す.
    pub fn wait_for_running(self) -> impl Future<Item = Self, Error = Error> {
        let handle = self.handle();
        let future = handle.request().wait_for_running().status();
        track_err!(future.map(move |_| self))
    }

    pub(crate) fn new(monitor: DeviceThreadMonitor, handle: DeviceHandle) -> Self {
        Device {
            monitor,
            handle,
            is_stopped: false,
        }
    }
}
impl Future for Device {
    type Item = ();
    type Error = Error;
    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        let result = track!(self.monitor.poll());
        if let Ok(Async::NotReady) = result {
        } else {
            self.is_stopped = true;
        }
        result
    }
}
impl Drop for Device {
    fn drop(&mut self) {
        if !self.is_stopped {
            self.stop();
        }
    }
}

/// デバイスを操作するためのハンドル.
#[derive(Debug, Clone)]
pub struct DeviceHandle(DeviceThreadHandle);
impl DeviceHandle {
    /// デバイスの発行するリクエストのビルダを返す.
    pub fn request(&self) -> DeviceRequest {
        DeviceRequest::new(&self.0)
    }

    /// デバイスのメトリクスを返す.
    pub fn metrics(&self) -> &Arc<DeviceMetrics> {
        self.0.metrics()
    }
}

/// デバイスの稼働状態.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    /// デバイスは起動中.
    ///
    /// 具体的には、デバイスの管理スレッドがヒープの初期化(生成)関数を呼び出しているところ.
    Starting = 1,

    /// デバイスは稼働中.
    ///
    /// デバイスに対して発行された各種要求を処理可能な状態.
    Running = 2,

    /// デバイスは停止済.
    ///
    /// デバイスが正常ないし異常に終了し、管理スレッドも回収されている.
    Stopped = 0,
}

#[cfg(test)]
mod tests {
    use fibers_global::execute;
    use std::thread;
    use std::time::Duration;
    use trackable::result::TestResult;

    use super::*;
    use crate::heap::{Address, HeapBuilder};
    use crate::nvm::MemoryNvm;
    use crate::ErrorKind;

    #[test]
    fn device_works() -> TestResult {
        let heap = track!(HeapBuilder::new().create(MemoryNvm::with_capacity(64 * 1024)))?;
        let device = DeviceBuilder::new().spawn(|| Ok(heap));
        let d = device.handle();
        let initial = track!(execute(d.request().wait_for_running().status()))?; // デバイスの起動を待機
        assert_eq!(d.metrics().status(), DeviceStatus::Running);

        let a = track!(execute(d.request().malloc(10)))?.expect("no space");
        assert_eq!(track!(execute(d.request().size_of(a)))?, 10);
        track!(execute(d.request().write(a, 2, b"foo".to_vec())))?;
        assert_eq!(track!(execute(d.request().read(a, 2, 3)))?, b"foo");

        let status = track!(execute(d.request().status()))?;
        assert_eq!(status.allocated_blocks(), 1);
        assert_eq!(status.allocated_payload(), 10);

        track!(execute(d.request().free(a)))?;
        assert_eq!(track!(execute(d.request().status()))?, initial);
        Ok(())
    }

    #[test]
    fn invalid_requests_are_rejected() -> TestResult {
        let heap = track!(HeapBuilder::new().create(MemoryNvm::with_capacity(64 * 1024)))?;
        let device = DeviceBuilder::new().spawn(|| Ok(heap));
        let d = device.handle();
        let _ = execute(d.request().wait_for_running().status()); // デバイスの起動を待機

        let e = execute(d.request().malloc(0)).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        let e = execute(d.request().multi_malloc(vec![])).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        // 先頭の空きブロックを指すアドレス
        let e = execute(d.request().free(Address::from(1))).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        let a = track!(execute(d.request().malloc(10)))?.expect("no space");
        let e = execute(d.request().read(a, 5, 6)).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
        let e = execute(d.request().write(a, 10, vec![0])).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        // 失敗したリクエストはヒープを変更しない
        let status = track!(execute(d.request().status()))?;
        assert_eq!(status.allocated_blocks(), 1);

        let failed = d.metrics().failed_commands();
        assert_eq!(failed.malloc(), 1);
        assert_eq!(failed.multi_malloc(), 1);
        assert_eq!(failed.free(), 1);
        assert_eq!(failed.read(), 1);
        assert_eq!(failed.write(), 1);
        Ok(())
    }

    #[test]
    fn multi_malloc_and_chained_blocks_work() -> TestResult {
        let heap = track!(HeapBuilder::new()
            .max_block_size(256)
            .create(MemoryNvm::with_capacity(64 * 1024)))?;
        let device = DeviceBuilder::new().spawn(|| Ok(heap));
        let d = device.handle();
        let _ = execute(d.request().wait_for_running().status()); // デバイスの起動を待機

        let addresses = track!(execute(d.request().multi_malloc(vec![8, 16, 24])))?;
        let addresses = addresses.expect("no space");
        assert_eq!(addresses.len(), 3);
        for (&a, &size) in addresses.iter().zip([8, 16, 24].iter()) {
            assert_eq!(track!(execute(d.request().size_of(a)))?, size);
        }

        // 最大ブロックサイズを超える要求
        let b = track!(execute(d.request().malloc(1000)))?.expect("no space");
        assert_eq!(track!(execute(d.request().size_of(b)))?, 1000);
        let data = (0..1000).map(|i| i as u8).collect::<Vec<_>>();
        track!(execute(d.request().write(b, 0, data.clone())))?;
        assert_eq!(track!(execute(d.request().read(b, 0, 1000)))?, data);
        assert_eq!(track!(execute(d.request().read(b, 250, 10)))?, &data[250..260]);

        // ブロックサイズを超える一括割当要求
        let e = execute(d.request().multi_malloc(vec![8, 257])).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
        Ok(())
    }

    #[test]
    fn dump_works() -> TestResult {
        let heap = track!(HeapBuilder::new().create(MemoryNvm::with_capacity(8 * 1024)))?;
        let device = DeviceBuilder::new().spawn(|| Ok(heap));
        let d = device.handle();
        let _ = execute(d.request().wait_for_running().status()); // デバイスの起動を待機

        let a = track!(execute(d.request().malloc(100)))?.expect("no space");
        track!(execute(d.request().write(a, 0, vec![7; 100])))?;
        let _ = track!(execute(d.request().malloc(30)))?.expect("no space");

        let snapshot = track!(execute(d.request().dump()))?;
        let status = track!(execute(d.request().status()))?;

        let nvm = MemoryNvm::with_capacity(8 * 1024);
        let heap = track!(HeapBuilder::new().load(nvm, &snapshot[..]))?;
        assert_eq!(*heap.status(), status);
        assert_eq!(heap.size_of(a), 100);
        assert_eq!(heap.read_u8(a, 99), 7);
        Ok(())
    }

    #[test]
    fn starting_device_is_busy() -> TestResult {
        let heap = track!(HeapBuilder::new().create(MemoryNvm::with_capacity(1024)))?;
        let device = DeviceBuilder::new().spawn(move || {
            thread::sleep(Duration::from_millis(200));
            Ok(heap)
        });
        let d = device.handle();

        let e = execute(d.request().status()).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::DeviceBusy));

        let device = track!(execute(device.wait_for_running()))?;
        assert_eq!(d.metrics().status(), DeviceStatus::Running);
        track!(execute(d.request().status()))?;
        drop(device);
        Ok(())
    }

    #[test]
    fn stopped_device_rejects_requests() -> TestResult {
        let heap = track!(HeapBuilder::new().create(MemoryNvm::with_capacity(1024)))?;
        let device = DeviceBuilder::new().spawn(|| Ok(heap));
        let d = device.handle();
        let _ = execute(d.request().wait_for_running().status()); // デバイスの起動を待機

        device.stop();
        track!(execute(device))?;
        assert_eq!(d.metrics().status(), DeviceStatus::Stopped);

        let e = execute(d.request().status()).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::DeviceTerminated));
        assert_eq!(d.metrics().failed_commands().status(), 1);
        Ok(())
    }

    #[test]
    fn initialization_failure_terminates_device() {
        let device = DeviceBuilder::new()
            .spawn(|| track!(HeapBuilder::new().create(MemoryNvm::with_capacity(16))));
        let e = execute(device).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    }
}
