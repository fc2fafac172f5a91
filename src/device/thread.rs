use fibers::sync::oneshot;
use futures::{Future, Poll};
use slog::Logger;
use std::sync::mpsc as std_mpsc;
use std::sync::mpsc::SendError;
use std::sync::Arc;
use std::thread;
use trackable::error::ErrorKindExt;

use crate::device::command::{Command, CommandReceiver, CommandSender};
use crate::device::{DeviceBuilder, DeviceStatus};
use crate::heap::{Address, SmallObjectHeap};
use crate::metrics::DeviceMetrics;
use crate::nvm::NonVolatileMemory;
use crate::{Error, ErrorKind, Result};

/// デバイスの実行スレッド.
#[derive(Debug)]
pub struct DeviceThread<N>
where
    N: NonVolatileMemory,
{
    metrics: DeviceMetrics,
    heap: SmallObjectHeap<N>,
    command_rx: CommandReceiver,
    logger: Logger,
}
impl<N> DeviceThread<N>
where
    N: NonVolatileMemory + Send + 'static,
{
    /// デバイスの実行スレッドを起動する.
    pub fn spawn<F>(
        builder: DeviceBuilder,
        init_heap: F,
    ) -> (DeviceThreadHandle, DeviceThreadMonitor)
    where
        F: FnOnce() -> Result<SmallObjectHeap<N>> + Send + 'static,
    {
        let mut metrics = DeviceMetrics::new(&builder.metrics);
        metrics.status.set(f64::from(DeviceStatus::Starting as u8));

        let (command_tx, command_rx) = std_mpsc::channel();
        let (monitored, monitor) = oneshot::monitor();
        let handle = DeviceThreadHandle {
            command_tx,
            metrics: Arc::new(metrics.clone()),
        };

        let logger = builder.logger;
        thread::spawn(move || {
            let result = track!(init_heap()).and_then(|heap| {
                metrics.heap = Some(heap.metrics().clone());
                metrics.status.set(f64::from(DeviceStatus::Running as u8));
                info!(logger, "Device started";
                      "heap_size" => heap.status().size(),
                      "max_block_size" => heap.max_block_size());

                let mut device = DeviceThread {
                    metrics: metrics.clone(),
                    heap,
                    command_rx,
                    logger: logger.clone(),
                };
                loop {
                    match track!(device.run_once()) {
                        Err(e) => break Err(e),
                        Ok(false) => break Ok(()),
                        Ok(true) => {}
                    }
                }
            });
            metrics.status.set(f64::from(DeviceStatus::Stopped as u8));
            metrics.heap = None;
            match result {
                Ok(()) => info!(logger, "Device stopped"),
                Err(ref e) => error!(logger, "Device terminated abnormally: {}", e),
            }
            monitored.exit(result);
        });

        (handle, DeviceThreadMonitor(monitor))
    }

    fn run_once(&mut self) -> Result<bool> {
        match self.command_rx.recv() {
            // 全てのハンドルが破棄された場合には、もうコマンドが届くことはない
            Err(_) => Ok(false),
            Ok(command) => {
                self.metrics.dequeued_commands.increment(&command);
                Ok(self.handle_command(command))
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Malloc(c) => {
                let result = track!(self.malloc(c.size()));
                if let Err(ref e) = result {
                    self.metrics.failed_commands.malloc.increment();
                    warn!(self.logger, "Cannot allocate a block: {}", e);
                }
                c.reply(result);
            }
            Command::MultiMalloc(c) => {
                let result = track!(self.multi_malloc(c.sizes()));
                if let Err(ref e) = result {
                    self.metrics.failed_commands.multi_malloc.increment();
                    warn!(self.logger, "Cannot allocate blocks: {}", e);
                }
                c.reply(result);
            }
            Command::Free(c) => {
                let result = track!(self.free(c.address()));
                if let Err(ref e) = result {
                    self.metrics.failed_commands.free.increment();
                    warn!(self.logger, "Cannot free a block: {}", e);
                }
                c.reply(result);
            }
            Command::SizeOf(c) => {
                let result = track!(self.size_of(c.address()));
                if let Err(ref e) = result {
                    self.metrics.failed_commands.size_of.increment();
                    warn!(self.logger, "Cannot get the size of a block: {}", e);
                }
                c.reply(result);
            }
            Command::Read(c) => {
                let result = track!(self.read(c.address(), c.offset(), c.len()));
                if let Err(ref e) = result {
                    self.metrics.failed_commands.read.increment();
                    warn!(self.logger, "Cannot read a block: {}", e);
                }
                c.reply(result);
            }
            Command::Write(c) => {
                let result = track!(self.write(c.address(), c.offset(), c.data()));
                if let Err(ref e) = result {
                    self.metrics.failed_commands.write.increment();
                    warn!(self.logger, "Cannot write a block: {}", e);
                }
                c.reply(result);
            }
            Command::Status(c) => {
                c.reply(Ok(self.heap.status().clone()));
            }
            Command::Dump(c) => {
                let mut buf = Vec::new();
                let result = track!(self.heap.dump(&mut buf)).map(|()| buf);
                if let Err(ref e) = result {
                    self.metrics.failed_commands.dump.increment();
                    warn!(self.logger, "Cannot dump the heap: {}", e);
                }
                c.reply(result);
            }
            Command::Stop(_) => return false,
        }
        true
    }

    fn malloc(&mut self, size: u64) -> Result<Option<Address>> {
        track_assert_ne!(size, 0, ErrorKind::InvalidInput);
        Ok(self.heap.malloc(size))
    }

    fn multi_malloc(&mut self, sizes: &[u64]) -> Result<Option<Vec<Address>>> {
        track_assert!(!sizes.is_empty(), ErrorKind::InvalidInput);
        let max_block_size = u64::from(self.heap.max_block_size());
        for &size in sizes {
            track_assert!(
                0 < size && size <= max_block_size,
                ErrorKind::InvalidInput,
                "size={}, max_block_size={}",
                size,
                max_block_size
            );
        }
        Ok(self.heap.multi_malloc(sizes))
    }

    fn free(&mut self, address: Address) -> Result<()> {
        track!(self.check_address(address))?;
        self.heap.free(address);
        Ok(())
    }

    fn size_of(&self, address: Address) -> Result<u64> {
        track!(self.check_address(address))?;
        Ok(self.heap.size_of(address))
    }

    fn read(&self, address: Address, offset: u64, len: usize) -> Result<Vec<u8>> {
        track!(self.check_range(address, offset, len as u64))?;
        let mut buf = vec![0; len];
        self.heap.read_bytes(address, offset, &mut buf);
        Ok(buf)
    }

    fn write(&mut self, address: Address, offset: u64, data: &[u8]) -> Result<()> {
        track!(self.check_range(address, offset, data.len() as u64))?;
        self.heap.write_bytes(address, offset, data);
        Ok(())
    }

    fn check_address(&self, address: Address) -> Result<()> {
        track_assert!(
            self.heap.is_allocated(address),
            ErrorKind::InvalidInput,
            "Not an allocated block: address={}",
            address
        );
        Ok(())
    }

    fn check_range(&self, address: Address, offset: u64, len: u64) -> Result<()> {
        track!(self.check_address(address))?;
        let size = self.heap.size_of(address);
        let end = track_assert_some!(offset.checked_add(len), ErrorKind::InvalidInput);
        track_assert!(
            end <= size,
            ErrorKind::InvalidInput,
            "Out of range: address={}, offset={}, len={}, size={}",
            address,
            offset,
            len,
            size
        );
        Ok(())
    }
}

/// デバイスの実行スレッドの死活監視用オブジェクト.
#[derive(Debug)]
pub struct DeviceThreadMonitor(oneshot::Monitor<(), Error>);
impl Future for DeviceThreadMonitor {
    type Item = ();
    type Error = Error;
    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        track!(self
            .0
            .poll()
            .map_err(|e| e.unwrap_or_else(|| ErrorKind::DeviceTerminated
                .cause("`DeviceThread` terminated unintentionally")
                .into())))
    }
}

/// デバイススレッドを操作するためのハンドル.
#[derive(Debug, Clone)]
pub struct DeviceThreadHandle {
    command_tx: CommandSender,
    metrics: Arc<DeviceMetrics>,
}
impl DeviceThreadHandle {
    pub fn send_command(&self, command: Command) {
        self.metrics.enqueued_commands.increment(&command);
        if let Err(SendError(command)) = self.command_tx.send(command) {
            self.metrics.dequeued_commands.increment(&command);
            self.metrics.failed_commands.increment(&command);
            let e = ErrorKind::DeviceTerminated.cause("The device has been stopped");
            command.failed(track!(Error::from(e)));
        }
    }
    pub fn metrics(&self) -> &Arc<DeviceMetrics> {
        &self.metrics
    }
}
