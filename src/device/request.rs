use futures::Future;
use trackable::error::ErrorKindExt;

use super::thread::DeviceThreadHandle;
use crate::device::command::{self, Command};
use crate::device::DeviceStatus;
use crate::heap::{Address, Status};
use crate::{Error, ErrorKind, Result};

/// デバイスに対してリクエストを発行するためのビルダ.
///
/// # 注意
///
/// リクエストを発行した結果返される`Future`を効率的にポーリングするためには
/// [`fibers`]を使用する必要がある。
///
/// [`fibers`]: https://github.com/dwango/fibers-rs
#[derive(Debug)]
pub struct DeviceRequest<'a> {
    device: &'a DeviceThreadHandle,
    max_queue_len: Option<usize>,
    wait_for_running: bool,
}
impl<'a> DeviceRequest<'a> {
    pub(crate) fn new(device: &'a DeviceThreadHandle) -> Self {
        DeviceRequest {
            device,
            max_queue_len: None,
            wait_for_running: false,
        }
    }

    /// `size`バイトのペイロードを持つブロックを割り当てる.
    ///
    /// ヒープに十分な空きがない場合には`None`が結果として返される.
    ///
    /// # Errors
    ///
    /// `size`が`0`の場合には`ErrorKind::InvalidInput`エラーが返される.
    pub fn malloc(&self, size: u64) -> impl Future<Item = Option<Address>, Error = Error> {
        let (command, response) = command::MallocBlock::new(size);
        self.send_command(Command::Malloc(command));
        response
    }

    /// 複数のブロックを、一つの連続した領域から一括で割り当てる.
    ///
    /// 連続した領域が見つからない場合には`None`が結果として返される.
    /// その場合でも、個々のブロックであれば割り当て可能なことがあるので、
    /// 必要に応じて呼び出し側で`malloc`にフォールバックすること.
    ///
    /// # Errors
    ///
    /// `sizes`が空の場合や、いずれかの要素が`1..=最大ブロックサイズ`の範囲外の場合には
    /// `ErrorKind::InvalidInput`エラーが返される.
    pub fn multi_malloc(
        &self,
        sizes: Vec<u64>,
    ) -> impl Future<Item = Option<Vec<Address>>, Error = Error> {
        let (command, response) = command::MultiMallocBlocks::new(sizes);
        self.send_command(Command::MultiMalloc(command));
        response
    }

    /// ブロックを解放する.
    ///
    /// # Errors
    ///
    /// `address`が割当済みのブロックを指していない場合には`ErrorKind::InvalidInput`エラーが返される.
    pub fn free(&self, address: Address) -> impl Future<Item = (), Error = Error> {
        let (command, response) = command::FreeBlock::new(address);
        self.send_command(Command::Free(command));
        response
    }

    /// ブロックのペイロードサイズを取得する.
    pub fn size_of(&self, address: Address) -> impl Future<Item = u64, Error = Error> {
        let (command, response) = command::GetBlockSize::new(address);
        self.send_command(Command::SizeOf(command));
        response
    }

    /// ペイロードの`offset`の位置から`len`バイトを読み込む.
    ///
    /// # Errors
    ///
    /// 指定範囲がペイロードに収まらない場合には`ErrorKind::InvalidInput`エラーが返される.
    pub fn read(
        &self,
        address: Address,
        offset: u64,
        len: usize,
    ) -> impl Future<Item = Vec<u8>, Error = Error> {
        let (command, response) = command::ReadBlock::new(address, offset, len);
        self.send_command(Command::Read(command));
        response
    }

    /// ペイロードの`offset`の位置に`data`を書き込む.
    ///
    /// # Errors
    ///
    /// 指定範囲がペイロードに収まらない場合には`ErrorKind::InvalidInput`エラーが返される.
    pub fn write(
        &self,
        address: Address,
        offset: u64,
        data: Vec<u8>,
    ) -> impl Future<Item = (), Error = Error> {
        let (command, response) = command::WriteBlock::new(address, offset, data);
        self.send_command(Command::Write(command));
        response
    }

    /// ヒープの利用状況を取得する.
    pub fn status(&self) -> impl Future<Item = Status, Error = Error> {
        let (command, response) = command::GetStatus::new();
        self.send_command(Command::Status(command));
        response
    }

    /// ヒープのスナップショットを取得する.
    ///
    /// 形式は`SmallObjectHeap::dump`が出力するものと同じ.
    pub fn dump(&self) -> impl Future<Item = Vec<u8>, Error = Error> {
        let (command, response) = command::DumpHeap::new();
        self.send_command(Command::Dump(command));
        response
    }

    /// デバイスを停止する.
    ///
    /// 停止は重要な操作であり、実行は`Device`インスタンスの保持者に制限したいので、
    /// このメソッドは`crate`のみを公開範囲とする.
    pub(crate) fn stop(&self) {
        self.send_command(Command::Stop(command::StopDevice));
    }

    /// デバイスのキューの最大長を指定する.
    ///
    /// もし要求発行時に、デバイスのキューの長さがこの値を超えている場合には、
    /// `ErrorKind::DeviceBusy`エラーが返される.
    ///
    /// デフォルトは無制限.
    pub fn max_queue_len(&mut self, max: usize) -> &mut Self {
        self.max_queue_len = Some(max);
        self
    }

    /// デバイスが起動処理中の場合には、その完了を待つように指示する.
    ///
    /// デフォルトでは、起動処理中にリクエストが発行された場合には、
    /// 即座に`ErrorKind::DeviceBusy`エラーが返される.
    ///
    /// `wait_for_running()`が呼び出された場合には、
    /// リクエストはキューに追加され、デバイス起動後に順次処理される.
    pub fn wait_for_running(&mut self) -> &mut Self {
        self.wait_for_running = true;
        self
    }

    fn send_command(&self, command: Command) {
        if !self.wait_for_running && self.device.metrics().status() == DeviceStatus::Starting {
            let e = track!(ErrorKind::DeviceBusy.cause("The device is starting up"));
            command.failed(e.into());
            return;
        }
        if let Err(e) = track!(self.check_limit()) {
            command.failed(e)
        } else {
            self.device.send_command(command);
        }
    }

    fn check_limit(&self) -> Result<()> {
        let metrics = self.device.metrics();
        if let Some(max) = self.max_queue_len {
            track_assert!(
                metrics.queue_len() <= max,
                ErrorKind::DeviceBusy,
                "value={}, max={}",
                metrics.queue_len(),
                max
            );
        }
        Ok(())
    }
}
