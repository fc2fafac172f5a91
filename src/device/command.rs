//! デバイスに発行されるコマンド群の定義.
use fibers::sync::oneshot;
use futures::{Future, Poll};
use std::sync::mpsc::{Receiver, Sender};
use trackable::error::ErrorKindExt;

use crate::heap::{Address, Status};
use crate::{Error, ErrorKind, Result};

pub type CommandSender = Sender<Command>;
pub type CommandReceiver = Receiver<Command>;

#[derive(Debug)]
pub enum Command {
    Malloc(MallocBlock),
    MultiMalloc(MultiMallocBlocks),
    Free(FreeBlock),
    SizeOf(GetBlockSize),
    Read(ReadBlock),
    Write(WriteBlock),
    Status(GetStatus),
    Dump(DumpHeap),
    Stop(StopDevice),
}
impl Command {
    pub fn failed(self, error: Error) {
        match self {
            Command::Malloc(c) => c.reply.send(Err(error)),
            Command::MultiMalloc(c) => c.reply.send(Err(error)),
            Command::Free(c) => c.reply.send(Err(error)),
            Command::SizeOf(c) => c.reply.send(Err(error)),
            Command::Read(c) => c.reply.send(Err(error)),
            Command::Write(c) => c.reply.send(Err(error)),
            Command::Status(c) => c.reply.send(Err(error)),
            Command::Dump(c) => c.reply.send(Err(error)),
            Command::Stop(_) => {}
        }
    }
}

/// `Result`の非同期版.
#[derive(Debug)]
pub struct AsyncResult<T>(oneshot::Monitor<T, Error>);
impl<T> AsyncResult<T> {
    fn new() -> (AsyncReply<T>, Self) {
        let (tx, rx) = oneshot::monitor();
        (AsyncReply(tx), AsyncResult(rx))
    }
}
impl<T> Future for AsyncResult<T> {
    type Item = T;
    type Error = Error;
    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        track!(self.0.poll().map_err(|e| e.unwrap_or_else(|| {
            ErrorKind::DeviceTerminated
                .cause("monitoring channel disconnected")
                .into()
        })))
    }
}

#[derive(Debug)]
struct AsyncReply<T>(oneshot::Monitored<T, Error>);
impl<T> AsyncReply<T> {
    fn send(self, result: Result<T>) {
        self.0.exit(result);
    }
}

#[derive(Debug)]
pub struct MallocBlock {
    size: u64,
    reply: AsyncReply<Option<Address>>,
}
impl MallocBlock {
    pub fn new(size: u64) -> (Self, AsyncResult<Option<Address>>) {
        let (reply, result) = AsyncResult::new();
        (MallocBlock { size, reply }, result)
    }
    pub fn size(&self) -> u64 {
        self.size
    }
    pub fn reply(self, result: Result<Option<Address>>) {
        self.reply.send(result);
    }
}

#[derive(Debug)]
pub struct MultiMallocBlocks {
    sizes: Vec<u64>,
    reply: AsyncReply<Option<Vec<Address>>>,
}
impl MultiMallocBlocks {
    pub fn new(sizes: Vec<u64>) -> (Self, AsyncResult<Option<Vec<Address>>>) {
        let (reply, result) = AsyncResult::new();
        (MultiMallocBlocks { sizes, reply }, result)
    }
    pub fn sizes(&self) -> &[u64] {
        &self.sizes
    }
    pub fn reply(self, result: Result<Option<Vec<Address>>>) {
        self.reply.send(result);
    }
}

#[derive(Debug)]
pub struct FreeBlock {
    address: Address,
    reply: AsyncReply<()>,
}
impl FreeBlock {
    pub fn new(address: Address) -> (Self, AsyncResult<()>) {
        let (reply, result) = AsyncResult::new();
        (FreeBlock { address, reply }, result)
    }
    pub fn address(&self) -> Address {
        self.address
    }
    pub fn reply(self, result: Result<()>) {
        self.reply.send(result);
    }
}

#[derive(Debug)]
pub struct GetBlockSize {
    address: Address,
    reply: AsyncReply<u64>,
}
impl GetBlockSize {
    pub fn new(address: Address) -> (Self, AsyncResult<u64>) {
        let (reply, result) = AsyncResult::new();
        (GetBlockSize { address, reply }, result)
    }
    pub fn address(&self) -> Address {
        self.address
    }
    pub fn reply(self, result: Result<u64>) {
        self.reply.send(result);
    }
}

#[derive(Debug)]
pub struct ReadBlock {
    address: Address,
    offset: u64,
    len: usize,
    reply: AsyncReply<Vec<u8>>,
}
impl ReadBlock {
    pub fn new(address: Address, offset: u64, len: usize) -> (Self, AsyncResult<Vec<u8>>) {
        let (reply, result) = AsyncResult::new();
        let command = ReadBlock {
            address,
            offset,
            len,
            reply,
        };
        (command, result)
    }
    pub fn address(&self) -> Address {
        self.address
    }
    pub fn offset(&self) -> u64 {
        self.offset
    }
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn reply(self, result: Result<Vec<u8>>) {
        self.reply.send(result);
    }
}

#[derive(Debug)]
pub struct WriteBlock {
    address: Address,
    offset: u64,
    data: Vec<u8>,
    reply: AsyncReply<()>,
}
impl WriteBlock {
    pub fn new(address: Address, offset: u64, data: Vec<u8>) -> (Self, AsyncResult<()>) {
        let (reply, result) = AsyncResult::new();
        let command = WriteBlock {
            address,
            offset,
            data,
            reply,
        };
        (command, result)
    }
    pub fn address(&self) -> Address {
        self.address
    }
    pub fn offset(&self) -> u64 {
        self.offset
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    pub fn reply(self, result: Result<()>) {
        self.reply.send(result);
    }
}

#[derive(Debug)]
pub struct GetStatus {
    reply: AsyncReply<Status>,
}
impl GetStatus {
    pub fn new() -> (Self, AsyncResult<Status>) {
        let (reply, result) = AsyncResult::new();
        (GetStatus { reply }, result)
    }
    pub fn reply(self, result: Result<Status>) {
        self.reply.send(result);
    }
}

#[derive(Debug)]
pub struct DumpHeap {
    reply: AsyncReply<Vec<u8>>,
}
impl DumpHeap {
    pub fn new() -> (Self, AsyncResult<Vec<u8>>) {
        let (reply, result) = AsyncResult::new();
        (DumpHeap { reply }, result)
    }
    pub fn reply(self, result: Result<Vec<u8>>) {
        self.reply.send(result);
    }
}

#[derive(Debug)]
pub struct StopDevice;
