//! Small Object Heap.
//!
//! `soheap`は、大量の小さなオブジェクトを、一つの平坦なメモリ領域上に詰め込んで管理するためのアロケータ.
//!
//! # 特徴
//!
//! - 割当済みのブロックが移動することはなく、アドレスは解放されるまで有効
//! - ブロック毎のオーバヘッドが小さい:
//!   - 両端の境界マーカー(隣接ブロックと共有する1バイト)
//!   - ペイロード長に応じた1~4バイトの長さフィールド
//! - 隣接する空きブロックは解放時に即座に結合される
//! - 空きブロックはサイズクラス毎の双方向リストで管理され、リンク情報自体もヒープ内に格納される
//! - 最大ブロックサイズを超える割当要求は、複数のセグメントをチェインさせることで処理される
//! - ヒープ全体をストリームにダンプし、そこから復元することが可能
//!
//! # モジュールの依存関係
//!
//! ```text
//! device => heap => nvm
//! ```
//!
//! - [device]モジュール:
//!   - 主に[Device]構造体を提供
//!   - ヒープを専用の管理スレッド上で動作させ、複数のスレッドからのリクエストを直列化して処理する
//! - [heap]モジュール:
//!   - 主に[SmallObjectHeap]構造体を提供
//!   - [nvm]をバイト列として利用し、その上にブロックの割当と解放を実装している
//! - [nvm]モジュール:
//!   - 主に[NonVolatileMemory]トレイトとその実装である[MemoryNvm]および[MmapNvm]を提供
//!   - [heap]に対してメモリ領域を提供するのが目的
//!
//! [device]: ./device/index.html
//! [Device]: ./device/struct.Device.html
//! [heap]: ./heap/index.html
//! [SmallObjectHeap]: ./heap/struct.SmallObjectHeap.html
//! [nvm]: ./nvm/index.html
//! [NonVolatileMemory]: ./nvm/trait.NonVolatileMemory.html
//! [MemoryNvm]: ./nvm/struct.MemoryNvm.html
//! [MmapNvm]: ./nvm/struct.MmapNvm.html
#![warn(missing_docs)]
extern crate byteorder;
extern crate fibers;
extern crate futures;
extern crate libc;
extern crate prometrics;
#[cfg(test)]
extern crate tempdir;
#[macro_use]
extern crate trackable;
#[macro_use]
extern crate slog;

pub use crate::error::{Error, ErrorKind};

macro_rules! track_io {
    ($expr:expr) => {
        $expr.map_err(|e: ::std::io::Error| track!(crate::Error::from(e)))
    };
}

pub mod device;
pub mod heap;
pub mod metrics;
pub mod nvm;

mod error;

/// crate固有の`Result`型.
pub type Result<T> = std::result::Result<T, Error>;
