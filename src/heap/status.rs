/// ヒープの利用状況.
///
/// 全ての値は、割当・解放の度に更新される.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub(crate) size: u64,
    pub(crate) max_block_size: u32,
    pub(crate) free_space: u64,
    pub(crate) allocated_payload: u64,
    pub(crate) allocated_blocks: u64,
    pub(crate) free_blocks: u64,
    pub(crate) free_small_blocks: u64,
}
impl Status {
    /// このサイズ未満の空きブロックは、断片化した小さな空きブロックとして数えられる.
    pub const SMALL_BLOCK_SIZE: u64 = 64;

    pub(crate) fn new(size: u64, max_block_size: u32, initial_free_block: u64) -> Self {
        Status {
            size,
            max_block_size,
            free_space: initial_free_block,
            allocated_payload: 0,
            allocated_blocks: 0,
            free_blocks: 1,
            free_small_blocks: if initial_free_block < Self::SMALL_BLOCK_SIZE {
                1
            } else {
                0
            },
        }
    }

    /// ヒープ全体のサイズ(バイト単位).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 一つのブロックに格納可能なペイロードの最大サイズ.
    pub fn max_block_size(&self) -> u32 {
        self.max_block_size
    }

    /// 空きブロックの合計バイト数.
    ///
    /// マーカーバイトや、一バイトの隙間は含まれない.
    pub fn free_space(&self) -> u64 {
        self.free_space
    }

    /// 割当済みのペイロードの合計バイト数.
    pub fn allocated_payload(&self) -> u64 {
        self.allocated_payload
    }

    /// 割当済みのブロック数.
    ///
    /// チェインされたブロックは、各セグメントが一つのブロックとして数えられる.
    pub fn allocated_blocks(&self) -> u64 {
        self.allocated_blocks
    }

    /// 空きブロックの数.
    pub fn free_blocks(&self) -> u64 {
        self.free_blocks
    }

    /// サイズが`SMALL_BLOCK_SIZE`未満の空きブロックの数.
    pub fn free_small_blocks(&self) -> u64 {
        self.free_small_blocks
    }

    /// 断片化の度合い(`0.0..=1.0`)を返す.
    ///
    /// 空きブロックの内、小さなものが占める割合として計算される.
    /// 空きブロックが存在しない場合には`0.0`となる.
    pub fn fragmentation(&self) -> f64 {
        if self.free_blocks == 0 {
            0.0
        } else {
            self.free_small_blocks as f64 / self.free_blocks as f64
        }
    }

    pub(crate) fn is_small(block_size: u64) -> bool {
        block_size < Self::SMALL_BLOCK_SIZE
    }

    pub(crate) fn add_free_block(&mut self, block_size: u64) {
        self.free_space += block_size;
        self.free_blocks += 1;
        if Self::is_small(block_size) {
            self.free_small_blocks += 1;
        }
    }

    pub(crate) fn remove_free_block(&mut self, block_size: u64) {
        self.free_space -= block_size;
        self.free_blocks -= 1;
        if Self::is_small(block_size) {
            self.free_small_blocks -= 1;
        }
    }
}
