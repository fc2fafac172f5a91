use libc;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;
use std::slice;

use crate::nvm::NonVolatileMemory;
use crate::{ErrorKind, Result};

/// `MmapNvm`のビルダ.
///
/// exclusive_lock: マップ対象のファイルに対するアクセスの排他制御(`flock`)を行うかどうか
#[derive(Debug, Clone)]
pub struct MmapNvmBuilder {
    exclusive_lock: bool,
}
impl MmapNvmBuilder {
    /// デフォルト設定で`MmapNvmBuilder`インスタンスを作成する.
    ///
    /// デフォルトでは、exclusive_lock = trueとなる.
    pub fn new() -> Self {
        MmapNvmBuilder {
            exclusive_lock: true,
        }
    }

    /// exclusive_lockのon/offを設定する.
    pub fn exclusive_lock(&mut self, enabled: bool) -> &mut Self {
        self.exclusive_lock = enabled;
        self
    }

    /// ファイルを新規に作成(ないし切り詰め)して、`capacity`バイトの領域をマップする.
    ///
    /// ファイルの内容はゼロで初期化される.
    pub fn create<P: AsRef<Path>>(&self, filepath: P, capacity: u64) -> Result<MmapNvm> {
        track_assert!(capacity > 0, ErrorKind::InvalidInput);
        if let Some(dir) = filepath.as_ref().parent() {
            track_io!(fs::create_dir_all(dir))?;
        }
        let file = track_io!(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(filepath))?;
        track!(self.set_exclusive_file_lock_if_flag_is_on(&file))?;
        track_io!(file.set_len(capacity))?;
        track!(MmapNvm::map(file, capacity))
    }

    /// 既存のファイルを開いて、その全体をマップする.
    pub fn open<P: AsRef<Path>>(&self, filepath: P) -> Result<MmapNvm> {
        let file = track_io!(OpenOptions::new().read(true).write(true).open(filepath))?;
        track!(self.set_exclusive_file_lock_if_flag_is_on(&file))?;
        let capacity = track_io!(file.metadata())?.len();
        track_assert!(capacity > 0, ErrorKind::InvalidInput, "Empty file");
        track!(MmapNvm::map(file, capacity))
    }

    fn set_exclusive_file_lock_if_flag_is_on(&self, file: &File) -> Result<()> {
        if self.exclusive_lock {
            if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } != 0 {
                track_io!(Err(io::Error::last_os_error()))
            } else {
                Ok(())
            }
        } else {
            Ok(())
        }
    }
}
impl Default for MmapNvmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// メモリマップトファイルベースの`NonVolatileMemory`の実装.
///
/// ファイルは`MAP_SHARED`でマップされるので、書き込みはOSによって随時ファイルに反映される.
/// 確実に永続化したい場合には`sync`を呼び出すこと.
///
/// インスタンスの破棄時にアンマップされる.
#[derive(Debug)]
pub struct MmapNvm {
    file: File,
    ptr: *mut u8,
    capacity: u64,
}
unsafe impl Send for MmapNvm {}
impl MmapNvm {
    /// デフォルト設定でファイルを新規に作成して`MmapNvm`インスタンスを生成する.
    pub fn create<P: AsRef<Path>>(filepath: P, capacity: u64) -> Result<Self> {
        MmapNvmBuilder::new().create(filepath, capacity)
    }

    /// デフォルト設定で既存のファイルを開き`MmapNvm`インスタンスを生成する.
    pub fn open<P: AsRef<Path>>(filepath: P) -> Result<Self> {
        MmapNvmBuilder::new().open(filepath)
    }

    fn map(file: File, capacity: u64) -> Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                capacity as libc::size_t,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return track_io!(Err(io::Error::last_os_error()));
        }
        Ok(MmapNvm {
            file,
            ptr: ptr as *mut u8,
            capacity,
        })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.capacity as usize) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.capacity as usize) }
    }
}
impl NonVolatileMemory for MmapNvm {
    fn capacity(&self) -> u64 {
        self.capacity
    }
    fn read_bytes(&self, offset: u64, buf: &mut [u8]) {
        let start = offset as usize;
        buf.copy_from_slice(&self.as_slice()[start..start + buf.len()]);
    }
    fn write_bytes(&mut self, offset: u64, buf: &[u8]) {
        let start = offset as usize;
        self.as_mut_slice()[start..start + buf.len()].copy_from_slice(buf);
    }
    fn fill(&mut self, offset: u64, len: u64, value: u8) {
        let start = offset as usize;
        for b in &mut self.as_mut_slice()[start..start + len as usize] {
            *b = value;
        }
    }
    fn sync(&mut self) -> Result<()> {
        let result = unsafe {
            libc::msync(
                self.ptr as *mut libc::c_void,
                self.capacity as libc::size_t,
                libc::MS_SYNC,
            )
        };
        if result != 0 {
            return track_io!(Err(io::Error::last_os_error()));
        }
        track_io!(self.file.sync_data())
    }
}
impl Drop for MmapNvm {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.capacity as libc::size_t);
        }
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;
    use trackable::result::TestResult;

    use super::*;

    #[test]
    fn create_and_open_works() -> TestResult {
        let dir = track_io!(TempDir::new("soheap_test"))?;
        let path = dir.path().join("test.soh");
        {
            let mut nvm = track!(MmapNvm::create(&path, 4096))?;
            assert_eq!(nvm.capacity(), 4096);
            assert_eq!(nvm.read_u64(4088), 0);

            nvm.write_u32(100, 0xCAFE_BABE);
            nvm.fill(200, 8, 0xEE);
            track!(nvm.sync())?;
        }

        let nvm = track!(MmapNvm::open(&path))?;
        assert_eq!(nvm.capacity(), 4096);
        assert_eq!(nvm.read_u32(100), 0xCAFE_BABE);
        assert_eq!(nvm.read_u64(200), 0xEEEE_EEEE_EEEE_EEEE);
        Ok(())
    }

    #[test]
    fn exclusive_lock_works() -> TestResult {
        let dir = track_io!(TempDir::new("soheap_test"))?;
        let path = dir.path().join("test.soh");

        let _nvm = track!(MmapNvm::create(&path, 1024))?;
        assert!(MmapNvm::open(&path).is_err());

        let nvm = track!(MmapNvmBuilder::new().exclusive_lock(false).open(&path))?;
        assert_eq!(nvm.capacity(), 1024);
        Ok(())
    }
}
