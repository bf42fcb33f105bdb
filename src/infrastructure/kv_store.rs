//! 键值存储 - 基础设施层
//!
//! 检查点只依赖这四个操作，单元测试用 [`MemoryStore`] 替换文件系统。

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;
use tracing::debug;

use crate::error::StoreError;

/// 最小键值存储接口
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 写入（覆盖）一个键
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    /// 读取一个键，不存在时返回 `None`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// 删除一个键，返回该键之前是否存在
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
    /// 列出所有键
    async fn list_keys(&self) -> Result<Vec<String>, StoreError>;
}

/// 基于目录的存储，每个键对应目录下的一个文件
///
/// 写入先落到 `<key>.tmp`，再原子重命名为目标文件，
/// 进程在写入中途崩溃时旧快照保持完整。
pub struct FsStore {
    root: PathBuf,
}

const TMP_SUFFIX: &str = ".tmp";

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// 目录为空时删除目录本身
    pub async fn remove_root_if_empty(&self) -> Result<bool, StoreError> {
        if !self.list_keys().await?.is_empty() {
            return Ok(false);
        }
        match fs::remove_dir(&self.root).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(self.root.display().to_string(), e)),
        }
    }
}

#[async_trait]
impl KeyValueStore for FsStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::io(key, e))?;

        let target = self.path_for(key);
        let tmp = self.path_for(&format!("{}{}", key, TMP_SUFFIX));

        fs::write(&tmp, value)
            .await
            .map_err(|e| StoreError::io(key, e))?;
        fs::rename(&tmp, &target)
            .await
            .map_err(|e| StoreError::io(key, e))?;

        debug!("已写入 {} ({} 字节)", target.display(), value.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let root = self.root.display().to_string();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(root, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(root.clone(), e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(TMP_SUFFIX) {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// 内存存储
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // 锁只在同步代码中持有，中毒时数据仍然可用
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock().remove(key).is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }
}
