//! 虚拟文件系统挂载表
//!
//! 记录挂载点与文件系统类型的绑定关系, 不变量: 同一挂载点同一时刻
//! 至多绑定一个文件系统。引导流程创建的绑定只随进程重启消失, 没有
//! 卸载路径。

use core::fmt;

use heapless::{String, Vec};

use crate::config::MOUNT_PATH_LEN;

/// 挂载表最大条目数
pub const MAX_MOUNTS: usize = 4;

/// 挂载表错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum VfsError {
    /// 挂载点已被占用
    AlreadyMounted,
    /// 挂载表已满
    TableFull,
    /// 非法路径 (必须以 '/' 开头)
    InvalidPath,
    /// 路径过长
    PathTooLong,
    /// 搜索路径已满
    SearchPathFull,
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyMounted => write!(f, "Mount point already in use"),
            Self::TableFull => write!(f, "Mount table full"),
            Self::InvalidPath => write!(f, "Invalid path"),
            Self::PathTooLong => write!(f, "Path too long"),
            Self::SearchPathFull => write!(f, "Search path full"),
        }
    }
}

/// 文件系统类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    /// 日志结构 Flash 文件系统
    LittleFs,
    /// FAT 文件系统
    Fat,
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LittleFs => write!(f, "littlefs"),
            Self::Fat => write!(f, "fat"),
        }
    }
}

/// 单个挂载点描述
#[derive(Debug, Clone)]
pub struct MountEntry {
    /// 挂载点路径
    pub path: String<MOUNT_PATH_LEN>,
    /// 文件系统类型
    pub kind: FsKind,
}

/// 挂载表
#[derive(Debug)]
pub struct MountTable {
    entries: Vec<MountEntry, MAX_MOUNTS>,
}

impl MountTable {
    /// 创建空挂载表
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// 绑定文件系统到挂载点
    pub fn bind(&mut self, path: &str, kind: FsKind) -> Result<(), VfsError> {
        if !path.starts_with('/') || path.len() < 2 {
            return Err(VfsError::InvalidPath);
        }
        if self.find(path).is_some() {
            return Err(VfsError::AlreadyMounted);
        }

        let mut entry_path = String::new();
        entry_path.push_str(path).map_err(|_| VfsError::PathTooLong)?;

        self.entries
            .push(MountEntry {
                path: entry_path,
                kind,
            })
            .map_err(|_| VfsError::TableFull)
    }

    /// 按挂载点精确查找
    pub fn find(&self, path: &str) -> Option<&MountEntry> {
        self.entries.iter().find(|e| e.path.as_str() == path)
    }

    /// 检查挂载点是否已绑定
    pub fn is_bound(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    /// 路径解析: 返回覆盖该路径的最长前缀挂载点
    pub fn resolve(&self, path: &str) -> Option<&MountEntry> {
        self.entries
            .iter()
            .filter(|e| {
                let prefix = e.path.as_str();
                path == prefix
                    || (path.starts_with(prefix) && path.as_bytes()[prefix.len()] == b'/')
            })
            .max_by_key(|e| e.path.len())
    }

    /// 挂载点数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 遍历挂载点
    pub fn iter(&self) -> core::slice::Iter<'_, MountEntry> {
        self.entries.iter()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}
