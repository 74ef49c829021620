//! エラー型
//!
//! ディスクイメージ・セーブステート・設定ファイルの各エラー。
//! ヘッドの端点到達やタイムトラベルの境界はエラーではなくイベント/no-op。

use thiserror::Error;

/// ディスクイメージの形式エラー（ドライブは以前の状態のまま）
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiskError {
    #[error("Unknown disk format: {0}")]
    UnknownFormat(String),
    #[error("Sector image must be {expected} bytes, got {actual}")]
    BadSectorImageSize { expected: usize, actual: usize },
    #[error("Disk image truncated: track {track} needs {needed} bytes, image has {actual}")]
    Truncated {
        track: usize,
        needed: usize,
        actual: usize,
    },
    #[error("Invalid drive number: {0}")]
    InvalidDrive(usize),
}

/// 読み込みは続行する整合性警告
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DiskWarning {
    #[error("WOZ checksum mismatch: stored {stored:08X}, computed {computed:08X}")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

/// セーブステートの復元エラー（マシンの状態は変更されない）
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Unsupported save state version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("Corrupt base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Memory image is {actual} bytes, expected {expected}")]
    MemorySize { expected: usize, actual: usize },
    #[error("Drive {drive} state is inconsistent: {reason}")]
    Drive { drive: usize, reason: String },
    #[error("Save state JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Save state I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 設定ファイルのエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read or write config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}
