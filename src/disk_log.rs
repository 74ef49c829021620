//! Disk II ログシステム
//!
//! 原則:
//! 1. ログは「現象」ではなく「判断」を記録
//! 2. 状態遷移のみ記録（毎回のI/Oは記録しない）
//! 3. レベル分離: FLOW / STATE / EVENT / BITS
//!
//! 出力は `log` クレート経由（target = "disk"）。カテゴリはCLIから選択する。

use std::sync::atomic::{AtomicU32, Ordering};

use crate::drive::DriveEvent;

bitflags::bitflags! {
    /// ログカテゴリ
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DiskLogLevel: u32 {
        /// L1: 何が起きているか（モーター、ディスク挿入/排出）
        const FLOW  = 0b0001;
        /// L2: 状態遷移（ヘッド移動、ドライブ選択、書き込みモード）
        const STATE = 0b0010;
        /// L2: 書き込みのフラッシュ判断
        const EVENT = 0b0100;
        /// L3: 読み出したバイト列（短時間のみ）
        const BITS  = 0b1000;
    }
}

/// グローバルログレベル
static LOG_LEVEL: AtomicU32 = AtomicU32::new(0);

/// ログレベルを設定
pub fn set_log_level(level: DiskLogLevel) {
    LOG_LEVEL.store(level.bits(), Ordering::Relaxed);
}

/// 現在のログレベルを取得
pub fn get_log_level() -> DiskLogLevel {
    DiskLogLevel::from_bits_truncate(LOG_LEVEL.load(Ordering::Relaxed))
}

/// ログレベルが有効かチェック
#[inline]
pub fn is_enabled(flag: DiskLogLevel) -> bool {
    (LOG_LEVEL.load(Ordering::Relaxed) & flag.bits()) != 0
}

/// "flow,state" のような指定を解釈する（"all" で全カテゴリ）
pub fn parse_levels(list: &str) -> Result<DiskLogLevel, String> {
    let mut level = DiskLogLevel::empty();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        level |= match name.to_ascii_lowercase().as_str() {
            "flow" => DiskLogLevel::FLOW,
            "state" => DiskLogLevel::STATE,
            "event" => DiskLogLevel::EVENT,
            "bits" => DiskLogLevel::BITS,
            "all" => DiskLogLevel::all(),
            other => return Err(format!("unknown disk log category: {}", other)),
        };
    }
    Ok(level)
}

/// 読み出しバイトのリングバッファ（最後のN個を保持）
#[derive(Debug, Clone)]
pub struct ByteRing {
    buf: Vec<u8>,
    pos: usize,
}

impl ByteRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
            pos: 0,
        }
    }

    pub fn push(&mut self, byte: u8) {
        let capacity = self.buf.len();
        self.buf[self.pos % capacity] = byte;
        self.pos += 1;
    }

    /// 最新からN個を取得（古い順）
    pub fn last_n(&self, n: usize) -> Vec<u8> {
        let capacity = self.buf.len();
        let n = n.min(capacity).min(self.pos);
        (0..n)
            .map(|i| self.buf[(self.pos - n + i) % capacity])
            .collect()
    }

    /// [BITS] ダンプ出力
    pub fn dump(&self, n: usize) {
        if !is_enabled(DiskLogLevel::BITS) {
            return;
        }
        let data = self.last_n(n);
        log::info!(target: "disk", "[BITS] Last {} bytes:", data.len());
        for line in data.chunks(16) {
            let hex: Vec<String> = line.iter().map(|b| format!("{:02X}", b)).collect();
            log::info!(target: "disk", "  {}", hex.join(" "));
        }
    }
}

impl Default for ByteRing {
    fn default() -> Self {
        Self::new(256)
    }
}

// ============================================================
// ログ出力関数
// ============================================================

/// ドライブイベント（FLOW: モーター・ディスク, STATE: ヘッド）
pub fn log_event(event: &DriveEvent) {
    let category = match event {
        DriveEvent::HeadMoved { .. } | DriveEvent::HeadAtStop { .. } => DiskLogLevel::STATE,
        _ => DiskLogLevel::FLOW,
    };
    if !is_enabled(category) {
        return;
    }
    match event {
        DriveEvent::MotorOn { drive } => log::info!(target: "disk", "[DISK] D{} Motor ON", drive + 1),
        DriveEvent::MotorOff { drive } => log::info!(target: "disk", "[DISK] D{} Motor OFF", drive + 1),
        DriveEvent::DiskInserted { drive } => log::info!(target: "disk", "[DISK] D{} inserted", drive + 1),
        DriveEvent::DiskEjected { drive } => log::info!(target: "disk", "[DISK] D{} ejected", drive + 1),
        DriveEvent::HeadMoved { drive, half_track } => {
            log::info!(target: "disk", "[STATE] D{} head -> T{:.1}", drive + 1, *half_track as f32 / 2.0)
        }
        DriveEvent::HeadAtStop { drive, half_track } => {
            log::info!(target: "disk", "[STATE] D{} head at stop (htrack {})", drive + 1, half_track)
        }
    }
}

/// [STATE] ドライブ選択
pub fn log_drive_select(drive: usize) {
    if is_enabled(DiskLogLevel::STATE) {
        log::info!(target: "disk", "[STATE] Drive {} selected", drive + 1);
    }
}

/// [STATE] 書き込みモード切り替え
pub fn log_write_mode(drive: usize, on: bool) {
    if is_enabled(DiskLogLevel::STATE) {
        log::info!(target: "disk", "[STATE] D{} write mode {}", drive + 1, if on { "ON" } else { "OFF" });
    }
}

/// [EVENT] データレジスタの書き出し
pub fn log_write_flush(half_track: u8, value: u8, delta: u64, bits: u32) {
    if is_enabled(DiskLogLevel::EVENT) {
        log::info!(
            target: "disk",
            "[WRITE] htrack={} value=${:02X} delta={} bits={}",
            half_track, value, delta, bits
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_ring() {
        let mut ring = ByteRing::new(8);
        for i in 0..10 {
            ring.push(i as u8);
        }
        assert_eq!(ring.last_n(4), vec![6, 7, 8, 9]);
        assert_eq!(ring.last_n(100).len(), 8);
    }

    #[test]
    fn test_log_level() {
        set_log_level(DiskLogLevel::FLOW | DiskLogLevel::STATE);
        assert!(is_enabled(DiskLogLevel::FLOW));
        assert!(is_enabled(DiskLogLevel::STATE));
        assert!(!is_enabled(DiskLogLevel::EVENT));
        assert!(!is_enabled(DiskLogLevel::BITS));
        assert_eq!(get_log_level(), DiskLogLevel::FLOW | DiskLogLevel::STATE);
        set_log_level(DiskLogLevel::empty());
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!(parse_levels("flow, bits").unwrap(), DiskLogLevel::FLOW | DiskLogLevel::BITS);
        assert_eq!(parse_levels("all").unwrap(), DiskLogLevel::all());
        assert_eq!(parse_levels("").unwrap(), DiskLogLevel::empty());
        assert!(parse_levels("nibble").is_err());
    }
}
