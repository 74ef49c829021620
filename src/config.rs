//! 設定ファイル管理モジュール
//!
//! エミュレータの設定をJSON形式で永続化

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cpu::CpuType;
use crate::error::ConfigError;
use crate::scheduler::Speed;

/// 設定ファイルのデフォルトファイル名
const CONFIG_FILENAME: &str = "a2core_config.json";

/// 実行ファイルのディレクトリを取得
pub fn get_exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// 相対パスを指定されたベースディレクトリからの絶対パスに解決
pub fn resolve_path_with_base(base: &Path, relative: &str) -> PathBuf {
    let path = Path::new(relative);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(relative)
    }
}

/// 設定ファイルのパスを取得
pub fn get_config_path() -> PathBuf {
    get_exe_dir().join(CONFIG_FILENAME)
}

/// エミュレータ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CPUの種類（"6502" / "65c02"）
    pub cpu: CpuType,
    /// 速度（"normal" / "uncapped"）
    pub speed: Speed,
    /// 自動スナップショットの間隔（フレーム数、0 で無効）
    pub snapshot_interval_frames: u32,
    /// 最後に使用したディスク1のパス
    pub last_disk1: Option<String>,
    /// 最後に使用したディスク2のパス
    pub last_disk2: Option<String>,
    /// ROMのパス
    pub rom_path: Option<String>,
    /// Disk II ブートROM（256バイト）のパス
    pub disk_rom_path: Option<String>,
    /// セーブデータディレクトリ
    pub save_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cpu: CpuType::Cpu65C02,
            speed: Speed::Normal,
            snapshot_interval_frames: 60,
            last_disk1: None,
            last_disk2: None,
            rom_path: None,
            disk_rom_path: None,
            save_dir: "saves".to_string(),
        }
    }
}

impl Config {
    /// 指定したパスから設定を読み込む
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 読み込めなければデフォルト設定を使う
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Config::default();
        }
        match Self::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config {:?}: {}, using defaults", path, e);
                Config::default()
            }
        }
    }

    /// 指定したパスに設定を保存する
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// ドライブ番号（0/1）の最後のディスク
    pub fn last_disk(&self, drive: usize) -> Option<&str> {
        match drive {
            0 => self.last_disk1.as_deref(),
            1 => self.last_disk2.as_deref(),
            _ => None,
        }
    }

    pub fn set_last_disk(&mut self, drive: usize, path: &str) {
        match drive {
            0 => self.last_disk1 = Some(path.to_string()),
            1 => self.last_disk2 = Some(path.to_string()),
            _ => {}
        }
    }

    /// セーブディレクトリの絶対パスを取得（相対パスは `base` から）
    pub fn save_dir_path(&self, base: &Path) -> PathBuf {
        resolve_path_with_base(base, &self.save_dir)
    }

    /// セーブファイルのパスを取得
    pub fn save_path(&self, base: &Path, slot: u8) -> PathBuf {
        let filename = if slot == 0 {
            "quicksave.json".to_string()
        } else {
            format!("save_slot_{}.json", slot)
        };
        self.save_dir_path(base).join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.cpu = CpuType::Cpu6502;
        config.speed = Speed::Uncapped;
        config.set_last_disk(1, "disks/dos33.woz");
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.last_disk(1), Some("disks/dos33.woz"));
        assert_eq!(loaded.last_disk(0), None);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{"cpu": "6502"}"#).unwrap();
        assert_eq!(config.cpu, CpuType::Cpu6502);
        assert_eq!(config.speed, Speed::Normal);
        assert_eq!(config.snapshot_interval_frames, 60);
        assert_eq!(config.save_dir, "saves");
    }

    #[test]
    fn test_bad_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Json(_))));
        assert_eq!(Config::load_or_default(&path), Config::default());
        assert!(matches!(
            Config::load_from(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_save_path() {
        let config = Config::default();
        let base = Path::new("/tmp/a2");
        assert_eq!(config.save_path(base, 0), base.join("saves/quicksave.json"));
        assert_eq!(config.save_path(base, 3), base.join("saves/save_slot_3.json"));
    }
}
