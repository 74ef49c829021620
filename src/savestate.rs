//! セーブステート機能
//!
//! マシン全体（CPU・ソフトスイッチ・RAM・2台のドライブ）の状態を
//! JSON に保存・復元する。RAM とディスクイメージは base64 で格納する。
//! 復元は全項目を検証してから適用する（失敗時はマシンを変更しない）。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::cpu::Cpu;
use crate::drive::{DiskController, DriveUnit, DRIVE_COUNT, MAX_HALF_TRACK};
use crate::error::StateError;
use crate::woz::{DiskFormat, HALF_TRACKS};

/// CPUレジスタの状態（セーブ用）
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CpuState {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub status: u8,
    pub total_cycles: u64,
    pub irq_pending: bool,
    pub nmi_pending: bool,
    #[serde(default)]
    pub prev_nmi: bool,
}

impl CpuState {
    pub fn capture(cpu: &Cpu) -> Self {
        CpuState {
            a: cpu.regs.a,
            x: cpu.regs.x,
            y: cpu.regs.y,
            sp: cpu.regs.sp,
            pc: cpu.regs.pc,
            status: cpu.regs.status,
            total_cycles: cpu.total_cycles,
            irq_pending: cpu.irq_pending,
            nmi_pending: cpu.nmi_pending,
            prev_nmi: cpu.prev_nmi,
        }
    }

    pub fn apply(&self, cpu: &mut Cpu) {
        cpu.regs.a = self.a;
        cpu.regs.x = self.x;
        cpu.regs.y = self.y;
        cpu.regs.sp = self.sp;
        cpu.regs.pc = self.pc;
        cpu.regs.status = self.status;
        cpu.total_cycles = self.total_cycles;
        cpu.irq_pending = self.irq_pending;
        cpu.nmi_pending = self.nmi_pending;
        cpu.prev_nmi = self.prev_nmi;
    }
}

/// ディスクドライブの状態（セーブ用）
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DriveState {
    pub file_name: String,
    pub format: Option<DiskFormat>,
    pub motor_running: bool,
    pub write_mode: bool,
    pub write_protected: bool,
    pub half_track: u8,
    pub prev_half_track: u8,
    pub phase: u8,
    pub track_start: Vec<usize>,
    pub track_nbits: Vec<u32>,
    pub track_location: u32,
    pub dirty: bool,
    /// ディスクイメージ（base64）
    pub data: String,
}

impl DriveState {
    pub fn capture(unit: &DriveUnit) -> Self {
        DriveState {
            file_name: unit.file_name.clone(),
            format: unit.format,
            motor_running: unit.motor_running,
            write_mode: unit.write_mode,
            write_protected: unit.write_protected,
            half_track: unit.half_track,
            prev_half_track: unit.prev_half_track,
            phase: unit.phase,
            track_start: unit.track_start.to_vec(),
            track_nbits: unit.track_nbits.to_vec(),
            track_location: unit.track_location,
            dirty: unit.dirty,
            data: encode_bytes(&unit.image),
        }
    }

    /// 検証してドライブを組み立てる
    pub fn decode(&self, drive: usize) -> Result<DriveUnit, StateError> {
        let invalid = |reason: String| StateError::Drive { drive, reason };

        let image = decode_bytes(&self.data)?;
        let track_start: [usize; HALF_TRACKS] = self
            .track_start
            .as_slice()
            .try_into()
            .map_err(|_| invalid(format!("{} track start entries", self.track_start.len())))?;
        let track_nbits: [u32; HALF_TRACKS] = self
            .track_nbits
            .as_slice()
            .try_into()
            .map_err(|_| invalid(format!("{} track length entries", self.track_nbits.len())))?;
        if self.half_track > MAX_HALF_TRACK || self.prev_half_track > MAX_HALF_TRACK {
            return Err(invalid(format!("half track {} out of range", self.half_track)));
        }
        if self.phase > 3 {
            return Err(invalid(format!("stepper phase {}", self.phase)));
        }
        if let Some(h) = (0..HALF_TRACKS).find(|&h| {
            let start = track_start[h];
            start != 0 && start + (track_nbits[h] as usize).div_ceil(8) > image.len()
        }) {
            return Err(invalid(format!("track {} lies outside the image", h)));
        }

        Ok(DriveUnit {
            file_name: self.file_name.clone(),
            format: self.format,
            motor_running: self.motor_running,
            write_mode: self.write_mode,
            write_protected: self.write_protected,
            half_track: self.half_track,
            prev_half_track: self.prev_half_track,
            phase: self.phase,
            image,
            track_start,
            track_nbits,
            track_location: self.track_location,
            dirty: self.dirty,
        })
    }
}

/// Disk IIコントローラの状態（セーブ用）
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DiskState {
    pub current: usize,
    pub prev_cycle: u64,
    pub data_register: u8,
    pub motor_off_at: Option<u64>,
    pub drives: [DriveState; DRIVE_COUNT],
}

impl DiskState {
    pub fn capture(disk: &DiskController) -> Self {
        DiskState {
            current: disk.current,
            prev_cycle: disk.prev_cycle,
            data_register: disk.data_register,
            motor_off_at: disk.motor_off_at,
            drives: [
                DriveState::capture(&disk.drives[0]),
                DriveState::capture(&disk.drives[1]),
            ],
        }
    }

    /// 両ドライブを検証して組み立てる
    pub fn decode_drives(&self) -> Result<[DriveUnit; DRIVE_COUNT], StateError> {
        if self.current >= DRIVE_COUNT {
            return Err(StateError::Drive {
                drive: self.current,
                reason: "selected drive does not exist".to_string(),
            });
        }
        Ok([self.drives[0].decode(0)?, self.drives[1].decode(1)?])
    }
}

/// 完全なエミュレータ状態
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SaveState {
    /// セーブフォーマットのバージョン
    pub version: u32,
    pub cpu: CpuState,
    /// スイッチ名 → 状態
    pub switches: BTreeMap<String, bool>,
    pub keyboard_latch: u8,
    /// RAM全体（base64）
    pub memory: String,
    pub disk: DiskState,
    pub cycle_count: u64,
}

impl SaveState {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn check_version(&self) -> Result<(), StateError> {
        if self.version != Self::CURRENT_VERSION {
            return Err(StateError::Version {
                found: self.version,
                expected: Self::CURRENT_VERSION,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StateError> {
        Ok(serde_json::from_str(json)?)
    }

    /// ファイルに保存
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), StateError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// ファイルから読み込み
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        let json = fs::read_to_string(path)?;
        let state = Self::from_json(&json)?;
        state.check_version()?;
        Ok(state)
    }
}

pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_bytes(text: &str) -> Result<Vec<u8>, StateError> {
    Ok(STANDARD.decode(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_drive() -> DriveState {
        DriveState::capture(&DriveUnit::new())
    }

    #[test]
    fn test_drive_state_round_trip() {
        let state = sample_drive();
        let unit = state.decode(0).unwrap();
        assert_eq!(DriveState::capture(&unit), state);
    }

    #[test]
    fn test_drive_state_rejects_bad_tables() {
        let mut state = sample_drive();
        state.track_start.pop();
        assert!(matches!(state.decode(1), Err(StateError::Drive { drive: 1, .. })));

        let mut state = sample_drive();
        state.track_start[0] = 1536;
        assert!(matches!(state.decode(0), Err(StateError::Drive { .. })));

        let mut state = sample_drive();
        state.half_track = 70;
        assert!(state.decode(0).is_err());
    }

    #[test]
    fn test_file_round_trip_checks_version() {
        use crate::cpu::CpuType;
        use crate::machine::{create_test_rom, Machine};

        let mut machine = Machine::new(CpuType::Cpu65C02);
        machine.load_rom(&create_test_rom());
        machine.boot();
        let state = machine.save_state();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quicksave.json");
        state.save_to(&path).unwrap();
        assert_eq!(SaveState::load_from(&path).unwrap(), state);

        let mut old = state.clone();
        old.version = 0;
        old.save_to(&path).unwrap();
        assert!(matches!(
            SaveState::load_from(&path),
            Err(StateError::Version { found: 0, expected: 1 })
        ));
        assert!(matches!(
            SaveState::load_from(dir.path().join("missing.json")),
            Err(StateError::Io(_))
        ));
    }

    #[test]
    fn test_bad_base64() {
        assert!(matches!(decode_bytes("@@@"), Err(StateError::Base64(_))));
        assert_eq!(decode_bytes(&encode_bytes(&[1, 2, 3])).unwrap(), vec![1, 2, 3]);
    }
}
