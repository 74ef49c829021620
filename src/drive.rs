//! Disk II ドライブコントローラ
//!
//! スロット6の16個のレジスタ（$C0E0-$C0EF）を、2台のドライブの
//! ビットストリーム読み書きに変換する。ビット単位でトラックを回し、
//! 読み出しは自己同期（先頭の1ビットまで読み飛ばす）でバイトを組み立てる。
//! 書き込みは前回のロードからの経過サイクルで書き出すビット数を決める。

use serde::Serialize;

use crate::disk_log::{self, ByteRing, DiskLogLevel};
use crate::error::{DiskError, DiskWarning};
use crate::softswitch::{SoftSwitches, Switch};
use crate::woz::{self, DecodedDisk, DiskFormat, EMPTY_TRACK_BITS, HALF_TRACKS};

/// ヘッドの可動範囲（ハーフトラック）
pub const MAX_HALF_TRACK: u8 = 68;
/// モーターOFF要求から実際に止まるまで（約1秒）
pub const MOTOR_OFF_DELAY_CYCLES: u64 = 1_020_484;

pub const DRIVE_COUNT: usize = 2;
pub const EMPTY_DISK_NAME: &str = "(empty)";

/// 外部（UI・音）向けのドライブイベント
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriveEvent {
    MotorOn { drive: usize },
    MotorOff { drive: usize },
    HeadMoved { drive: usize, half_track: u8 },
    /// 端点を越えようとした（1回の試行につき1回）
    HeadAtStop { drive: usize, half_track: u8 },
    DiskInserted { drive: usize },
    DiskEjected { drive: usize },
}

/// ヘッド移動の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadMove {
    Moved,
    AtStop,
}

/// 公開用のドライブ状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveStatus {
    pub file_name: String,
    pub has_disk: bool,
    pub half_track: u8,
    pub motor_running: bool,
    pub write_protected: bool,
    pub dirty: bool,
}

/// ドライブ1台
#[derive(Debug, Clone)]
pub struct DriveUnit {
    pub file_name: String,
    pub format: Option<DiskFormat>,
    pub motor_running: bool,
    pub write_mode: bool,
    pub write_protected: bool,
    pub half_track: u8,
    pub prev_half_track: u8,
    /// ステッパーの現在フェーズ（0-3）
    pub phase: u8,
    /// WOZコンテナ（空 = ディスクなし）
    pub image: Vec<u8>,
    pub track_start: [usize; HALF_TRACKS],
    pub track_nbits: [u32; HALF_TRACKS],
    /// トラック内のビット位置
    pub track_location: u32,
    /// 未保存の変更がある
    pub dirty: bool,
}

impl Default for DriveUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveUnit {
    pub fn new() -> Self {
        DriveUnit {
            file_name: EMPTY_DISK_NAME.to_string(),
            format: None,
            motor_running: false,
            write_mode: false,
            write_protected: false,
            half_track: MAX_HALF_TRACK,
            prev_half_track: MAX_HALF_TRACK,
            phase: 0,
            image: Vec::new(),
            track_start: [0; HALF_TRACKS],
            track_nbits: [EMPTY_TRACK_BITS; HALF_TRACKS],
            track_location: 0,
            dirty: false,
        }
    }

    pub fn has_disk(&self) -> bool {
        !self.image.is_empty()
    }

    fn track_is_empty(&self, half_track: u8) -> bool {
        self.track_start[half_track as usize] == 0
    }

    /// デコード済みイメージを載せる（ヘッド位置はそのまま）
    fn load(&mut self, disk: DecodedDisk) {
        self.file_name = disk.file_name;
        self.format = Some(disk.format);
        self.image = disk.image;
        self.track_start = disk.track_start;
        self.track_nbits = disk.track_nbits;
        self.write_protected = disk.write_protected;
        self.dirty = disk.converted;
        self.track_location = 0;
    }

    /// ディスクを取り出す（モーター・ヘッドの状態は残す）
    fn clear(&mut self) {
        self.file_name = EMPTY_DISK_NAME.to_string();
        self.format = None;
        self.image = Vec::new();
        self.track_start = [0; HALF_TRACKS];
        self.track_nbits = [EMPTY_TRACK_BITS; HALF_TRACKS];
        self.write_protected = false;
        self.dirty = false;
        self.track_location = 0;
    }

    /// ヘッドを offset ハーフトラック動かす
    pub fn move_head(&mut self, offset: i32) -> HeadMove {
        if !self.track_is_empty(self.half_track) {
            self.prev_half_track = self.half_track;
        }
        let target = self.half_track as i32 + offset;
        let result = if (0..=MAX_HALF_TRACK as i32).contains(&target) {
            HeadMove::Moved
        } else {
            HeadMove::AtStop
        };
        self.half_track = target.clamp(0, MAX_HALF_TRACK as i32) as u8;

        // 新しいトラックのビット数に合わせて回転位置を換算
        if !self.track_is_empty(self.half_track) && self.prev_half_track != self.half_track {
            let new_bits = self.track_nbits[self.half_track as usize] as u64;
            let prev_bits = self.track_nbits[self.prev_half_track as usize].max(1) as u64;
            let mut location = (self.track_location as u64 * new_bits / prev_bits) as u32;
            if location > 3 {
                location -= 4;
            }
            self.track_location = location;
        }
        result
    }

    /// 現在位置のバイトオフセットとビット番号。空トラックは None
    fn bit_position(&mut self) -> Option<(usize, u8)> {
        let h = self.half_track as usize;
        let nbits = self.track_nbits[h];
        if nbits == 0 {
            self.track_location = 0;
            return None;
        }
        self.track_location %= nbits;
        if self.track_start[h] == 0 {
            return None;
        }
        let offset = self.track_start[h] + (self.track_location >> 3) as usize;
        (offset < self.image.len()).then_some((offset, (self.track_location & 7) as u8))
    }

    /// 次の1ビット（空トラックは1）
    pub fn next_bit(&mut self) -> u8 {
        let bit = match self.bit_position() {
            Some((offset, b)) => (self.image[offset] >> (7 - b)) & 1,
            None => 1,
        };
        self.track_location = self.track_location.wrapping_add(1);
        bit
    }

    /// 次のバイト（先頭の1ビットまで読み飛ばす）
    ///
    /// 1周しても1ビットが見つからないトラック（未フォーマット）は 0。
    pub fn next_byte(&mut self) -> u8 {
        if !self.has_disk() {
            return 0;
        }
        let revolution = self.track_nbits[self.half_track as usize].max(1);
        if !(0..revolution).any(|_| self.next_bit() == 1) {
            return 0;
        }
        let mut result = 0x80;
        for shift in (0..7).rev() {
            result |= self.next_bit() << shift;
        }
        result
    }

    /// 1ビット書き込む（空トラックでは位置だけ進む）
    pub fn write_bit(&mut self, bit: u8) {
        if let Some((offset, b)) = self.bit_position() {
            let mask = 0x80 >> b;
            if bit != 0 {
                self.image[offset] |= mask;
            } else {
                self.image[offset] &= !mask;
            }
        }
        self.track_location = self.track_location.wrapping_add(1);
    }

    /// データレジスタを書き出す
    ///
    /// 経過16サイクル以上で8ビット、36以上で0を1ビット、40以上でさらに1ビット。
    /// ディスクなし・空トラック・レジスタが0のときは何もせず None。
    /// それ以外は書いたビット数を返し、呼び出し側はレジスタをクリアする。
    pub fn write_byte(&mut self, value: u8, delta: u64) -> Option<u32> {
        if !self.has_disk() || self.track_is_empty(self.half_track) || value == 0 {
            return None;
        }
        let mut bits = 0;
        if delta >= 16 {
            for shift in (0..8).rev() {
                self.write_bit((value >> shift) & 1);
            }
            bits += 8;
        }
        if delta >= 36 {
            self.write_bit(0);
            bits += 1;
        }
        if delta >= 40 {
            self.write_bit(0);
            bits += 1;
        }
        self.dirty = true;
        Some(bits)
    }

    pub fn status(&self) -> DriveStatus {
        DriveStatus {
            file_name: self.file_name.clone(),
            has_disk: self.has_disk(),
            half_track: self.half_track,
            motor_running: self.motor_running,
            write_protected: self.write_protected,
            dirty: self.dirty,
        }
    }
}

/// Disk II インターフェースカード
#[derive(Debug, Clone)]
pub struct DiskController {
    pub drives: [DriveUnit; DRIVE_COUNT],
    /// 選択中のドライブ
    pub current: usize,
    /// シーケンサの基準サイクル
    pub prev_cycle: u64,
    pub data_register: u8,
    /// モーター停止予定のサイクル
    pub motor_off_at: Option<u64>,
    events: Vec<DriveEvent>,
    recent: ByteRing,
}

impl Default for DiskController {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskController {
    pub fn new() -> Self {
        DiskController {
            drives: [DriveUnit::new(), DriveUnit::new()],
            current: 0,
            prev_cycle: 0,
            data_register: 0,
            motor_off_at: None,
            events: Vec::new(),
            recent: ByteRing::default(),
        }
    }

    fn emit(&mut self, event: DriveEvent) {
        disk_log::log_event(&event);
        self.events.push(event);
    }

    /// 溜まったイベントを取り出す
    pub fn take_events(&mut self) -> Vec<DriveEvent> {
        std::mem::take(&mut self.events)
    }

    /// スロット6のレジスタアクセス
    ///
    /// 対応するソフトスイッチは呼び出し前に切り替え済みであること。
    /// `value` は書き込みのときのみ Some。
    pub fn access(&mut self, reg: u8, value: Option<u8>, cycles: u64, switches: &SoftSwitches) -> u8 {
        let delta = cycles.saturating_sub(self.prev_cycle);
        let cur = self.current;
        match reg & 0x0F {
            0x0..=0x7 => self.step_phases(switches.phases()),
            0x8 => {
                // 約1秒後、DRIVE が OFF のままなら止める
                self.motor_off_at.get_or_insert(cycles + MOTOR_OFF_DELAY_CYCLES);
                if disk_log::is_enabled(DiskLogLevel::BITS) {
                    self.recent.dump(32);
                }
            }
            0x9 => {
                self.motor_off_at = None;
                if !self.drives[cur].motor_running {
                    self.drives[cur].motor_running = true;
                    self.emit(DriveEvent::MotorOn { drive: cur });
                }
            }
            0xA | 0xB => {
                let selected = (reg & 1) as usize;
                let other = 1 - selected;
                if self.drives[other].motor_running {
                    self.drives[other].motor_running = false;
                    self.emit(DriveEvent::MotorOff { drive: other });
                    if !self.drives[selected].motor_running {
                        self.drives[selected].motor_running = true;
                        self.emit(DriveEvent::MotorOn { drive: selected });
                    }
                }
                if selected != self.current {
                    disk_log::log_drive_select(selected);
                }
                self.current = selected;
            }
            0xC => {
                let drive = &mut self.drives[cur];
                if drive.motor_running && !drive.write_mode {
                    let byte = drive.next_byte();
                    if disk_log::is_enabled(DiskLogLevel::BITS) {
                        self.recent.push(byte);
                    }
                    return byte;
                }
            }
            0xD => {
                if self.drives[cur].motor_running && self.drives[cur].write_mode {
                    self.flush_write(delta);
                    self.prev_cycle = cycles;
                }
                if let Some(v) = value {
                    self.data_register = v;
                }
            }
            0xE => {
                if self.drives[cur].motor_running && self.drives[cur].write_mode {
                    self.flush_write(delta);
                    self.prev_cycle = cycles;
                }
                if self.drives[cur].write_mode {
                    disk_log::log_write_mode(cur, false);
                }
                self.drives[cur].write_mode = false;
                if switches.is_set(Switch::DrvData) {
                    return if self.drives[cur].write_protected { 0xFF } else { 0x00 };
                }
            }
            _ => {
                if !self.drives[cur].write_mode {
                    disk_log::log_write_mode(cur, true);
                }
                self.drives[cur].write_mode = true;
                self.prev_cycle = cycles;
                if let Some(v) = value {
                    self.data_register = v;
                }
            }
        }
        0
    }

    /// ステッパーフェーズの変化でヘッドを動かす
    fn step_phases(&mut self, phases: [bool; 4]) {
        let cur = self.current;
        let drive = &self.drives[cur];
        if !drive.motor_running || phases[drive.phase as usize] {
            return;
        }
        let phase = drive.phase as usize;
        let (offset, next_phase) = if phases[(phase + 1) % 4] {
            (1, (phase + 1) % 4)
        } else if phases[(phase + 3) % 4] {
            (-1, (phase + 3) % 4)
        } else {
            return;
        };
        let drive = &mut self.drives[cur];
        let result = drive.move_head(offset);
        drive.phase = next_phase as u8;
        let half_track = drive.half_track;
        self.emit(match result {
            HeadMove::Moved => DriveEvent::HeadMoved { drive: cur, half_track },
            HeadMove::AtStop => DriveEvent::HeadAtStop { drive: cur, half_track },
        });
    }

    fn flush_write(&mut self, delta: u64) {
        let value = self.data_register;
        let drive = &mut self.drives[self.current];
        if let Some(bits) = drive.write_byte(value, delta) {
            disk_log::log_write_flush(drive.half_track, value, delta, bits);
            self.data_register = 0;
        }
    }

    /// モーター停止タイマーを進める
    pub fn update(&mut self, cycles: u64, switches: &SoftSwitches) {
        if let Some(at) = self.motor_off_at {
            if cycles >= at {
                self.motor_off_at = None;
                self.motor_timeout(switches);
            }
        }
    }

    fn motor_timeout(&mut self, switches: &SoftSwitches) {
        let cur = self.current;
        if !switches.is_set(Switch::Drive) && self.drives[cur].motor_running {
            self.drives[cur].motor_running = false;
            self.emit(DriveEvent::MotorOff { drive: cur });
        }
    }

    /// リセット: DRIVE を OFF にしてモーターを止め、両ヘッドを 68 へ
    pub fn reset(&mut self, switches: &mut SoftSwitches) {
        switches.set(Switch::Drive, false);
        self.motor_off_at = None;
        self.motor_timeout(switches);
        for drive in self.drives.iter_mut() {
            drive.half_track = MAX_HALF_TRACK;
            drive.prev_half_track = MAX_HALF_TRACK;
        }
    }

    /// 一時停止/再開。再開時、回転中ならモーター音のために MotorOn を再送する
    pub fn pause(&mut self, resume: bool) {
        let cur = self.current;
        if resume && self.drives[cur].motor_running {
            self.emit(DriveEvent::MotorOn { drive: cur });
        }
    }

    fn check_drive(drive: usize) -> Result<(), DiskError> {
        if drive >= DRIVE_COUNT {
            return Err(DiskError::InvalidDrive(drive));
        }
        Ok(())
    }

    /// ディスクを挿入する。エラー時はドライブの内容を変更しない
    pub fn insert(
        &mut self,
        drive: usize,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Option<DiskWarning>, DiskError> {
        Self::check_drive(drive)?;
        let decoded = woz::decode(file_name, bytes)?;
        let warning = decoded.warning;
        self.drives[drive].load(decoded);
        self.emit(DriveEvent::DiskInserted { drive });
        Ok(warning)
    }

    pub fn eject(&mut self, drive: usize) -> Result<(), DiskError> {
        Self::check_drive(drive)?;
        if self.drives[drive].has_disk() {
            self.drives[drive].clear();
            self.emit(DriveEvent::DiskEjected { drive });
        }
        Ok(())
    }

    /// 保存用のイメージ（CRC を更新し、変更フラグを落とす）
    pub fn save(&mut self, drive: usize) -> Option<(String, Vec<u8>)> {
        let unit = self.drives.get_mut(drive)?;
        if !unit.has_disk() {
            return None;
        }
        woz::update_checksum(&mut unit.image);
        unit.dirty = false;
        Some((unit.file_name.clone(), unit.image.clone()))
    }

    pub fn status(&self, drive: usize) -> Option<DriveStatus> {
        self.drives.get(drive).map(DriveUnit::status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsk2woz::{self, SECTOR_IMAGE_SIZE};

    fn blank_woz() -> Vec<u8> {
        dsk2woz::convert(&vec![0u8; SECTOR_IMAGE_SIZE], dsk2woz::SectorOrder::Dos)
    }

    fn controller_with_disk() -> (DiskController, SoftSwitches) {
        let mut ctrl = DiskController::new();
        ctrl.insert(0, "blank.woz", blank_woz()).unwrap();
        ctrl.take_events();
        let mut switches = SoftSwitches::new();
        switches.touch(0xC0E9, false);
        ctrl.access(0x9, None, 0, &switches);
        (ctrl, switches)
    }

    /// フェーズ p をオン/オフする（スイッチ切り替え → レジスタ処理）
    fn phase(ctrl: &mut DiskController, switches: &mut SoftSwitches, p: u8, on: bool) {
        let reg = p * 2 + on as u8;
        switches.touch(0xC0E0 + reg as u16, false);
        ctrl.access(reg, None, 0, switches);
    }

    /// ハーフトラック1つ分外側（0方向）へ
    fn step_out(ctrl: &mut DiskController, switches: &mut SoftSwitches) {
        let cur = ctrl.drives[0].phase;
        let next = (cur + 3) % 4;
        phase(ctrl, switches, next, true);
        phase(ctrl, switches, cur, false);
        phase(ctrl, switches, next, false);
    }

    #[test]
    fn test_head_clamps_and_reports_each_stop() {
        let (mut ctrl, mut switches) = controller_with_disk();
        ctrl.drives[0].half_track = 2;
        for _ in 0..5 {
            step_out(&mut ctrl, &mut switches);
        }
        assert_eq!(ctrl.drives[0].half_track, 0);
        let events = ctrl.take_events();
        let moved = events.iter().filter(|e| matches!(e, DriveEvent::HeadMoved { .. })).count();
        let stops = events.iter().filter(|e| matches!(e, DriveEvent::HeadAtStop { .. })).count();
        assert_eq!(moved, 2);
        assert_eq!(stops, 3);
    }

    #[test]
    fn test_upper_stop_is_68() {
        let mut unit = DriveUnit::new();
        assert_eq!(unit.move_head(1), HeadMove::AtStop);
        assert_eq!(unit.half_track, MAX_HALF_TRACK);
        assert_eq!(unit.move_head(-1), HeadMove::Moved);
        assert_eq!(unit.half_track, 67);
    }

    #[test]
    fn test_head_needs_motor() {
        let mut ctrl = DiskController::new();
        let mut switches = SoftSwitches::new();
        ctrl.drives[0].half_track = 10;
        phase(&mut ctrl, &mut switches, 1, true);
        phase(&mut ctrl, &mut switches, 0, false);
        assert_eq!(ctrl.drives[0].half_track, 10);
        assert!(ctrl.take_events().is_empty());
    }

    #[test]
    fn test_bits_written_are_read_back() {
        let mut unit = DriveUnit::new();
        unit.load(woz::decode("blank.woz", blank_woz()).unwrap());
        unit.half_track = 0;
        let pattern: Vec<u8> = (0..100).map(|i| ((i * 7) % 3 == 0) as u8).collect();
        unit.track_location = 1234;
        for &bit in &pattern {
            unit.write_bit(bit);
        }
        unit.track_location = 1234;
        let read: Vec<u8> = (0..pattern.len()).map(|_| unit.next_bit()).collect();
        assert_eq!(read, pattern);
    }

    #[test]
    fn test_empty_track_reads_ones() {
        let mut unit = DriveUnit::new();
        unit.load(woz::decode("blank.woz", blank_woz()).unwrap());
        unit.half_track = 1;
        assert_eq!(unit.next_bit(), 1);
        unit.write_bit(0);
        assert_eq!(unit.track_location, 2);
        assert_eq!(unit.write_byte(0xFF, 40), None);
        assert!(!unit.dirty);
    }

    #[test]
    fn test_no_disk_reads_zero() {
        let mut unit = DriveUnit::new();
        assert_eq!(unit.next_byte(), 0);
    }

    #[test]
    fn test_erased_track_reads_zero() {
        let mut unit = DriveUnit::new();
        unit.load(woz::decode("blank.woz", blank_woz()).unwrap());
        unit.half_track = 0;
        let start = unit.track_start[0];
        let len = (unit.track_nbits[0] as usize).div_ceil(8);
        unit.image[start..start + len].fill(0);
        unit.track_location = 17;
        assert_eq!(unit.next_byte(), 0);
        assert_eq!(unit.next_byte(), 0);
        assert_eq!(unit.track_location % unit.track_nbits[0], 17);
    }

    #[test]
    fn test_write_ff_with_40_cycles() {
        let (mut ctrl, mut switches) = controller_with_disk();
        ctrl.drives[0].half_track = 0;
        ctrl.drives[0].track_location = 800;

        // $C0EF 書き込みモード + 値、$C0ED で 40 サイクル後に書き出し
        switches.touch(0xC0EF, true);
        ctrl.access(0xF, Some(0xFF), 1000, &switches);
        switches.touch(0xC0ED, true);
        ctrl.access(0xD, Some(0x00), 1040, &switches);
        assert!(ctrl.drives[0].dirty);
        assert_eq!(ctrl.drives[0].track_location, 810);
        assert_eq!(ctrl.data_register, 0);

        // 読み出しモードに戻して確認
        switches.touch(0xC0EE, false);
        ctrl.access(0xE, None, 1041, &switches);
        let unit = &mut ctrl.drives[0];
        unit.track_location = 800;
        let bits: Vec<u8> = (0..10).map(|_| unit.next_bit()).collect();
        assert_eq!(bits, vec![1, 1, 1, 1, 1, 1, 1, 1, 0, 0]);
    }

    #[test]
    fn test_sync_run_reads_back_ff() {
        let (mut ctrl, mut switches) = controller_with_disk();
        ctrl.drives[0].half_track = 0;
        ctrl.drives[0].track_location = 800;

        // 40 サイクルごとに $FF を6バイト（10ビット同期バイト）
        switches.touch(0xC0EF, true);
        ctrl.access(0xF, Some(0xFF), 1000, &switches);
        switches.touch(0xC0ED, true);
        for i in 1..=5 {
            ctrl.access(0xD, Some(0xFF), 1000 + i * 40, &switches);
        }
        switches.touch(0xC0EE, false);
        ctrl.access(0xE, None, 1240, &switches);
        assert_eq!(ctrl.drives[0].track_location, 860);

        // 同期の0ビットの途中から読んでも $FF に揃う
        let unit = &mut ctrl.drives[0];
        unit.track_location = 808;
        for _ in 0..5 {
            assert_eq!(unit.next_byte(), 0xFF);
        }
        assert_eq!(unit.track_location, 858);
    }

    #[test]
    fn test_load_latches_without_motor() {
        let mut ctrl = DiskController::new();
        let mut switches = SoftSwitches::new();
        switches.touch(0xC0ED, true);
        ctrl.access(0xD, Some(0x96), 0, &switches);
        assert_eq!(ctrl.data_register, 0x96);
    }

    #[test]
    fn test_write_thresholds() {
        let mut unit = DriveUnit::new();
        unit.load(woz::decode("blank.woz", blank_woz()).unwrap());
        unit.half_track = 0;
        assert_eq!(unit.write_byte(0xD5, 15), Some(0));
        assert_eq!(unit.write_byte(0xD5, 16), Some(8));
        assert_eq!(unit.write_byte(0xD5, 36), Some(9));
        assert_eq!(unit.write_byte(0xD5, 40), Some(10));
        assert_eq!(unit.write_byte(0x00, 40), None);
    }

    #[test]
    fn test_write_protect_sense() {
        let (mut ctrl, mut switches) = controller_with_disk();
        ctrl.drives[0].write_protected = true;
        switches.touch(0xC0ED, false);
        switches.touch(0xC0EE, false);
        assert_eq!(ctrl.access(0xE, None, 0, &switches), 0xFF);
        ctrl.drives[0].write_protected = false;
        assert_eq!(ctrl.access(0xE, None, 0, &switches), 0x00);
    }

    #[test]
    fn test_motor_off_is_delayed() {
        let (mut ctrl, mut switches) = controller_with_disk();
        assert!(ctrl.drives[0].motor_running);
        switches.touch(0xC0E8, false);
        ctrl.access(0x8, None, 100, &switches);
        ctrl.update(100 + MOTOR_OFF_DELAY_CYCLES - 1, &switches);
        assert!(ctrl.drives[0].motor_running);
        ctrl.update(100 + MOTOR_OFF_DELAY_CYCLES, &switches);
        assert!(!ctrl.drives[0].motor_running);
        assert!(ctrl.take_events().contains(&DriveEvent::MotorOff { drive: 0 }));
    }

    #[test]
    fn test_motor_stays_on_if_drive_reenabled() {
        let (mut ctrl, mut switches) = controller_with_disk();
        switches.touch(0xC0E8, false);
        ctrl.access(0x8, None, 0, &switches);
        switches.touch(0xC0E9, false);
        ctrl.update(MOTOR_OFF_DELAY_CYCLES, &switches);
        assert!(ctrl.drives[0].motor_running);
    }

    #[test]
    fn test_drive_select_transfers_motor() {
        let (mut ctrl, mut switches) = controller_with_disk();
        ctrl.take_events();
        switches.touch(0xC0EB, false);
        ctrl.access(0xB, None, 0, &switches);
        assert_eq!(ctrl.current, 1);
        assert!(!ctrl.drives[0].motor_running);
        assert!(ctrl.drives[1].motor_running);
        assert_eq!(
            ctrl.take_events(),
            vec![DriveEvent::MotorOff { drive: 0 }, DriveEvent::MotorOn { drive: 1 }]
        );

        // 同じドライブの再選択ではイベントなし
        switches.touch(0xC0EB, false);
        ctrl.access(0xB, None, 0, &switches);
        assert!(ctrl.take_events().is_empty());
    }

    #[test]
    fn test_insert_error_keeps_previous_disk() {
        let (mut ctrl, _) = controller_with_disk();
        let err = ctrl.insert(0, "bad.xyz", vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, DiskError::UnknownFormat(_)));
        assert_eq!(ctrl.drives[0].file_name, "blank.woz");
        assert!(matches!(ctrl.insert(2, "x.woz", blank_woz()), Err(DiskError::InvalidDrive(2))));
    }

    #[test]
    fn test_save_clears_dirty() {
        let mut ctrl = DiskController::new();
        ctrl.insert(1, "master.dsk", vec![0u8; SECTOR_IMAGE_SIZE]).unwrap();
        assert!(ctrl.drives[1].dirty);
        let (name, image) = ctrl.save(1).unwrap();
        assert_eq!(name, "master.woz");
        assert!(woz::verify_checksum(&image).is_none());
        assert!(!ctrl.drives[1].dirty);
        assert!(ctrl.save(0).is_none());

        ctrl.eject(1).unwrap();
        assert!(!ctrl.drives[1].has_disk());
        assert_eq!(ctrl.drives[1].file_name, EMPTY_DISK_NAME);
    }

    #[test]
    fn test_reset_parks_heads() {
        let (mut ctrl, mut switches) = controller_with_disk();
        ctrl.drives[0].half_track = 4;
        ctrl.reset(&mut switches);
        assert!(!switches.is_set(Switch::Drive));
        assert!(!ctrl.drives[0].motor_running);
        assert_eq!(ctrl.drives[0].half_track, MAX_HALF_TRACK);
        assert_eq!(ctrl.drives[1].prev_half_track, MAX_HALF_TRACK);
    }

    /// セクタを読む（アドレスフィールド → データフィールド）
    fn read_sector(unit: &mut DriveUnit, want: u8) -> [u8; 256] {
        let decode_4and4 = |a: u8, b: u8| ((a << 1) | 1) & b;
        for _ in 0..20000 {
            if unit.next_byte() != 0xD5 || unit.next_byte() != 0xAA || unit.next_byte() != 0x96 {
                continue;
            }
            let field: Vec<u8> = (0..8).map(|_| unit.next_byte()).collect();
            let sector = decode_4and4(field[4], field[5]);
            if sector != want {
                continue;
            }
            while unit.next_byte() != 0xD5 {}
            assert_eq!(unit.next_byte(), 0xAA);
            assert_eq!(unit.next_byte(), 0xAD);
            let encoded: Vec<u8> = (0..343).map(|_| unit.next_byte()).collect();
            return dsk2woz::decode_6and2(&encoded).expect("checksum");
        }
        panic!("sector {} not found", want);
    }

    fn sector_round_trip(name: &str, order: &[usize; 16]) {
        let image: Vec<u8> = (0..SECTOR_IMAGE_SIZE)
            .map(|i| ((i / 256) as u8).wrapping_mul(31) ^ (i as u8))
            .collect();
        let mut ctrl = DiskController::new();
        ctrl.insert(0, name, image.clone()).unwrap();
        let unit = &mut ctrl.drives[0];
        for track in [0u8, 17, 34] {
            unit.half_track = track * 2;
            for physical in 0..16u8 {
                let data = read_sector(unit, physical);
                let offset = track as usize * 4096 + order[physical as usize] * 256;
                assert_eq!(&data[..], &image[offset..offset + 256], "T{} S{}", track, physical);
            }
        }
    }

    #[test]
    fn test_dsk_sectors_survive_conversion() {
        sector_round_trip("dos.dsk", &dsk2woz::DOS_SECTOR_ORDER);
    }

    #[test]
    fn test_po_sectors_survive_conversion() {
        sector_round_trip("prodos.po", &dsk2woz::PRODOS_SECTOR_ORDER);
    }
}
