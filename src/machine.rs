//! Apple II マシン
//!
//! CPU、メモリ、Disk II、デバッガを統合する。
//! スロット6のレジスタ（$C0E0-$C0EF）はディスクコントローラへ振り分ける。

use crate::cpu::{Cpu, CpuType, MemoryBus};
use crate::debugger::Debugger;
use crate::drive::DiskController;
use crate::error::StateError;
use crate::memory::Memory;
use crate::savestate::{self, CpuState, DiskState, SaveState};
use crate::softswitch::IoRoute;

/// Disk II コントローラを挿すスロット
pub const DISK_SLOT: u8 = 6;

/// 1命令分の実行結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// 消費したサイクル数
    Cycles(u32),
    /// ブレークポイント、またはステップアウト完了で停止
    Halted,
}

/// Apple IIエミュレータのメイン構造体
pub struct Machine {
    pub cpu: Cpu,
    pub memory: Memory,
    pub disk: DiskController,
    pub debugger: Debugger,
    /// 起動からの累積サイクル数
    pub cycle_count: u64,
    /// Disk II P5 ブートROM
    disk_rom: Option<[u8; 256]>,
    /// 再開直後の1命令はブレークポイントで止めない
    skip_breakpoint: bool,
}

/// メモリバスの実装（Disk II I/Oを含む）
impl MemoryBus for Machine {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0xC000..=0xC0FF => self.io_access(address, None),
            _ => self.memory.read(address),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0xC000..=0xC0FF => {
                self.io_access(address, Some(value));
            }
            _ => self.memory.write(address, value),
        }
    }
}

impl Machine {
    pub fn new(cpu_type: CpuType) -> Self {
        Machine {
            cpu: Cpu::new(cpu_type),
            memory: Memory::new(),
            disk: DiskController::new(),
            debugger: Debugger::new(),
            cycle_count: 0,
            disk_rom: None,
            skip_breakpoint: false,
        }
    }

    /// スイッチを切り替えてから、経路ごとのハンドラを呼ぶ
    fn io_access(&mut self, address: u16, value: Option<u8>) -> u8 {
        match self.memory.decode_io(address, value.is_some()) {
            IoRoute::Slot { slot: DISK_SLOT, reg } => {
                self.disk
                    .access(reg, value, self.cycle_count, &self.memory.switches)
            }
            route => self.memory.handle_io(route, address, value),
        }
    }

    /// ROMをロード
    ///
    /// 20KB / 32KB のROMファイルは $0600 に Disk II ブートROMを含むことがある。
    pub fn load_rom(&mut self, rom_data: &[u8]) {
        self.memory.load_rom(rom_data);
        if matches!(rom_data.len(), 0x5000 | 0x8000) {
            let candidate = &rom_data[0x0600..0x0700];
            if is_disk_rom(candidate) {
                let mut boot_rom = [0u8; 256];
                boot_rom.copy_from_slice(candidate);
                self.disk_rom = Some(boot_rom);
                log::info!("Loaded Disk II Boot ROM from ROM file");
            }
        }
    }

    /// 外部Disk II Boot ROMをロード
    pub fn load_disk_rom(&mut self, rom_data: &[u8]) -> Result<(), &'static str> {
        if rom_data.len() != 256 {
            return Err("Disk II ROM must be 256 bytes");
        }
        if !is_disk_rom(rom_data) {
            return Err("Invalid Disk II ROM (should start with A2 20)");
        }
        let mut boot_rom = [0u8; 256];
        boot_rom.copy_from_slice(rom_data);
        self.disk_rom = Some(boot_rom);
        self.memory.set_slot_rom(DISK_SLOT as usize, rom_data)?;
        log::info!("Loaded external Disk II Boot ROM");
        Ok(())
    }

    pub fn has_disk_rom(&self) -> bool {
        self.disk_rom.is_some()
    }

    /// コールドブート: RAMをクリアし、スロットROMを差してリセット
    pub fn boot(&mut self) {
        self.cycle_count = 0;
        self.memory.reset_memory();
        if let Some(rom) = self.disk_rom {
            if let Err(e) = self.memory.set_slot_rom(DISK_SLOT as usize, &rom) {
                log::warn!("Failed to install Disk II ROM: {}", e);
            }
        }
        self.reset();
        log::info!("Boot: PC=${:04X}", self.cpu.regs.pc);
    }

    /// ウォームリセット（RAMは保持）
    pub fn reset(&mut self) {
        // ソフトスイッチを初期状態に（テキストモード）
        self.memory.switches.reset();
        // ROM読み出し、LC書き込み禁止
        self.read(0xC082);

        let mut cpu = std::mem::take(&mut self.cpu);
        cpu.reset(self);
        self.cpu = cpu;

        self.disk.reset(&mut self.memory.switches);
        self.skip_breakpoint = false;
    }

    /// 次の1命令はブレークポイントを無視する（停止位置からの再開用）
    pub fn resume(&mut self) {
        self.skip_breakpoint = true;
    }

    /// 1命令を実行する
    ///
    /// `step` が false のときは PC 上の有効なブレークポイントで実行せずに停止する。
    pub fn process_instruction(&mut self, step: bool) -> Step {
        let skip = std::mem::take(&mut self.skip_breakpoint);
        if !step && !skip && self.debugger.check_breakpoint(self.cpu.regs.pc) {
            log::debug!("Breakpoint hit at ${:04X}", self.cpu.regs.pc);
            return Step::Halted;
        }

        // CPUを一時的に取り出す（借用の衝突を避けるため）
        let mut cpu = std::mem::take(&mut self.cpu);
        let cycles = cpu.step(self);
        self.cpu = cpu;

        self.cycle_count += cycles as u64;
        self.disk.update(self.cycle_count, &self.memory.switches);

        if self
            .debugger
            .return_reached(self.cpu.last_opcode(), self.cpu.regs.sp)
        {
            log::debug!("Step out finished at ${:04X}", self.cpu.regs.pc);
            return Step::Halted;
        }
        Step::Cycles(cycles)
    }

    /// 指定サイクル数を実行する。停止した場合は false
    pub fn run_cycles(&mut self, cycles: u64) -> bool {
        let target = self.cycle_count + cycles;
        while self.cycle_count < target {
            if self.process_instruction(false) == Step::Halted {
                return false;
            }
        }
        true
    }

    /// 現在の状態をセーブステートとして取得
    pub fn save_state(&self) -> SaveState {
        SaveState {
            version: SaveState::CURRENT_VERSION,
            cpu: CpuState::capture(&self.cpu),
            switches: self.memory.switches.to_map(),
            keyboard_latch: self.memory.keyboard_latch(),
            memory: savestate::encode_bytes(&self.memory.snapshot_image()),
            disk: DiskState::capture(&self.disk),
            cycle_count: self.cycle_count,
        }
    }

    /// セーブステートから状態を復元
    ///
    /// すべて検証してから書き込むので、エラー時はマシンに触れない。
    pub fn restore_state(&mut self, state: &SaveState) -> Result<(), StateError> {
        state.check_version()?;
        let image = savestate::decode_bytes(&state.memory)?;
        Memory::check_image(&image)?;
        let [drive0, drive1] = state.disk.decode_drives()?;

        self.memory.restore_image(&image)?;
        self.memory.switches.apply_map(&state.switches);
        self.memory.set_keyboard_latch(state.keyboard_latch);
        state.cpu.apply(&mut self.cpu);

        self.disk.drives = [drive0, drive1];
        self.disk.current = state.disk.current;
        self.disk.prev_cycle = state.disk.prev_cycle;
        self.disk.data_register = state.disk.data_register;
        self.disk.motor_off_at = state.disk.motor_off_at;

        self.cycle_count = state.cycle_count;
        self.skip_breakpoint = false;
        Ok(())
    }
}

fn is_disk_rom(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xA2 && data[1] == 0x20
}

/// テスト用ROM（$F000 で無限ループ）
#[cfg(test)]
pub(crate) fn create_test_rom() -> Vec<u8> {
    let mut rom = vec![0xEAu8; 0x4000];
    // $F000: JMP $F000
    rom[0x3000..0x3003].copy_from_slice(&[0x4C, 0x00, 0xF0]);
    // RESET / IRQ / NMI → $F000
    for vector in [0x3FFA, 0x3FFC, 0x3FFE] {
        rom[vector] = 0x00;
        rom[vector + 1] = 0xF0;
    }
    rom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::flags;
    use crate::softswitch::Switch;

    fn booted() -> Machine {
        let mut machine = Machine::new(CpuType::Cpu65C02);
        machine.load_rom(&create_test_rom());
        machine.boot();
        machine
    }

    /// $0300: JSR $0310 / NOP / JMP $0304, $0310: LDA #$01 / RTS
    fn load_subroutine_program(machine: &mut Machine) {
        machine
            .memory
            .set_binary_block(0x0300, &[0x20, 0x10, 0x03, 0xEA, 0x4C, 0x04, 0x03]);
        machine.memory.set_binary_block(0x0310, &[0xA9, 0x01, 0x60]);
        machine.cpu.regs.pc = 0x0300;
    }

    #[test]
    fn test_boot_with_empty_drive() {
        let machine = booted();
        assert_eq!(machine.cpu.regs.pc, 0xF000);
        assert_eq!(machine.cpu.regs.sp, 0xFD);
        assert!(machine.cpu.regs.get_flag(flags::IRQ_DISABLE));
        assert_eq!(machine.cycle_count, 0);
        assert!(machine.memory.switches.is_set(Switch::Text));
        assert!(!machine.memory.switches.is_set(Switch::BsrReadRam));
        assert!(!machine.disk.drives[0].has_disk());
    }

    #[test]
    fn test_disk_rom_installed_on_boot() {
        let mut machine = Machine::new(CpuType::Cpu6502);
        machine.load_rom(&create_test_rom());
        let mut rom = [0u8; 256];
        rom[0] = 0xA2;
        rom[1] = 0x20;
        rom[2] = 0x77;
        machine.load_disk_rom(&rom).unwrap();
        assert!(machine.load_disk_rom(&[0u8; 256]).is_err());
        machine.boot();
        assert_eq!(machine.read(0xC602), 0x77);
    }

    #[test]
    fn test_slot6_dispatch() {
        let mut machine = booted();
        // モーターON
        machine.read(0xC0E9);
        assert!(machine.disk.drives[0].motor_running);
        assert!(machine.memory.switches.is_set(Switch::Drive));
        // ドライブ2を選択するとモーターも移る
        machine.read(0xC0EB);
        assert_eq!(machine.disk.current, 1);
        assert!(machine.disk.drives[1].motor_running);
        assert!(!machine.disk.drives[0].motor_running);
    }

    #[test]
    fn test_step_out_halts_after_return() {
        let mut machine = booted();
        load_subroutine_program(&mut machine);

        assert_eq!(machine.process_instruction(true), Step::Cycles(6));
        assert_eq!(machine.cpu.regs.pc, 0x0310);
        machine.debugger.arm_step_out(machine.cpu.regs.sp);

        assert_eq!(machine.process_instruction(false), Step::Cycles(2));
        assert_eq!(machine.process_instruction(false), Step::Halted);
        assert_eq!(machine.cpu.regs.pc, 0x0303);
        assert_eq!(machine.cpu.regs.a, 0x01);
        assert!(!machine.debugger.step_out_armed());
    }

    #[test]
    fn test_breakpoint_halts_before_execution() {
        let mut machine = booted();
        load_subroutine_program(&mut machine);
        machine.debugger.add_breakpoint(0x0310);

        assert_eq!(machine.process_instruction(false), Step::Cycles(6));
        assert_eq!(machine.process_instruction(false), Step::Halted);
        assert_eq!(machine.cpu.regs.pc, 0x0310);
        // もう一度実行しても同じ場所で止まる
        assert_eq!(machine.process_instruction(false), Step::Halted);

        // 再開すると1命令はブレークポイントを通過する
        machine.resume();
        assert_eq!(machine.process_instruction(false), Step::Cycles(2));
        assert_eq!(machine.cpu.regs.pc, 0x0312);

        // ステップ実行はブレークポイントを無視する
        machine.cpu.regs.pc = 0x0310;
        assert_eq!(machine.process_instruction(true), Step::Cycles(2));
    }

    #[test]
    fn test_run_cycles_counts() {
        let mut machine = booted();
        assert!(machine.run_cycles(300));
        assert!(machine.cycle_count >= 300);
        assert_eq!(machine.cpu.regs.pc, 0xF000);
    }

    #[test]
    fn test_snapshot_restore_identity() {
        let mut machine = booted();
        load_subroutine_program(&mut machine);
        machine.process_instruction(false);
        machine.memory.set_key(b'A');
        machine.read(0xC055);
        let state = machine.save_state();

        machine.memory.set_binary_block(0x0310, &[0x00, 0x00, 0x00]);
        machine.read(0xC054);
        machine.cpu.regs.a = 0x99;
        machine.run_cycles(100);

        machine.restore_state(&state).unwrap();
        assert_eq!(machine.save_state(), state);
        assert_eq!(machine.cpu.regs.pc, 0x0310);
        assert!(machine.memory.switches.is_set(Switch::Page2));
        assert_eq!(machine.memory.keyboard_latch(), b'A' | 0x80);

        // 復元後の実行も同じ結果になる
        assert_eq!(machine.process_instruction(false), Step::Cycles(2));
        assert_eq!(machine.cpu.regs.a, 0x01);
    }

    #[test]
    fn test_restore_rejects_bad_state_without_changes() {
        let mut machine = booted();
        let before = machine.save_state();

        let mut bad = before.clone();
        bad.cpu.pc = 0x1234;
        bad.memory = savestate::encode_bytes(&[0u8; 16]);
        assert!(matches!(
            machine.restore_state(&bad),
            Err(StateError::MemorySize { .. })
        ));

        let mut bad = before.clone();
        bad.cpu.pc = 0x1234;
        bad.version = 99;
        assert!(matches!(
            machine.restore_state(&bad),
            Err(StateError::Version { found: 99, .. })
        ));

        let mut bad = before.clone();
        bad.cpu.pc = 0x1234;
        bad.disk.current = 5;
        assert!(machine.restore_state(&bad).is_err());

        assert_eq!(machine.save_state(), before);
    }

    #[test]
    fn test_state_survives_json() {
        let machine = booted();
        let state = machine.save_state();
        let json = state.to_json().unwrap();
        let back = SaveState::from_json(&json).unwrap();
        assert_eq!(back, state);
    }
}
