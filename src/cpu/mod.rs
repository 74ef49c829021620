//! MOS 6502/65C02 CPU エミュレータ
//!
//! Apple IIで使用される6502プロセッサの命令エンジン。
//! `step()` は1命令（または割り込み1回）を実行し、実機が消費する
//! サイクル数を返す。ページ境界越え・分岐成立のペナルティを含む。

mod addressing;
mod opcodes;

pub use addressing::AddressingMode;

use serde::{Deserialize, Serialize};

/// CPUのステータスレジスタのフラグビット
pub mod flags {
    pub const CARRY: u8 = 0b0000_0001;       // C: キャリーフラグ
    pub const ZERO: u8 = 0b0000_0010;        // Z: ゼロフラグ
    pub const IRQ_DISABLE: u8 = 0b0000_0100; // I: 割り込み禁止フラグ
    pub const DECIMAL: u8 = 0b0000_1000;     // D: BCDモードフラグ
    pub const BREAK: u8 = 0b0001_0000;       // B: ブレークフラグ
    pub const UNUSED: u8 = 0b0010_0000;      // 未使用（常に1）
    pub const OVERFLOW: u8 = 0b0100_0000;    // V: オーバーフローフラグ
    pub const NEGATIVE: u8 = 0b1000_0000;    // N: 負数フラグ
}

/// JSRのオペコード（ステップオーバー判定用）
pub const OPCODE_JSR: u8 = 0x20;
/// RTSのオペコード（ステップアウト判定用）
pub const OPCODE_RTS: u8 = 0x60;

/// CPUの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuType {
    /// オリジナルのNMOS 6502 (Apple II, II+)
    #[serde(rename = "6502")]
    Cpu6502,
    /// CMOS 65C02 (Apple IIe Enhanced)
    #[serde(rename = "65c02")]
    Cpu65C02,
}

/// CPUレジスタの状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// アキュムレータ（A）
    pub a: u8,
    /// Xインデックスレジスタ
    pub x: u8,
    /// Yインデックスレジスタ
    pub y: u8,
    /// スタックポインタ
    pub sp: u8,
    /// プログラムカウンタ
    pub pc: u16,
    /// ステータスレジスタ（プロセッサフラグ）
    pub status: u8,
}

impl Default for Registers {
    fn default() -> Self {
        Registers {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFD, // スタックは$01FDから開始
            pc: 0,
            status: flags::UNUSED | flags::IRQ_DISABLE,
        }
    }
}

impl Registers {
    /// フラグをセット
    pub fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    /// フラグを取得
    pub fn get_flag(&self, flag: u8) -> bool {
        (self.status & flag) != 0
    }

    /// ゼロフラグと負数フラグを値に基づいて更新
    pub fn update_zero_negative_flags(&mut self, value: u8) {
        self.set_flag(flags::ZERO, value == 0);
        self.set_flag(flags::NEGATIVE, (value & 0x80) != 0);
    }
}

/// メモリバスインターフェース
/// CPUがメモリにアクセスするために必要なトレイト
pub trait MemoryBus {
    /// メモリから1バイト読み取り
    fn read(&mut self, address: u16) -> u8;
    /// メモリに1バイト書き込み
    fn write(&mut self, address: u16, value: u8);
}

/// 6502 CPUエミュレータ
#[derive(Debug, Clone)]
pub struct Cpu {
    /// CPUレジスタ
    pub regs: Registers,
    /// CPUの種類（6502 or 65C02）
    pub cpu_type: CpuType,
    /// 累積サイクル数
    pub total_cycles: u64,
    /// 現在の命令で消費したサイクル
    pub cycles: u32,
    /// IRQ（割り込み要求）ライン
    pub irq_pending: bool,
    /// NMI（ノンマスカブル割り込み）ライン
    pub nmi_pending: bool,
    /// 前回のNMIライン状態（エッジ検出用）
    pub(crate) prev_nmi: bool,
    /// 直前に実行したオペコード（割り込み処理時は None）
    last_opcode: Option<u8>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new(CpuType::Cpu6502)
    }
}

impl Cpu {
    /// 新しいCPUインスタンスを作成
    pub fn new(cpu_type: CpuType) -> Self {
        Cpu {
            regs: Registers::default(),
            cpu_type,
            total_cycles: 0,
            cycles: 0,
            irq_pending: false,
            nmi_pending: false,
            prev_nmi: false,
            last_opcode: None,
        }
    }

    /// CPUをリセット
    ///
    /// レジスタを電源投入時の値に戻し、$FFFCのベクターからPCを読む。
    /// スタックへの書き込みは行わない。
    pub fn reset<M: MemoryBus>(&mut self, memory: &mut M) {
        self.regs = Registers::default();
        self.irq_pending = false;
        self.nmi_pending = false;
        self.prev_nmi = false;
        self.last_opcode = None;
        self.regs.pc = Self::read_vector(memory, 0xFFFC);
        self.cycles = 7;
        self.total_cycles += 7;
    }

    /// NMIラインを設定（立ち上がりエッジで割り込み）
    pub fn set_nmi(&mut self, level: bool) {
        self.nmi_pending = level;
    }

    /// IRQラインを設定（レベルトリガー）
    pub fn set_irq(&mut self, level: bool) {
        self.irq_pending = level;
    }

    /// 直前に実行した命令のオペコード
    pub fn last_opcode(&self) -> Option<u8> {
        self.last_opcode
    }

    fn read_vector<M: MemoryBus>(memory: &mut M, vector: u16) -> u16 {
        let low = memory.read(vector) as u16;
        let high = memory.read(vector.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    /// 割り込みを処理（NMI / IRQ 共通）
    fn service_interrupt<M: MemoryBus>(&mut self, memory: &mut M, vector: u16) {
        // PCをスタックにプッシュ（上位バイト先）
        self.push_word(memory, self.regs.pc);
        // ステータスレジスタをプッシュ（Bフラグはクリア）
        let status = (self.regs.status | flags::UNUSED) & !flags::BREAK;
        self.push_byte(memory, status);
        self.regs.set_flag(flags::IRQ_DISABLE, true);
        if self.cpu_type == CpuType::Cpu65C02 {
            self.regs.set_flag(flags::DECIMAL, false);
        }
        self.regs.pc = Self::read_vector(memory, vector);
        self.cycles += 7;
    }

    /// 1命令を実行し、消費したサイクル数を返す
    pub fn step<M: MemoryBus>(&mut self, memory: &mut M) -> u32 {
        self.cycles = 0;

        // NMIのエッジ検出
        let nmi_edge = self.nmi_pending && !self.prev_nmi;
        self.prev_nmi = self.nmi_pending;

        if nmi_edge {
            self.last_opcode = None;
            self.service_interrupt(memory, 0xFFFA);
        } else if self.irq_pending && !self.regs.get_flag(flags::IRQ_DISABLE) {
            self.last_opcode = None;
            self.service_interrupt(memory, 0xFFFE);
        } else {
            let opcode = self.fetch_byte(memory);
            self.last_opcode = Some(opcode);
            self.execute_opcode(memory, opcode);
        }

        self.total_cycles += self.cycles as u64;
        self.cycles
    }

    /// PCから1バイトフェッチしてPCをインクリメント
    fn fetch_byte<M: MemoryBus>(&mut self, memory: &mut M) -> u8 {
        let value = memory.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.cycles += 1;
        value
    }

    /// PCから2バイト（ワード）をフェッチ
    fn fetch_word<M: MemoryBus>(&mut self, memory: &mut M) -> u16 {
        let low = self.fetch_byte(memory) as u16;
        let high = self.fetch_byte(memory) as u16;
        (high << 8) | low
    }

    /// スタックに1バイトプッシュ
    fn push_byte<M: MemoryBus>(&mut self, memory: &mut M, value: u8) {
        memory.write(0x0100 | self.regs.sp as u16, value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }

    /// スタックから1バイトポップ
    fn pop_byte<M: MemoryBus>(&mut self, memory: &mut M) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        memory.read(0x0100 | self.regs.sp as u16)
    }

    /// スタックに2バイトプッシュ（上位バイト先）
    fn push_word<M: MemoryBus>(&mut self, memory: &mut M, value: u16) {
        self.push_byte(memory, (value >> 8) as u8);
        self.push_byte(memory, value as u8);
    }

    /// スタックから2バイトポップ
    fn pop_word<M: MemoryBus>(&mut self, memory: &mut M) -> u16 {
        let low = self.pop_byte(memory) as u16;
        let high = self.pop_byte(memory) as u16;
        (high << 8) | low
    }

    /// オペコードを実行
    fn execute_opcode<M: MemoryBus>(&mut self, memory: &mut M, opcode: u8) {
        use AddressingMode::*;
        let cmos = self.cpu_type == CpuType::Cpu65C02;

        match opcode {
            // LDA / LDX / LDY
            0xA9 => self.lda(memory, Immediate),
            0xA5 => self.lda(memory, ZeroPage),
            0xB5 => self.lda(memory, ZeroPageX),
            0xAD => self.lda(memory, Absolute),
            0xBD => self.lda(memory, AbsoluteX),
            0xB9 => self.lda(memory, AbsoluteY),
            0xA1 => self.lda(memory, IndirectX),
            0xB1 => self.lda(memory, IndirectY),
            0xB2 if cmos => self.lda(memory, IndirectZeroPage),

            0xA2 => self.ldx(memory, Immediate),
            0xA6 => self.ldx(memory, ZeroPage),
            0xB6 => self.ldx(memory, ZeroPageY),
            0xAE => self.ldx(memory, Absolute),
            0xBE => self.ldx(memory, AbsoluteY),

            0xA0 => self.ldy(memory, Immediate),
            0xA4 => self.ldy(memory, ZeroPage),
            0xB4 => self.ldy(memory, ZeroPageX),
            0xAC => self.ldy(memory, Absolute),
            0xBC => self.ldy(memory, AbsoluteX),

            // STA / STX / STY / STZ
            0x85 => self.store(memory, ZeroPage, self.regs.a),
            0x95 => self.store(memory, ZeroPageX, self.regs.a),
            0x8D => self.store(memory, Absolute, self.regs.a),
            0x9D => self.store(memory, AbsoluteX, self.regs.a),
            0x99 => self.store(memory, AbsoluteY, self.regs.a),
            0x81 => self.store(memory, IndirectX, self.regs.a),
            0x91 => self.store(memory, IndirectY, self.regs.a),
            0x92 if cmos => self.store(memory, IndirectZeroPage, self.regs.a),

            0x86 => self.store(memory, ZeroPage, self.regs.x),
            0x96 => self.store(memory, ZeroPageY, self.regs.x),
            0x8E => self.store(memory, Absolute, self.regs.x),

            0x84 => self.store(memory, ZeroPage, self.regs.y),
            0x94 => self.store(memory, ZeroPageX, self.regs.y),
            0x8C => self.store(memory, Absolute, self.regs.y),

            0x64 if cmos => self.store(memory, ZeroPage, 0),
            0x74 if cmos => self.store(memory, ZeroPageX, 0),
            0x9C if cmos => self.store(memory, Absolute, 0),
            0x9E if cmos => self.store(memory, AbsoluteX, 0),

            // 転送
            0xAA => self.transfer(|r| { r.x = r.a; r.x }),
            0x8A => self.transfer(|r| { r.a = r.x; r.a }),
            0xA8 => self.transfer(|r| { r.y = r.a; r.y }),
            0x98 => self.transfer(|r| { r.a = r.y; r.a }),
            0xBA => self.transfer(|r| { r.x = r.sp; r.x }),
            0x9A => { self.regs.sp = self.regs.x; self.cycles += 1; }

            // スタック
            0x48 => self.push_register(memory, self.regs.a),
            0x08 => self.php(memory),
            0x68 => { let v = self.pull_register(memory); self.regs.a = v; }
            0x28 => self.plp(memory),
            0xDA if cmos => self.push_register(memory, self.regs.x),
            0x5A if cmos => self.push_register(memory, self.regs.y),
            0xFA if cmos => { let v = self.pull_register(memory); self.regs.x = v; }
            0x7A if cmos => { let v = self.pull_register(memory); self.regs.y = v; }

            // ADC / SBC
            0x69 => self.adc(memory, Immediate),
            0x65 => self.adc(memory, ZeroPage),
            0x75 => self.adc(memory, ZeroPageX),
            0x6D => self.adc(memory, Absolute),
            0x7D => self.adc(memory, AbsoluteX),
            0x79 => self.adc(memory, AbsoluteY),
            0x61 => self.adc(memory, IndirectX),
            0x71 => self.adc(memory, IndirectY),
            0x72 if cmos => self.adc(memory, IndirectZeroPage),

            0xE9 => self.sbc(memory, Immediate),
            0xE5 => self.sbc(memory, ZeroPage),
            0xF5 => self.sbc(memory, ZeroPageX),
            0xED => self.sbc(memory, Absolute),
            0xFD => self.sbc(memory, AbsoluteX),
            0xF9 => self.sbc(memory, AbsoluteY),
            0xE1 => self.sbc(memory, IndirectX),
            0xF1 => self.sbc(memory, IndirectY),
            0xF2 if cmos => self.sbc(memory, IndirectZeroPage),

            // 比較
            0xC9 => self.compare(memory, Immediate, self.regs.a),
            0xC5 => self.compare(memory, ZeroPage, self.regs.a),
            0xD5 => self.compare(memory, ZeroPageX, self.regs.a),
            0xCD => self.compare(memory, Absolute, self.regs.a),
            0xDD => self.compare(memory, AbsoluteX, self.regs.a),
            0xD9 => self.compare(memory, AbsoluteY, self.regs.a),
            0xC1 => self.compare(memory, IndirectX, self.regs.a),
            0xD1 => self.compare(memory, IndirectY, self.regs.a),
            0xD2 if cmos => self.compare(memory, IndirectZeroPage, self.regs.a),

            0xE0 => self.compare(memory, Immediate, self.regs.x),
            0xE4 => self.compare(memory, ZeroPage, self.regs.x),
            0xEC => self.compare(memory, Absolute, self.regs.x),

            0xC0 => self.compare(memory, Immediate, self.regs.y),
            0xC4 => self.compare(memory, ZeroPage, self.regs.y),
            0xCC => self.compare(memory, Absolute, self.regs.y),

            // 論理演算
            0x29 => self.and(memory, Immediate),
            0x25 => self.and(memory, ZeroPage),
            0x35 => self.and(memory, ZeroPageX),
            0x2D => self.and(memory, Absolute),
            0x3D => self.and(memory, AbsoluteX),
            0x39 => self.and(memory, AbsoluteY),
            0x21 => self.and(memory, IndirectX),
            0x31 => self.and(memory, IndirectY),
            0x32 if cmos => self.and(memory, IndirectZeroPage),

            0x09 => self.ora(memory, Immediate),
            0x05 => self.ora(memory, ZeroPage),
            0x15 => self.ora(memory, ZeroPageX),
            0x0D => self.ora(memory, Absolute),
            0x1D => self.ora(memory, AbsoluteX),
            0x19 => self.ora(memory, AbsoluteY),
            0x01 => self.ora(memory, IndirectX),
            0x11 => self.ora(memory, IndirectY),
            0x12 if cmos => self.ora(memory, IndirectZeroPage),

            0x49 => self.eor(memory, Immediate),
            0x45 => self.eor(memory, ZeroPage),
            0x55 => self.eor(memory, ZeroPageX),
            0x4D => self.eor(memory, Absolute),
            0x5D => self.eor(memory, AbsoluteX),
            0x59 => self.eor(memory, AbsoluteY),
            0x41 => self.eor(memory, IndirectX),
            0x51 => self.eor(memory, IndirectY),
            0x52 if cmos => self.eor(memory, IndirectZeroPage),

            0x24 => self.bit(memory, ZeroPage),
            0x2C => self.bit(memory, Absolute),
            0x89 if cmos => self.bit(memory, Immediate),
            0x34 if cmos => self.bit(memory, ZeroPageX),
            0x3C if cmos => self.bit(memory, AbsoluteX),

            // インクリメント / デクリメント
            0xE6 => self.modify(memory, ZeroPage, Self::inc_value),
            0xF6 => self.modify(memory, ZeroPageX, Self::inc_value),
            0xEE => self.modify(memory, Absolute, Self::inc_value),
            0xFE => self.modify(memory, AbsoluteX, Self::inc_value),
            0x1A if cmos => self.modify(memory, Accumulator, Self::inc_value),

            0xC6 => self.modify(memory, ZeroPage, Self::dec_value),
            0xD6 => self.modify(memory, ZeroPageX, Self::dec_value),
            0xCE => self.modify(memory, Absolute, Self::dec_value),
            0xDE => self.modify(memory, AbsoluteX, Self::dec_value),
            0x3A if cmos => self.modify(memory, Accumulator, Self::dec_value),

            0xE8 => self.transfer(|r| { r.x = r.x.wrapping_add(1); r.x }),
            0xC8 => self.transfer(|r| { r.y = r.y.wrapping_add(1); r.y }),
            0xCA => self.transfer(|r| { r.x = r.x.wrapping_sub(1); r.x }),
            0x88 => self.transfer(|r| { r.y = r.y.wrapping_sub(1); r.y }),

            // シフト / ローテート
            0x0A => self.modify(memory, Accumulator, Self::asl_value),
            0x06 => self.modify(memory, ZeroPage, Self::asl_value),
            0x16 => self.modify(memory, ZeroPageX, Self::asl_value),
            0x0E => self.modify(memory, Absolute, Self::asl_value),
            0x1E => self.modify(memory, AbsoluteX, Self::asl_value),

            0x4A => self.modify(memory, Accumulator, Self::lsr_value),
            0x46 => self.modify(memory, ZeroPage, Self::lsr_value),
            0x56 => self.modify(memory, ZeroPageX, Self::lsr_value),
            0x4E => self.modify(memory, Absolute, Self::lsr_value),
            0x5E => self.modify(memory, AbsoluteX, Self::lsr_value),

            0x2A => self.modify(memory, Accumulator, Self::rol_value),
            0x26 => self.modify(memory, ZeroPage, Self::rol_value),
            0x36 => self.modify(memory, ZeroPageX, Self::rol_value),
            0x2E => self.modify(memory, Absolute, Self::rol_value),
            0x3E => self.modify(memory, AbsoluteX, Self::rol_value),

            0x6A => self.modify(memory, Accumulator, Self::ror_value),
            0x66 => self.modify(memory, ZeroPage, Self::ror_value),
            0x76 => self.modify(memory, ZeroPageX, Self::ror_value),
            0x6E => self.modify(memory, Absolute, Self::ror_value),
            0x7E => self.modify(memory, AbsoluteX, Self::ror_value),

            // TRB / TSB (65C02)
            0x14 if cmos => self.modify(memory, ZeroPage, Self::trb_value),
            0x1C if cmos => self.modify(memory, Absolute, Self::trb_value),
            0x04 if cmos => self.modify(memory, ZeroPage, Self::tsb_value),
            0x0C if cmos => self.modify(memory, Absolute, Self::tsb_value),

            // 分岐
            0x10 => self.branch(memory, !self.regs.get_flag(flags::NEGATIVE)),
            0x30 => self.branch(memory, self.regs.get_flag(flags::NEGATIVE)),
            0x50 => self.branch(memory, !self.regs.get_flag(flags::OVERFLOW)),
            0x70 => self.branch(memory, self.regs.get_flag(flags::OVERFLOW)),
            0x90 => self.branch(memory, !self.regs.get_flag(flags::CARRY)),
            0xB0 => self.branch(memory, self.regs.get_flag(flags::CARRY)),
            0xD0 => self.branch(memory, !self.regs.get_flag(flags::ZERO)),
            0xF0 => self.branch(memory, self.regs.get_flag(flags::ZERO)),
            0x80 if cmos => self.branch(memory, true),

            // ジャンプ / サブルーチン
            0x4C => self.regs.pc = self.fetch_word(memory),
            0x6C => self.jmp_indirect(memory),
            0x7C if cmos => self.jmp_absolute_x(memory),
            0x20 => self.jsr(memory),
            0x60 => self.rts(memory),

            // 割り込み
            0x00 => self.brk(memory),
            0x40 => self.rti(memory),

            // フラグ操作
            0x18 => self.change_flag(flags::CARRY, false),
            0x38 => self.change_flag(flags::CARRY, true),
            0x58 => self.change_flag(flags::IRQ_DISABLE, false),
            0x78 => self.change_flag(flags::IRQ_DISABLE, true),
            0xB8 => self.change_flag(flags::OVERFLOW, false),
            0xD8 => self.change_flag(flags::DECIMAL, false),
            0xF8 => self.change_flag(flags::DECIMAL, true),

            0xEA => self.cycles += 1,

            // 65C02 RMB / SMB / BBR / BBS
            op if cmos && op & 0x0F == 0x07 => {
                let bit = (op >> 4) & 0x07;
                if op & 0x80 == 0 {
                    self.modify(memory, ZeroPage, move |_, v| v & !(1 << bit));
                } else {
                    self.modify(memory, ZeroPage, move |_, v| v | (1 << bit));
                }
            }
            op if cmos && op & 0x0F == 0x0F => {
                let bit = (op >> 4) & 0x07;
                self.branch_on_bit(memory, bit, op & 0x80 != 0);
            }

            // 65C02 マルチバイトNOP
            0x02 | 0x22 | 0x42 | 0x62 | 0x82 | 0xC2 | 0xE2 if cmos => {
                let _ = self.fetch_byte(memory);
            }
            0x44 if cmos => {
                let _ = self.fetch_byte(memory);
                self.cycles += 1;
            }
            0x54 | 0xD4 | 0xF4 if cmos => {
                let _ = self.fetch_byte(memory);
                self.cycles += 2;
            }
            0x5C if cmos => {
                let _ = self.fetch_word(memory);
                self.cycles += 5;
            }
            0xDC | 0xFC if cmos => {
                let _ = self.fetch_word(memory);
                self.cycles += 1;
            }

            // 未定義オペコード（65C02では1サイクルNOP、6502では2サイクルNOP扱い）
            _ => {
                if self.cpu_type == CpuType::Cpu6502 {
                    self.cycles += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// テスト用のシンプルなメモリ（64KB RAM）
    struct TestMemory {
        pub ram: Vec<u8>,
    }

    impl TestMemory {
        fn new() -> Self {
            TestMemory { ram: vec![0; 65536] }
        }

        fn load(&mut self, address: u16, data: &[u8]) {
            for (i, &byte) in data.iter().enumerate() {
                let addr = (address as usize + i) & 0xFFFF;
                self.ram[addr] = byte;
            }
        }
    }

    impl MemoryBus for TestMemory {
        fn read(&mut self, address: u16) -> u8 {
            self.ram[address as usize]
        }

        fn write(&mut self, address: u16, value: u8) {
            self.ram[address as usize] = value;
        }
    }

    fn setup(cpu_type: CpuType, program: &[u8]) -> (Cpu, TestMemory) {
        let mut memory = TestMemory::new();
        memory.load(0x0400, program);
        memory.ram[0xFFFC] = 0x00;
        memory.ram[0xFFFD] = 0x04;
        let mut cpu = Cpu::new(cpu_type);
        cpu.reset(&mut memory);
        (cpu, memory)
    }

    #[test]
    fn test_reset_state() {
        let (cpu, _) = setup(CpuType::Cpu6502, &[]);
        assert_eq!(cpu.regs.pc, 0x0400);
        assert_eq!(cpu.regs.sp, 0xFD);
        assert!(cpu.regs.get_flag(flags::IRQ_DISABLE));
        assert_eq!(cpu.cycles, 7);
    }

    #[test]
    fn test_load_store_cycles() {
        // LDA #$42; STA $10; LDA $10; STA $2000,X
        let (mut cpu, mut mem) = setup(
            CpuType::Cpu6502,
            &[0xA9, 0x42, 0x85, 0x10, 0xA5, 0x10, 0x9D, 0x00, 0x20],
        );
        assert_eq!(cpu.step(&mut mem), 2);
        assert_eq!(cpu.step(&mut mem), 3);
        assert_eq!(cpu.step(&mut mem), 3);
        assert_eq!(cpu.regs.a, 0x42);
        assert_eq!(cpu.step(&mut mem), 5);
        assert_eq!(mem.ram[0x2000], 0x42);
    }

    #[test]
    fn test_page_cross_penalty() {
        // LDX #$01; LDA $20FF,X; LDA $2000,X
        let (mut cpu, mut mem) = setup(
            CpuType::Cpu6502,
            &[0xA2, 0x01, 0xBD, 0xFF, 0x20, 0xBD, 0x00, 0x20],
        );
        cpu.step(&mut mem);
        assert_eq!(cpu.step(&mut mem), 5);
        assert_eq!(cpu.step(&mut mem), 4);
    }

    #[test]
    fn test_branch_cycles() {
        // BNE +2 (Z=0 → taken), BEQ (not taken)
        let (mut cpu, mut mem) = setup(CpuType::Cpu6502, &[0xD0, 0x02, 0xEA, 0xEA, 0xF0, 0x10]);
        cpu.regs.set_flag(flags::ZERO, false);
        assert_eq!(cpu.step(&mut mem), 3);
        assert_eq!(cpu.regs.pc, 0x0404);
        assert_eq!(cpu.step(&mut mem), 2);

        // ページ境界を越える分岐
        let (mut cpu, mut mem) = setup(CpuType::Cpu6502, &[]);
        mem.load(0x04F0, &[0xD0, 0x20]);
        cpu.regs.pc = 0x04F0;
        cpu.regs.set_flag(flags::ZERO, false);
        assert_eq!(cpu.step(&mut mem), 4);
        assert_eq!(cpu.regs.pc, 0x0512);
    }

    #[test]
    fn test_jsr_rts() {
        // JSR $0500 ... $0500: RTS
        let (mut cpu, mut mem) = setup(CpuType::Cpu6502, &[0x20, 0x00, 0x05, 0xEA]);
        mem.ram[0x0500] = 0x60;
        assert_eq!(cpu.step(&mut mem), 6);
        assert_eq!(cpu.regs.pc, 0x0500);
        assert_eq!(cpu.regs.sp, 0xFB);
        assert_eq!(cpu.step(&mut mem), 6);
        assert_eq!(cpu.regs.pc, 0x0403);
        assert_eq!(cpu.regs.sp, 0xFD);
        assert_eq!(cpu.last_opcode(), Some(OPCODE_RTS));
    }

    #[test]
    fn test_adc_binary_and_decimal() {
        // CLC; LDA #$50; ADC #$50 → V=1
        let (mut cpu, mut mem) = setup(CpuType::Cpu6502, &[0x18, 0xA9, 0x50, 0x69, 0x50]);
        for _ in 0..3 {
            cpu.step(&mut mem);
        }
        assert_eq!(cpu.regs.a, 0xA0);
        assert!(cpu.regs.get_flag(flags::OVERFLOW));
        assert!(!cpu.regs.get_flag(flags::CARRY));

        // SED; CLC; LDA #$19; ADC #$28 → $47
        let (mut cpu, mut mem) =
            setup(CpuType::Cpu65C02, &[0xF8, 0x18, 0xA9, 0x19, 0x69, 0x28]);
        for _ in 0..4 {
            cpu.step(&mut mem);
        }
        assert_eq!(cpu.regs.a, 0x47);
        assert!(!cpu.regs.get_flag(flags::CARRY));

        // SED; SEC; LDA #$42; SBC #$13 → $29
        let (mut cpu, mut mem) =
            setup(CpuType::Cpu65C02, &[0xF8, 0x38, 0xA9, 0x42, 0xE9, 0x13]);
        for _ in 0..4 {
            cpu.step(&mut mem);
        }
        assert_eq!(cpu.regs.a, 0x29);
        assert!(cpu.regs.get_flag(flags::CARRY));
    }

    #[test]
    fn test_irq_masked_and_serviced() {
        let (mut cpu, mut mem) = setup(CpuType::Cpu6502, &[0xEA, 0x58, 0xEA]);
        mem.ram[0xFFFE] = 0x00;
        mem.ram[0xFFFF] = 0x06;
        cpu.set_irq(true);
        // I=1 なのでNOPが実行される
        assert_eq!(cpu.step(&mut mem), 2);
        assert_eq!(cpu.regs.pc, 0x0401);
        // CLI
        cpu.step(&mut mem);
        assert_eq!(cpu.step(&mut mem), 7);
        assert_eq!(cpu.regs.pc, 0x0600);
        assert!(cpu.regs.get_flag(flags::IRQ_DISABLE));
        // プッシュされたステータスはBクリア
        assert_eq!(mem.ram[0x01FB] & flags::BREAK, 0);
    }

    #[test]
    fn test_nmi_edge_triggered() {
        let (mut cpu, mut mem) = setup(CpuType::Cpu6502, &[0xEA; 8]);
        mem.ram[0xFFFA] = 0x00;
        mem.ram[0xFFFB] = 0x07;
        mem.ram[0x0700] = 0xEA;
        mem.ram[0x0701] = 0xEA;
        cpu.set_nmi(true);
        assert_eq!(cpu.step(&mut mem), 7);
        assert_eq!(cpu.regs.pc, 0x0700);
        // ラインがHighのままでは再度割り込まない
        assert_eq!(cpu.step(&mut mem), 2);
        assert_eq!(cpu.regs.pc, 0x0701);
    }

    #[test]
    fn test_65c02_extensions() {
        // LDA #$0F; STZ $10; INC A; BRA +0; TSB $11
        let (mut cpu, mut mem) = setup(
            CpuType::Cpu65C02,
            &[0xA9, 0x0F, 0x64, 0x10, 0x1A, 0x80, 0x00, 0x04, 0x11],
        );
        mem.ram[0x10] = 0xFF;
        mem.ram[0x11] = 0x30;
        cpu.step(&mut mem);
        assert_eq!(cpu.step(&mut mem), 3);
        assert_eq!(mem.ram[0x10], 0);
        assert_eq!(cpu.step(&mut mem), 2);
        assert_eq!(cpu.regs.a, 0x10);
        assert_eq!(cpu.step(&mut mem), 3);
        assert_eq!(cpu.step(&mut mem), 5);
        assert_eq!(mem.ram[0x11], 0x30);
        assert!(!cpu.regs.get_flag(flags::ZERO));
    }

    #[test]
    fn test_rmb_smb_bbr() {
        // SMB3 $20; BBS3 $20,+2; NOP; NOP; RMB3 $20
        let (mut cpu, mut mem) = setup(
            CpuType::Cpu65C02,
            &[0xB7, 0x20, 0xBF, 0x20, 0x02, 0xEA, 0xEA, 0x37, 0x20],
        );
        assert_eq!(cpu.step(&mut mem), 5);
        assert_eq!(mem.ram[0x20], 0x08);
        assert_eq!(cpu.step(&mut mem), 6);
        assert_eq!(cpu.regs.pc, 0x0407);
        cpu.step(&mut mem);
        assert_eq!(mem.ram[0x20], 0x00);
    }

    #[test]
    fn test_jmp_indirect_page_bug() {
        let (mut cpu, mut mem) = setup(CpuType::Cpu6502, &[0x6C, 0xFF, 0x10]);
        mem.ram[0x10FF] = 0x34;
        mem.ram[0x1000] = 0x12;
        mem.ram[0x1100] = 0x56;
        assert_eq!(cpu.step(&mut mem), 5);
        assert_eq!(cpu.regs.pc, 0x1234);

        let (mut cpu, mut mem) = setup(CpuType::Cpu65C02, &[0x6C, 0xFF, 0x10]);
        mem.ram[0x10FF] = 0x34;
        mem.ram[0x1100] = 0x56;
        assert_eq!(cpu.step(&mut mem), 6);
        assert_eq!(cpu.regs.pc, 0x5634);
    }
}
