//! アドレッシングモードの実装
//!
//! 実効アドレスの計算と、それに伴うサイクル加算をまとめる。
//! オペコード取得の1サイクルは `Cpu::step` 側で加算済み。

use super::{Cpu, CpuType, MemoryBus};

/// アドレッシングモードの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// 即値（Immediate） - #$nn
    Immediate,
    /// ゼロページ - $nn
    ZeroPage,
    /// ゼロページ,X - $nn,X
    ZeroPageX,
    /// ゼロページ,Y - $nn,Y
    ZeroPageY,
    /// 絶対 - $nnnn
    Absolute,
    /// 絶対,X - $nnnn,X
    AbsoluteX,
    /// 絶対,Y - $nnnn,Y
    AbsoluteY,
    /// 間接,X（プリインデックス） - ($nn,X)
    IndirectX,
    /// 間接,Y（ポストインデックス） - ($nn),Y
    IndirectY,
    /// 間接（ゼロページ、65C02のみ） - ($nn)
    IndirectZeroPage,
    /// アキュムレータ - A
    Accumulator,
}

#[inline]
fn page_crossed(a: u16, b: u16) -> bool {
    (a & 0xFF00) != (b & 0xFF00)
}

impl Cpu {
    /// ゼロページからポインタ（2バイト）を読む。上位バイトはページ内でラップ
    fn read_zp_pointer<M: MemoryBus>(&mut self, memory: &mut M, ptr: u8) -> u16 {
        let low = memory.read(ptr as u16) as u16;
        let high = memory.read(ptr.wrapping_add(1) as u16) as u16;
        (high << 8) | low
    }

    /// 実効アドレスを計算する
    ///
    /// `write` が真の場合、インデックス付きモードはページ境界に関係なく
    /// 1サイクル追加される（書き込み・RMW命令の挙動）。
    pub(super) fn operand_address<M: MemoryBus>(
        &mut self,
        memory: &mut M,
        mode: AddressingMode,
        write: bool,
    ) -> u16 {
        match mode {
            AddressingMode::ZeroPage => self.fetch_byte(memory) as u16,
            AddressingMode::ZeroPageX => {
                let base = self.fetch_byte(memory);
                self.cycles += 1;
                base.wrapping_add(self.regs.x) as u16
            }
            AddressingMode::ZeroPageY => {
                let base = self.fetch_byte(memory);
                self.cycles += 1;
                base.wrapping_add(self.regs.y) as u16
            }
            AddressingMode::Absolute => self.fetch_word(memory),
            AddressingMode::AbsoluteX | AddressingMode::AbsoluteY => {
                let base = self.fetch_word(memory);
                let index = if mode == AddressingMode::AbsoluteX {
                    self.regs.x
                } else {
                    self.regs.y
                };
                let addr = base.wrapping_add(index as u16);
                if write || page_crossed(base, addr) {
                    self.cycles += 1;
                }
                addr
            }
            AddressingMode::IndirectX => {
                let ptr = self.fetch_byte(memory).wrapping_add(self.regs.x);
                self.cycles += 3;
                self.read_zp_pointer(memory, ptr)
            }
            AddressingMode::IndirectY => {
                let ptr = self.fetch_byte(memory);
                let base = self.read_zp_pointer(memory, ptr);
                let addr = base.wrapping_add(self.regs.y as u16);
                self.cycles += 2;
                if write || page_crossed(base, addr) {
                    self.cycles += 1;
                }
                addr
            }
            AddressingMode::IndirectZeroPage => {
                let ptr = self.fetch_byte(memory);
                self.cycles += 2;
                self.read_zp_pointer(memory, ptr)
            }
            // 即値・アキュムレータはアドレスを持たない
            AddressingMode::Immediate | AddressingMode::Accumulator => self.regs.pc,
        }
    }

    /// オペランドの値を取得（読み込み命令用）
    pub(super) fn read_operand<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) -> u8 {
        match mode {
            AddressingMode::Immediate => self.fetch_byte(memory),
            AddressingMode::Accumulator => self.regs.a,
            _ => {
                let addr = self.operand_address(memory, mode, false);
                self.cycles += 1;
                memory.read(addr)
            }
        }
    }

    /// 値をメモリに書き込む（ストア命令用）
    pub(super) fn store<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode, value: u8) {
        let addr = self.operand_address(memory, mode, true);
        memory.write(addr, value);
        self.cycles += 1;
    }

    /// リード・モディファイ・ライト命令の共通処理
    pub(super) fn modify<M, F>(&mut self, memory: &mut M, mode: AddressingMode, op: F)
    where
        M: MemoryBus,
        F: FnOnce(&mut Self, u8) -> u8,
    {
        if mode == AddressingMode::Accumulator {
            let value = self.regs.a;
            self.regs.a = op(self, value);
            self.cycles += 1;
            return;
        }
        let addr = self.operand_address(memory, mode, true);
        let value = memory.read(addr);
        let result = op(self, value);
        memory.write(addr, result);
        self.cycles += 3;
    }

    /// ブランチを実行（共通ロジック）
    pub(super) fn branch<M: MemoryBus>(&mut self, memory: &mut M, condition: bool) {
        let offset = self.fetch_byte(memory) as i8;
        if condition {
            self.take_branch(offset);
        }
    }

    fn take_branch(&mut self, offset: i8) {
        let old_pc = self.regs.pc;
        self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
        self.cycles += 1;
        // ページ境界を越えた場合、追加サイクル
        if page_crossed(old_pc, self.regs.pc) {
            self.cycles += 1;
        }
    }

    /// BBR/BBS (65C02): ゼロページのビットで分岐
    pub(super) fn branch_on_bit<M: MemoryBus>(&mut self, memory: &mut M, bit: u8, when_set: bool) {
        let zp_addr = self.fetch_byte(memory) as u16;
        let value = memory.read(zp_addr);
        let offset = self.fetch_byte(memory) as i8;
        self.cycles += 2;
        if ((value >> bit) & 1 == 1) == when_set {
            self.take_branch(offset);
        }
    }

    /// JMP ($nnnn)
    pub(super) fn jmp_indirect<M: MemoryBus>(&mut self, memory: &mut M) {
        let ptr = self.fetch_word(memory);
        let low = memory.read(ptr) as u16;
        let high = if self.cpu_type == CpuType::Cpu65C02 {
            // 65C02: ページ境界バグが修正されている
            self.cycles += 1;
            memory.read(ptr.wrapping_add(1)) as u16
        } else {
            // 6502バグ：ページ境界でのラップアラウンド
            memory.read((ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF)) as u16
        };
        self.regs.pc = (high << 8) | low;
        self.cycles += 2;
    }

    /// JMP ($nnnn,X) (65C02)
    pub(super) fn jmp_absolute_x<M: MemoryBus>(&mut self, memory: &mut M) {
        let addr = self.fetch_word(memory).wrapping_add(self.regs.x as u16);
        let low = memory.read(addr) as u16;
        let high = memory.read(addr.wrapping_add(1)) as u16;
        self.regs.pc = (high << 8) | low;
        self.cycles += 3;
    }
}
