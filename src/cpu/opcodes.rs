//! オペコードの実装
//!
//! 6502/65C02の命令本体。アドレッシングは `addressing.rs` が担当し、
//! ここでは演算とフラグ更新、固有の追加サイクルのみを扱う。

use super::{flags, AddressingMode, Cpu, CpuType, MemoryBus, Registers};

impl Cpu {
    //--------------------------------------------------
    // ロード
    //--------------------------------------------------
    pub(super) fn lda<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.a = self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    pub(super) fn ldx<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.x = self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.x);
    }

    pub(super) fn ldy<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.y = self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.y);
    }

    /// レジスタ間転送・INX/DEX等（2サイクル、Z/N更新）
    pub(super) fn transfer<F: FnOnce(&mut Registers) -> u8>(&mut self, op: F) {
        let value = op(&mut self.regs);
        self.regs.update_zero_negative_flags(value);
        self.cycles += 1;
    }

    //--------------------------------------------------
    // スタック
    //--------------------------------------------------
    pub(super) fn push_register<M: MemoryBus>(&mut self, memory: &mut M, value: u8) {
        self.push_byte(memory, value);
        self.cycles += 2;
    }

    pub(super) fn pull_register<M: MemoryBus>(&mut self, memory: &mut M) -> u8 {
        let value = self.pop_byte(memory);
        self.regs.update_zero_negative_flags(value);
        self.cycles += 3;
        value
    }

    pub(super) fn php<M: MemoryBus>(&mut self, memory: &mut M) {
        let status = self.regs.status | flags::BREAK | flags::UNUSED;
        self.push_byte(memory, status);
        self.cycles += 2;
    }

    pub(super) fn plp<M: MemoryBus>(&mut self, memory: &mut M) {
        self.regs.status = self.pop_byte(memory);
        self.regs.set_flag(flags::UNUSED, true);
        self.regs.set_flag(flags::BREAK, false);
        self.cycles += 3;
    }

    //--------------------------------------------------
    // ADC / SBC
    //--------------------------------------------------
    pub(super) fn adc<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let value = self.read_operand(memory, mode);
        self.add_with_carry(value);
    }

    pub(super) fn sbc<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let value = self.read_operand(memory, mode);
        self.subtract_with_borrow(value);
    }

    fn add_with_carry(&mut self, value: u8) {
        let a = self.regs.a;
        let carry = self.regs.get_flag(flags::CARRY) as u16;
        let binary = a as u16 + value as u16 + carry;

        if !self.regs.get_flag(flags::DECIMAL) {
            let result = binary as u8;
            self.regs.set_flag(flags::CARRY, binary > 0xFF);
            self.regs
                .set_flag(flags::OVERFLOW, ((a ^ result) & (value ^ result) & 0x80) != 0);
            self.regs.update_zero_negative_flags(result);
            self.regs.a = result;
            return;
        }

        // BCDモード
        let mut low = (a & 0x0F) as u16 + (value & 0x0F) as u16 + carry;
        if low > 9 {
            low += 6;
        }
        let mut high = (a >> 4) as u16 + (value >> 4) as u16 + u16::from(low > 0x0F);
        // NMOSではN/VはBCD補正前の中間値から決まる
        let intermediate = ((high << 4) | (low & 0x0F)) as u8;
        self.regs.set_flag(
            flags::OVERFLOW,
            ((a ^ intermediate) & (value ^ intermediate) & 0x80) != 0,
        );
        if high > 9 {
            high += 6;
        }
        let result = ((high << 4) | (low & 0x0F)) as u8;
        self.regs.set_flag(flags::CARRY, high > 0x0F);

        if self.cpu_type == CpuType::Cpu65C02 {
            self.regs.update_zero_negative_flags(result);
        } else {
            self.regs.set_flag(flags::ZERO, binary as u8 == 0);
            self.regs.set_flag(flags::NEGATIVE, intermediate & 0x80 != 0);
        }
        self.regs.a = result;
    }

    fn subtract_with_borrow(&mut self, value: u8) {
        let a = self.regs.a;
        let borrow = (!self.regs.get_flag(flags::CARRY)) as i16;
        let binary = a as i16 - value as i16 - borrow;
        let binary8 = binary as u8;

        // C/V はBCDモードでもバイナリ演算の結果から決まる
        self.regs.set_flag(flags::CARRY, binary >= 0);
        self.regs
            .set_flag(flags::OVERFLOW, ((a ^ value) & (a ^ binary8) & 0x80) != 0);

        if !self.regs.get_flag(flags::DECIMAL) {
            self.regs.update_zero_negative_flags(binary8);
            self.regs.a = binary8;
            return;
        }

        let mut low = (a & 0x0F) as i16 - (value & 0x0F) as i16 - borrow;
        let mut high = (a >> 4) as i16 - (value >> 4) as i16;
        if low < 0 {
            low += 10;
            high -= 1;
        }
        if high < 0 {
            high += 10;
        }
        let result = (((high as u8) & 0x0F) << 4) | ((low as u8) & 0x0F);

        if self.cpu_type == CpuType::Cpu65C02 {
            self.regs.update_zero_negative_flags(result);
        } else {
            self.regs.update_zero_negative_flags(binary8);
        }
        self.regs.a = result;
    }

    //--------------------------------------------------
    // 比較・論理演算
    //--------------------------------------------------
    pub(super) fn compare<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode, register: u8) {
        let value = self.read_operand(memory, mode);
        self.regs.set_flag(flags::CARRY, register >= value);
        self.regs.update_zero_negative_flags(register.wrapping_sub(value));
    }

    pub(super) fn and<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.a &= self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    pub(super) fn ora<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.a |= self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    pub(super) fn eor<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        self.regs.a ^= self.read_operand(memory, mode);
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    pub(super) fn bit<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) {
        let value = self.read_operand(memory, mode);
        self.regs.set_flag(flags::ZERO, (self.regs.a & value) == 0);
        // 65C02 BIT #imm は N/V に影響しない
        if mode != AddressingMode::Immediate {
            self.regs.set_flag(flags::OVERFLOW, (value & 0x40) != 0);
            self.regs.set_flag(flags::NEGATIVE, (value & 0x80) != 0);
        }
    }

    //--------------------------------------------------
    // RMW 演算（modify() に渡す）
    //--------------------------------------------------
    pub(super) fn inc_value(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.regs.update_zero_negative_flags(result);
        result
    }

    pub(super) fn dec_value(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.regs.update_zero_negative_flags(result);
        result
    }

    pub(super) fn asl_value(&mut self, value: u8) -> u8 {
        self.regs.set_flag(flags::CARRY, value & 0x80 != 0);
        let result = value << 1;
        self.regs.update_zero_negative_flags(result);
        result
    }

    pub(super) fn lsr_value(&mut self, value: u8) -> u8 {
        self.regs.set_flag(flags::CARRY, value & 0x01 != 0);
        let result = value >> 1;
        self.regs.update_zero_negative_flags(result);
        result
    }

    pub(super) fn rol_value(&mut self, value: u8) -> u8 {
        let carry_in = self.regs.get_flag(flags::CARRY) as u8;
        self.regs.set_flag(flags::CARRY, value & 0x80 != 0);
        let result = (value << 1) | carry_in;
        self.regs.update_zero_negative_flags(result);
        result
    }

    pub(super) fn ror_value(&mut self, value: u8) -> u8 {
        let carry_in = (self.regs.get_flag(flags::CARRY) as u8) << 7;
        self.regs.set_flag(flags::CARRY, value & 0x01 != 0);
        let result = (value >> 1) | carry_in;
        self.regs.update_zero_negative_flags(result);
        result
    }

    pub(super) fn trb_value(&mut self, value: u8) -> u8 {
        self.regs.set_flag(flags::ZERO, (self.regs.a & value) == 0);
        value & !self.regs.a
    }

    pub(super) fn tsb_value(&mut self, value: u8) -> u8 {
        self.regs.set_flag(flags::ZERO, (self.regs.a & value) == 0);
        value | self.regs.a
    }

    //--------------------------------------------------
    // サブルーチン・割り込み
    //--------------------------------------------------
    pub(super) fn jsr<M: MemoryBus>(&mut self, memory: &mut M) {
        let addr = self.fetch_word(memory);
        let return_addr = self.regs.pc.wrapping_sub(1);
        self.push_word(memory, return_addr);
        self.regs.pc = addr;
        self.cycles += 3;
    }

    pub(super) fn rts<M: MemoryBus>(&mut self, memory: &mut M) {
        self.regs.pc = self.pop_word(memory).wrapping_add(1);
        self.cycles += 5;
    }

    pub(super) fn brk<M: MemoryBus>(&mut self, memory: &mut M) {
        // パディングバイトを読み飛ばす
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.push_word(memory, self.regs.pc);
        let status = self.regs.status | flags::BREAK | flags::UNUSED;
        self.push_byte(memory, status);
        self.regs.set_flag(flags::IRQ_DISABLE, true);

        // 65C02: BRK後にDフラグをクリア
        if self.cpu_type == CpuType::Cpu65C02 {
            self.regs.set_flag(flags::DECIMAL, false);
        }

        let low = memory.read(0xFFFE) as u16;
        let high = memory.read(0xFFFF) as u16;
        self.regs.pc = (high << 8) | low;
        self.cycles += 6;
    }

    pub(super) fn rti<M: MemoryBus>(&mut self, memory: &mut M) {
        self.regs.status = self.pop_byte(memory);
        self.regs.set_flag(flags::UNUSED, true);
        self.regs.set_flag(flags::BREAK, false);
        self.regs.pc = self.pop_word(memory);
        self.cycles += 5;
    }

    /// フラグ操作命令（CLC/SEC/CLI/SEI/CLV/CLD/SED）
    pub(super) fn change_flag(&mut self, flag: u8, value: bool) {
        self.regs.set_flag(flag, value);
        self.cycles += 1;
    }
}
