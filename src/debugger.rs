//! デバッガ
//!
//! ブレークポイントと「RTSで停止」（ステップアウト）モードを保持する。
//! 実行の停止判定は命令ごとに `Machine::process_instruction` から呼ばれる。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cpu::OPCODE_RTS;

/// ブレークポイント
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    /// アドレス
    pub address: u16,
    /// 有効フラグ
    pub enabled: bool,
    /// ヒット回数
    pub hit_count: u32,
    /// 一度ヒットしたら削除する（run-to-address 用）
    pub once: bool,
}

impl Breakpoint {
    fn new(address: u16, once: bool) -> Self {
        Breakpoint {
            address,
            enabled: true,
            hit_count: 0,
            once,
        }
    }
}

/// デバッガ
#[derive(Debug, Clone, Default)]
pub struct Debugger {
    /// ブレークポイント（アドレス順）
    breakpoints: BTreeMap<u16, Breakpoint>,
    /// ステップアウトの基準スタックポインタ
    step_out_sp: u8,
    /// ステップアウトが有効か
    step_out_armed: bool,
}

impl Debugger {
    pub fn new() -> Self {
        Self::default()
    }

    /// ブレークポイントを追加（既存なら有効化）
    pub fn add_breakpoint(&mut self, address: u16) {
        self.breakpoints
            .entry(address)
            .and_modify(|bp| {
                bp.enabled = true;
                bp.once = false;
            })
            .or_insert_with(|| Breakpoint::new(address, false));
    }

    /// 一時ブレークポイント（ヒットしたら消える）
    pub fn run_to(&mut self, address: u16) {
        self.breakpoints
            .entry(address)
            .or_insert_with(|| Breakpoint::new(address, true));
    }

    /// ブレークポイントを削除
    pub fn remove_breakpoint(&mut self, address: u16) -> bool {
        self.breakpoints.remove(&address).is_some()
    }

    /// ブレークポイントの有効/無効を切り替え
    pub fn toggle_breakpoint(&mut self, address: u16) -> bool {
        if let Some(bp) = self.breakpoints.get_mut(&address) {
            bp.enabled = !bp.enabled;
            true
        } else {
            false
        }
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// 全ブレークポイントを取得
    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    /// PCにブレークポイントがあるかチェック（ヒット回数を加算）
    pub fn check_breakpoint(&mut self, pc: u16) -> bool {
        let hit = match self.breakpoints.get_mut(&pc) {
            Some(bp) if bp.enabled => {
                bp.hit_count += 1;
                Some(bp.once)
            }
            _ => None,
        };
        match hit {
            Some(true) => {
                self.breakpoints.remove(&pc);
                true
            }
            Some(false) => true,
            None => false,
        }
    }

    /// ステップアウトを設定する
    ///
    /// 現在のスタックポインタより浅い位置へ戻る RTS で停止する。
    pub fn arm_step_out(&mut self, sp: u8) {
        self.step_out_sp = sp;
        self.step_out_armed = true;
    }

    pub fn disarm_step_out(&mut self) {
        self.step_out_armed = false;
    }

    pub fn step_out_armed(&self) -> bool {
        self.step_out_armed
    }

    /// 命令実行後に呼ぶ。ステップアウト条件が成立したら解除して true
    pub fn return_reached(&mut self, last_opcode: Option<u8>, sp: u8) -> bool {
        if self.step_out_armed && last_opcode == Some(OPCODE_RTS) && sp > self.step_out_sp {
            self.step_out_armed = false;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_hit_and_toggle() {
        let mut dbg = Debugger::new();
        dbg.add_breakpoint(0x0300);
        assert!(dbg.check_breakpoint(0x0300));
        assert!(!dbg.check_breakpoint(0x0301));
        assert!(dbg.toggle_breakpoint(0x0300));
        assert!(!dbg.check_breakpoint(0x0300));
        assert_eq!(dbg.breakpoints().next().map(|bp| bp.hit_count), Some(1));
        assert!(dbg.remove_breakpoint(0x0300));
        assert!(!dbg.remove_breakpoint(0x0300));
    }

    #[test]
    fn test_run_to_is_one_shot() {
        let mut dbg = Debugger::new();
        dbg.run_to(0x1234);
        assert!(dbg.check_breakpoint(0x1234));
        assert!(!dbg.check_breakpoint(0x1234));
    }

    #[test]
    fn test_step_out_ignores_nested_returns() {
        let mut dbg = Debugger::new();
        dbg.arm_step_out(0xF0);
        // 内側のサブルーチンから戻っても基準より深いまま
        assert!(!dbg.return_reached(Some(OPCODE_RTS), 0xEE));
        assert!(!dbg.return_reached(Some(0xEA), 0xF2));
        assert!(dbg.return_reached(Some(OPCODE_RTS), 0xF2));
        assert!(!dbg.step_out_armed());
    }
}
