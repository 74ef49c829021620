//! ソフトスイッチ
//!
//! 名前付きのブールフラグと、$C000-$C0FF の I/O アドレスから
//! ハンドラへの経路表。スイッチの集合は固定で、実行時に変わるのは
//! `is_set` のみ。経路表は起動時に一度だけ構築し、I/O 範囲の全アドレスを
//! いずれか1つの `IoRoute` に割り当てる（RAMへのフォールスルーなし）。

use std::collections::BTreeMap;

/// スイッチの識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Switch {
    Store80,
    RamRd,
    RamWrt,
    IntCxRom,
    AltZp,
    SlotC3Rom,
    Col80,
    AltCharSet,
    Text,
    Mixed,
    Page2,
    Hires,
    An0,
    An1,
    An2,
    An3,
    Pb0,
    Pb1,
    Pb2,
    BsrBank2,
    BsrReadRam,
    BsrWriteRam,
    BsrPreWrite,
    DrvSm0,
    DrvSm1,
    DrvSm2,
    DrvSm3,
    Drive,
    DrvSel,
    DrvData,
    DrvWrite,
}

pub const SWITCH_COUNT: usize = 31;

/// スイッチの定義（アドレスは固定）
#[derive(Debug, Clone, Copy)]
pub struct SwitchDef {
    pub switch: Switch,
    pub name: &'static str,
    /// 読み書きでフラグを落とすアドレス
    pub off: Option<u16>,
    /// 読み書きでフラグを立てるアドレス
    pub on: Option<u16>,
    /// bit7 に状態を返す読み出しアドレス
    pub status: Option<u16>,
    /// 書き込みでのみ切り替わる
    pub write_only: bool,
}

const fn def(
    switch: Switch,
    name: &'static str,
    off: Option<u16>,
    on: Option<u16>,
    status: Option<u16>,
    write_only: bool,
) -> SwitchDef {
    SwitchDef { switch, name, off, on, status, write_only }
}

/// スイッチ表（`Switch as usize` の順）
pub const SWITCH_DEFS: [SwitchDef; SWITCH_COUNT] = [
    def(Switch::Store80, "STORE80", Some(0xC000), Some(0xC001), Some(0xC018), true),
    def(Switch::RamRd, "RAMRD", Some(0xC002), Some(0xC003), Some(0xC013), true),
    def(Switch::RamWrt, "RAMWRT", Some(0xC004), Some(0xC005), Some(0xC014), true),
    def(Switch::IntCxRom, "INTCXROM", Some(0xC006), Some(0xC007), Some(0xC015), true),
    def(Switch::AltZp, "ALTZP", Some(0xC008), Some(0xC009), Some(0xC016), true),
    def(Switch::SlotC3Rom, "SLOTC3ROM", Some(0xC00A), Some(0xC00B), Some(0xC017), true),
    def(Switch::Col80, "COLUMN80", Some(0xC00C), Some(0xC00D), Some(0xC01F), true),
    def(Switch::AltCharSet, "ALTCHARSET", Some(0xC00E), Some(0xC00F), Some(0xC01E), true),
    def(Switch::Text, "TEXT", Some(0xC050), Some(0xC051), Some(0xC01A), false),
    def(Switch::Mixed, "MIXED", Some(0xC052), Some(0xC053), Some(0xC01B), false),
    def(Switch::Page2, "PAGE2", Some(0xC054), Some(0xC055), Some(0xC01C), false),
    def(Switch::Hires, "HIRES", Some(0xC056), Some(0xC057), Some(0xC01D), false),
    def(Switch::An0, "AN0", Some(0xC058), Some(0xC059), None, false),
    def(Switch::An1, "AN1", Some(0xC05A), Some(0xC05B), None, false),
    def(Switch::An2, "AN2", Some(0xC05C), Some(0xC05D), None, false),
    def(Switch::An3, "AN3", Some(0xC05E), Some(0xC05F), None, false),
    def(Switch::Pb0, "PB0", None, None, Some(0xC061), false),
    def(Switch::Pb1, "PB1", None, None, Some(0xC062), false),
    def(Switch::Pb2, "PB2", None, None, Some(0xC063), false),
    def(Switch::BsrBank2, "BSRBANK2", None, None, Some(0xC011), false),
    def(Switch::BsrReadRam, "BSRREADRAM", None, None, Some(0xC012), false),
    def(Switch::BsrWriteRam, "BSRWRITERAM", None, None, None, false),
    def(Switch::BsrPreWrite, "BSRPREWRITE", None, None, None, false),
    def(Switch::DrvSm0, "DRVSM0", Some(0xC0E0), Some(0xC0E1), None, false),
    def(Switch::DrvSm1, "DRVSM1", Some(0xC0E2), Some(0xC0E3), None, false),
    def(Switch::DrvSm2, "DRVSM2", Some(0xC0E4), Some(0xC0E5), None, false),
    def(Switch::DrvSm3, "DRVSM3", Some(0xC0E6), Some(0xC0E7), None, false),
    def(Switch::Drive, "DRIVE", Some(0xC0E8), Some(0xC0E9), None, false),
    def(Switch::DrvSel, "DRVSEL", Some(0xC0EA), Some(0xC0EB), None, false),
    def(Switch::DrvData, "DRVDATA", Some(0xC0EC), Some(0xC0ED), None, false),
    def(Switch::DrvWrite, "DRVWRITE", Some(0xC0EE), Some(0xC0EF), None, false),
];

/// Disk II のステッパーフェーズ（DRVSM0-3）
pub const PHASE_SWITCHES: [Switch; 4] = [Switch::DrvSm0, Switch::DrvSm1, Switch::DrvSm2, Switch::DrvSm3];

/// I/O アドレスの行き先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoRoute {
    /// $C000-$C00F 読み出し: キーボードラッチ
    Keyboard,
    /// $C010: キーストローブクリア
    ClearStrobe,
    /// スイッチ状態の読み出し（bit7）
    Status(Switch),
    /// 切り替えのみ（読み出し値は不定）
    Toggle,
    /// $C030 スピーカー
    Speaker,
    /// $C080-$C08F ランゲージカード
    LanguageCard,
    /// $C090-$C0FF 周辺カードのレジスタ
    Slot { slot: u8, reg: u8 },
    /// 何も接続されていない
    Floating,
}

/// ソフトスイッチの状態と経路表
#[derive(Debug, Clone)]
pub struct SoftSwitches {
    flags: [bool; SWITCH_COUNT],
    routes: [IoRoute; 256],
    toggles: [Option<(Switch, bool)>; 256],
}

impl Default for SoftSwitches {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftSwitches {
    pub fn new() -> Self {
        let mut toggles = [None; 256];
        for d in SWITCH_DEFS.iter() {
            if let Some(off) = d.off {
                toggles[(off & 0xFF) as usize] = Some((d.switch, false));
            }
            if let Some(on) = d.on {
                toggles[(on & 0xFF) as usize] = Some((d.switch, true));
            }
        }

        let mut switches = SoftSwitches {
            flags: [false; SWITCH_COUNT],
            routes: [IoRoute::Floating; 256],
            toggles,
        };
        for low in 0..256usize {
            switches.routes[low] = Self::build_route(low as u8, &switches.toggles);
        }
        switches.reset();
        switches
    }

    fn build_route(low: u8, toggles: &[Option<(Switch, bool)>; 256]) -> IoRoute {
        let addr = 0xC000 | low as u16;
        match low {
            0x00..=0x0F => IoRoute::Keyboard,
            0x10 => IoRoute::ClearStrobe,
            0x30..=0x3F => IoRoute::Speaker,
            0x80..=0x8F => IoRoute::LanguageCard,
            0x90..=0xFF => IoRoute::Slot {
                slot: (low - 0x80) >> 4,
                reg: low & 0x0F,
            },
            _ => {
                if let Some(d) = SWITCH_DEFS.iter().find(|d| d.status == Some(addr)) {
                    IoRoute::Status(d.switch)
                } else if toggles[low as usize].is_some() {
                    IoRoute::Toggle
                } else {
                    IoRoute::Floating
                }
            }
        }
    }

    /// 全スイッチをオフにし、TEXT をオンにする
    pub fn reset(&mut self) {
        self.flags = [false; SWITCH_COUNT];
        self.flags[Switch::Text as usize] = true;
    }

    #[inline]
    pub fn is_set(&self, switch: Switch) -> bool {
        self.flags[switch as usize]
    }

    #[inline]
    pub fn set(&mut self, switch: Switch, value: bool) {
        self.flags[switch as usize] = value;
    }

    /// I/O アドレスの経路
    #[inline]
    pub fn route(&self, address: u16) -> IoRoute {
        self.routes[(address & 0xFF) as usize]
    }

    /// アクセスされたアドレスに対応するスイッチを切り替える
    ///
    /// ハンドラ呼び出しの前に、同じアクセスの中で行う。
    pub fn touch(&mut self, address: u16, write: bool) {
        if let Some((switch, on)) = self.toggles[(address & 0xFF) as usize] {
            if write || !SWITCH_DEFS[switch as usize].write_only {
                self.flags[switch as usize] = on;
            }
        }
    }

    /// 名前 → 状態のマップ（セーブステート用）
    pub fn to_map(&self) -> BTreeMap<String, bool> {
        SWITCH_DEFS
            .iter()
            .map(|d| (d.name.to_string(), self.flags[d.switch as usize]))
            .collect()
    }

    /// マップから状態を復元する。未知の名前は無視
    pub fn apply_map(&mut self, map: &BTreeMap<String, bool>) {
        for d in SWITCH_DEFS.iter() {
            if let Some(&value) = map.get(d.name) {
                self.flags[d.switch as usize] = value;
            }
        }
    }

    /// ステッパーフェーズの状態
    pub fn phases(&self) -> [bool; 4] {
        PHASE_SWITCHES.map(|s| self.is_set(s))
    }
}
