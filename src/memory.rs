//! Apple II メモリサブシステム
//!
//! 64KBのメイン/補助RAM、ランゲージカード、ROM、スロットROMと、
//! $C000-$C0FF の I/O 空間のデコードを担当する。
//! バンク切り替えは次のアクセスから即座に反映される。

use crate::cpu::MemoryBus;
use crate::error::StateError;
use crate::softswitch::{IoRoute, SoftSwitches, Switch};

const RAM_SIZE: usize = 0x10000;
/// ランゲージカード: $D000-$FFFF（バンク1）+ $D000-$DFFF（バンク2）
const LC_SIZE: usize = 0x3000;
const LC_BANK2_SIZE: usize = 0x1000;
const ROM_SIZE: usize = 0x4000;

/// セーブステートのメモリイメージの長さ
/// （メイン, 補助, メインLC, メインLCバンク2, 補助LC, 補助LCバンク2）
pub const MEMORY_IMAGE_SIZE: usize = 2 * RAM_SIZE + 2 * (LC_SIZE + LC_BANK2_SIZE);

/// ランゲージカードのRAM（メイン/補助で1組ずつ）
#[derive(Clone)]
struct LanguageCardRam {
    ram: Box<[u8; LC_SIZE]>,
    bank2: Box<[u8; LC_BANK2_SIZE]>,
}

impl LanguageCardRam {
    fn new() -> Self {
        LanguageCardRam {
            ram: Box::new([0; LC_SIZE]),
            bank2: Box::new([0; LC_BANK2_SIZE]),
        }
    }

    fn cell(&mut self, address: u16, bank2: bool) -> &mut u8 {
        let offset = (address - 0xD000) as usize;
        if bank2 && address < 0xE000 {
            &mut self.bank2[offset]
        } else {
            &mut self.ram[offset]
        }
    }

    fn clear(&mut self) {
        self.ram.fill(0);
        self.bank2.fill(0);
    }
}

/// Apple IIメモリシステム
#[derive(Clone)]
pub struct Memory {
    pub main_ram: Box<[u8; RAM_SIZE]>,
    pub aux_ram: Box<[u8; RAM_SIZE]>,
    lc_main: LanguageCardRam,
    lc_aux: LanguageCardRam,
    /// $C000-$FFFF の内蔵ROM
    rom: Vec<u8>,
    /// スロット1-7の256バイトROM（インデックス0は未使用）
    slot_rom: [Option<Box<[u8; 256]>>; 8],
    pub switches: SoftSwitches,
    /// キーボードラッチ（bit7 = ストローブ）
    keyboard_latch: u8,
    /// スピーカーのトグル回数
    pub speaker_clicks: u64,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            main_ram: Box::new([0; RAM_SIZE]),
            aux_ram: Box::new([0; RAM_SIZE]),
            lc_main: LanguageCardRam::new(),
            lc_aux: LanguageCardRam::new(),
            rom: vec![0xFF; ROM_SIZE],
            slot_rom: Default::default(),
            switches: SoftSwitches::new(),
            keyboard_latch: 0,
            speaker_clicks: 0,
        }
    }

    /// ROMイメージを配置する
    ///
    /// - 12KB: $D000-$FFFF (Apple II/II+)
    /// - 16KB: $C000-$FFFF
    /// - 20KB: Apple II Plus ROM パッケージ（$0600 の Disk II ブートROMはスロット6へ）
    /// - 32KB: Apple IIe ROM（後半16KBを使用）
    ///
    /// その他のサイズは末尾を $FFFF に揃えて配置する。
    pub fn load_rom(&mut self, rom_data: &[u8]) {
        self.rom = vec![0xFF; ROM_SIZE];
        match rom_data.len() {
            0x3000 => self.rom[0x1000..].copy_from_slice(rom_data),
            0x4000 => self.rom.copy_from_slice(rom_data),
            0x5000 => {
                self.rom[0x1000..].copy_from_slice(&rom_data[0x2000..0x5000]);
                self.install_slot_rom(6, &rom_data[0x0600..0x0700]);
                log::info!("Loaded 20KB Apple II Plus ROM (Disk II boot ROM in slot 6)");
            }
            0x8000 => {
                self.rom.copy_from_slice(&rom_data[0x4000..0x8000]);
                log::info!("Loaded 32KB Apple IIe ROM");
            }
            len => {
                log::warn!("Unknown ROM size: {} bytes", len);
                let take = len.min(ROM_SIZE);
                self.rom[ROM_SIZE - take..].copy_from_slice(&rom_data[len - take..]);
            }
        }
        let reset = u16::from_le_bytes([self.rom[0x3FFC], self.rom[0x3FFD]]);
        log::debug!("Reset vector: ${:04X}", reset);
    }

    /// スロットROMを設定する（256バイト）
    pub fn set_slot_rom(&mut self, slot: usize, data: &[u8]) -> Result<(), &'static str> {
        if !(1..=7).contains(&slot) {
            return Err("Slot must be 1-7");
        }
        if data.len() != 256 {
            return Err("Slot ROM must be 256 bytes");
        }
        self.install_slot_rom(slot, data);
        Ok(())
    }

    fn install_slot_rom(&mut self, slot: usize, data: &[u8]) {
        let mut rom = Box::new([0u8; 256]);
        rom.copy_from_slice(data);
        self.slot_rom[slot] = Some(rom);
    }

    pub fn has_slot_rom(&self, slot: usize) -> bool {
        self.slot_rom.get(slot).is_some_and(|r| r.is_some())
    }

    /// RAMをクリアし、スイッチを初期状態に戻す（ROMはそのまま）
    pub fn reset_memory(&mut self) {
        self.main_ram.fill(0);
        self.aux_ram.fill(0);
        self.lc_main.clear();
        self.lc_aux.clear();
        self.switches.reset();
        self.keyboard_latch = 0;
    }

    /// メインRAMへ直接書き込む（バンク切り替えを無視）
    pub fn set_binary_block(&mut self, address: u16, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.main_ram[address.wrapping_add(i as u16) as usize] = byte;
        }
    }

    pub fn set_key(&mut self, key: u8) {
        self.keyboard_latch = key | 0x80;
    }

    /// キーストローブが有効か（bit7がセットされているか）
    pub fn has_key_strobe(&self) -> bool {
        (self.keyboard_latch & 0x80) != 0
    }

    pub fn keyboard_latch(&self) -> u8 {
        self.keyboard_latch
    }

    pub fn set_keyboard_latch(&mut self, value: u8) {
        self.keyboard_latch = value;
    }

    /// ボタン（PB0-PB2）を設定
    pub fn set_button(&mut self, button: usize, pressed: bool) {
        let switch = match button {
            0 => Switch::Pb0,
            1 => Switch::Pb1,
            2 => Switch::Pb2,
            _ => return,
        };
        self.switches.set(switch, pressed);
    }

    //--------------------------------------------------
    // I/O 空間
    //--------------------------------------------------

    /// I/Oアドレスへのアクセスを開始する
    ///
    /// 対応するスイッチを切り替えてから経路を返す。
    pub fn decode_io(&mut self, address: u16, write: bool) -> IoRoute {
        self.switches.touch(address, write);
        self.switches.route(address)
    }

    /// スロット以外の I/O ハンドラ（スロットのレジスタは未接続として扱う）
    pub fn handle_io(&mut self, route: IoRoute, address: u16, value: Option<u8>) -> u8 {
        let write = value.is_some();
        match route {
            IoRoute::Keyboard => {
                if write {
                    0
                } else {
                    self.keyboard_latch
                }
            }
            IoRoute::ClearStrobe => self.clear_strobe(),
            IoRoute::Status(switch) => {
                if write {
                    self.clear_strobe();
                    0
                } else {
                    let bit = if self.switches.is_set(switch) { 0x80 } else { 0x00 };
                    bit | (self.keyboard_latch & 0x7F)
                }
            }
            IoRoute::Speaker => {
                self.speaker_clicks = self.speaker_clicks.wrapping_add(1);
                0
            }
            IoRoute::LanguageCard => {
                self.handle_language_card((address & 0x0F) as u8, write);
                0
            }
            IoRoute::Toggle | IoRoute::Slot { .. } | IoRoute::Floating => 0,
        }
    }

    fn clear_strobe(&mut self) -> u8 {
        let result = self.keyboard_latch;
        self.keyboard_latch &= 0x7F;
        result
    }

    /// $C080-$C08F
    ///
    /// bit3 でバンク（0 = バンク2）、bit0-1 が 0 か 3 ならRAM読み出し。
    /// 奇数アドレスを2回続けて読むと書き込みが有効になる。
    fn handle_language_card(&mut self, reg: u8, write: bool) {
        let sw = &mut self.switches;
        sw.set(Switch::BsrBank2, reg & 0x08 == 0);
        sw.set(Switch::BsrReadRam, matches!(reg & 0x03, 0 | 3));
        if reg & 0x01 != 0 {
            if !write && sw.is_set(Switch::BsrPreWrite) {
                sw.set(Switch::BsrWriteRam, true);
            }
            sw.set(Switch::BsrPreWrite, !write);
        } else {
            sw.set(Switch::BsrWriteRam, false);
            sw.set(Switch::BsrPreWrite, false);
        }
    }

    //--------------------------------------------------
    // バンク選択
    //--------------------------------------------------

    /// $0000-$BFFF で補助RAMを使うか
    fn use_aux(&self, address: u16, write: bool) -> bool {
        let sw = &self.switches;
        if address < 0x0200 {
            return sw.is_set(Switch::AltZp);
        }
        if sw.is_set(Switch::Store80) {
            let text_page = (0x0400..0x0800).contains(&address);
            let hires_page = sw.is_set(Switch::Hires) && (0x2000..0x4000).contains(&address);
            if text_page || hires_page {
                return sw.is_set(Switch::Page2);
            }
        }
        if write {
            sw.is_set(Switch::RamWrt)
        } else {
            sw.is_set(Switch::RamRd)
        }
    }

    fn lc_cell(&mut self, address: u16) -> &mut u8 {
        let bank2 = self.switches.is_set(Switch::BsrBank2);
        if self.switches.is_set(Switch::AltZp) {
            self.lc_aux.cell(address, bank2)
        } else {
            self.lc_main.cell(address, bank2)
        }
    }

    /// $C100-$CFFF
    fn read_expansion_rom(&self, address: u16) -> u8 {
        let offset = (address - 0xC000) as usize;
        if self.switches.is_set(Switch::IntCxRom) || address >= 0xC800 {
            return self.rom[offset];
        }
        let slot = ((address >> 8) & 0x07) as usize;
        if slot == 3 && !self.switches.is_set(Switch::SlotC3Rom) {
            return self.rom[offset];
        }
        match &self.slot_rom[slot] {
            Some(rom) => rom[(address & 0xFF) as usize],
            None => self.rom[offset],
        }
    }

    //--------------------------------------------------
    // セーブステート
    //--------------------------------------------------

    /// RAM全体を1つのイメージにまとめる
    pub fn snapshot_image(&self) -> Vec<u8> {
        let mut image = Vec::with_capacity(MEMORY_IMAGE_SIZE);
        image.extend_from_slice(&self.main_ram[..]);
        image.extend_from_slice(&self.aux_ram[..]);
        for lc in [&self.lc_main, &self.lc_aux] {
            image.extend_from_slice(&lc.ram[..]);
            image.extend_from_slice(&lc.bank2[..]);
        }
        image
    }

    /// 長さを検証する（書き込みは行わない）
    pub fn check_image(image: &[u8]) -> Result<(), StateError> {
        if image.len() != MEMORY_IMAGE_SIZE {
            return Err(StateError::MemorySize {
                expected: MEMORY_IMAGE_SIZE,
                actual: image.len(),
            });
        }
        Ok(())
    }

    /// `snapshot_image` の逆
    pub fn restore_image(&mut self, image: &[u8]) -> Result<(), StateError> {
        Self::check_image(image)?;
        let (main, rest) = image.split_at(RAM_SIZE);
        let (aux, rest) = rest.split_at(RAM_SIZE);
        self.main_ram.copy_from_slice(main);
        self.aux_ram.copy_from_slice(aux);
        let (lc_main, lc_aux) = rest.split_at(LC_SIZE + LC_BANK2_SIZE);
        for (lc, bytes) in [(&mut self.lc_main, lc_main), (&mut self.lc_aux, lc_aux)] {
            let (ram, bank2) = bytes.split_at(LC_SIZE);
            lc.ram.copy_from_slice(ram);
            lc.bank2.copy_from_slice(bank2);
        }
        Ok(())
    }
}

impl MemoryBus for Memory {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0x0000..=0xBFFF => {
                if self.use_aux(address, false) {
                    self.aux_ram[address as usize]
                } else {
                    self.main_ram[address as usize]
                }
            }
            0xC000..=0xC0FF => {
                let route = self.decode_io(address, false);
                self.handle_io(route, address, None)
            }
            0xC100..=0xCFFF => self.read_expansion_rom(address),
            0xD000..=0xFFFF => {
                if self.switches.is_set(Switch::BsrReadRam) {
                    *self.lc_cell(address)
                } else {
                    self.rom[(address - 0xC000) as usize]
                }
            }
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0xBFFF => {
                if self.use_aux(address, true) {
                    self.aux_ram[address as usize] = value;
                } else {
                    self.main_ram[address as usize] = value;
                }
            }
            0xC000..=0xC0FF => {
                let route = self.decode_io(address, true);
                self.handle_io(route, address, Some(value));
            }
            0xC100..=0xCFFF => {}
            0xD000..=0xFFFF => {
                if self.switches.is_set(Switch::BsrWriteRam) {
                    *self.lc_cell(address) = value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_with_rom() -> Memory {
        let mut rom = vec![0u8; 0x4000];
        rom[0x1000] = 0xD0; // $D000
        rom[0x3FFC] = 0x00;
        rom[0x3FFD] = 0xFF;
        let mut mem = Memory::new();
        mem.load_rom(&rom);
        mem
    }

    #[test]
    fn test_language_card_double_read_enables_write() {
        let mut mem = memory_with_rom();
        assert_eq!(mem.read(0xD000), 0xD0);

        // $C083を1回だけ読む: RAM読み出し、書き込みはまだ無効
        mem.read(0xC083);
        mem.write(0xD000, 0x42);
        assert_eq!(mem.read(0xD000), 0x00);

        // 2回目で書き込み有効
        mem.read(0xC083);
        mem.write(0xD000, 0x42);
        assert_eq!(mem.read(0xD000), 0x42);

        // バンク1は別のセル
        mem.read(0xC08B);
        mem.read(0xC08B);
        assert_eq!(mem.read(0xD000), 0x00);

        // $C082: ROM読み出し、書き込み無効
        mem.read(0xC082);
        assert_eq!(mem.read(0xD000), 0xD0);
        assert!(!mem.switches.is_set(Switch::BsrWriteRam));
    }

    #[test]
    fn test_write_breaks_prewrite_sequence() {
        let mut mem = memory_with_rom();
        mem.read(0xC081);
        mem.write(0xC081, 0);
        mem.read(0xC081);
        assert!(!mem.switches.is_set(Switch::BsrWriteRam));
    }

    #[test]
    fn test_aux_banking() {
        let mut mem = Memory::new();
        mem.write(0x0300, 0x11);
        mem.write(0xC005, 0); // RAMWRT on
        mem.write(0x0300, 0x22);
        assert_eq!(mem.read(0x0300), 0x11);
        mem.write(0xC003, 0); // RAMRD on
        assert_eq!(mem.read(0x0300), 0x22);
        assert_eq!(mem.read(0xC013) & 0x80, 0x80);

        // ALTZP
        mem.write(0x0010, 0x33);
        mem.write(0xC009, 0);
        assert_eq!(mem.read(0x0010), 0x00);
        mem.write(0xC008, 0);
        assert_eq!(mem.read(0x0010), 0x33);
    }

    #[test]
    fn test_80store_page2_selects_text_page() {
        let mut mem = Memory::new();
        mem.write(0xC001, 0); // 80STORE
        mem.read(0xC055); // PAGE2
        mem.write(0x0400, 0xAA);
        assert_eq!(mem.aux_ram[0x0400], 0xAA);
        assert_eq!(mem.main_ram[0x0400], 0x00);
        mem.read(0xC054);
        assert_eq!(mem.read(0x0400), 0x00);
    }

    #[test]
    fn test_keyboard_strobe() {
        let mut mem = Memory::new();
        mem.set_key(b'A');
        assert_eq!(mem.read(0xC000), 0xC1);
        assert_eq!(mem.read(0xC010), 0xC1);
        assert_eq!(mem.read(0xC000), 0x41);
        assert!(!mem.has_key_strobe());
        // ステータス読み出しは下位7ビットにラッチ
        assert_eq!(mem.read(0xC01A), 0x80 | 0x41);
    }

    #[test]
    fn test_buttons() {
        let mut mem = Memory::new();
        mem.set_button(1, true);
        assert_eq!(mem.read(0xC062) & 0x80, 0x80);
        assert_eq!(mem.read(0xC061) & 0x80, 0x00);
    }

    #[test]
    fn test_slot_rom_and_intcxrom() {
        let mut mem = memory_with_rom();
        let mut boot = [0u8; 256];
        boot[0] = 0xA2;
        mem.set_slot_rom(6, &boot).unwrap();
        assert_eq!(mem.read(0xC600), 0xA2);
        mem.write(0xC007, 0);
        assert_eq!(mem.read(0xC600), 0x00);
        assert!(mem.set_slot_rom(0, &boot).is_err());
        assert!(mem.set_slot_rom(6, &boot[..10]).is_err());
    }

    #[test]
    fn test_image_round_trip() {
        let mut mem = Memory::new();
        mem.main_ram[0x1234] = 0x56;
        mem.aux_ram[0x2345] = 0x67;
        let image = mem.snapshot_image();
        assert_eq!(image.len(), MEMORY_IMAGE_SIZE);
        let mut other = Memory::new();
        other.restore_image(&image).unwrap();
        assert_eq!(other.snapshot_image(), image);
        assert!(other.restore_image(&image[1..]).is_err());
    }
}
