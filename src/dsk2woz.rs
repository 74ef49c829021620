//! DSK/PO → WOZ2 変換
//!
//! 35トラック×16セクタのセクタイメージを、DOS 3.3 の標準フォーマット
//! （アドレスフィールド 4-and-4、データフィールド 6-and-2、10ビット同期バイト）
//! のビットストリームに書き直し、WOZ2 コンテナにまとめる。

use crate::woz::{self, NO_TRACK, WOZ2_MAGIC};

pub const TRACKS: usize = 35;
pub const SECTORS_PER_TRACK: usize = 16;
pub const BYTES_PER_SECTOR: usize = 256;
pub const BYTES_PER_TRACK: usize = SECTORS_PER_TRACK * BYTES_PER_SECTOR;
/// 143360 bytes
pub const SECTOR_IMAGE_SIZE: usize = TRACKS * BYTES_PER_TRACK;

/// 1トラックに割り当てるブロック数（512バイト単位）
const BLOCKS_PER_TRACK: usize = 13;
const TRACK_BYTES: usize = BLOCKS_PER_TRACK * 512;
/// トラックデータの先頭ブロック
const FIRST_TRACK_BLOCK: usize = 3;

const VOLUME: u8 = 254;
const CREATOR: &[u8] = b"a2core dsk2woz";

/// 6-and-2エンコーディングテーブル
pub(crate) const WRITE_TABLE: [u8; 64] = [
    0x96, 0x97, 0x9A, 0x9B, 0x9D, 0x9E, 0x9F, 0xA6,
    0xA7, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, 0xB2, 0xB3,
    0xB4, 0xB5, 0xB6, 0xB7, 0xB9, 0xBA, 0xBB, 0xBC,
    0xBD, 0xBE, 0xBF, 0xCB, 0xCD, 0xCE, 0xCF, 0xD3,
    0xD6, 0xD7, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE,
    0xDF, 0xE5, 0xE6, 0xE7, 0xE9, 0xEA, 0xEB, 0xEC,
    0xED, 0xEE, 0xEF, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6,
    0xF7, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF,
];

/// DOS 3.3セクターインターリーブ
pub const DOS_SECTOR_ORDER: [usize; 16] = [0, 7, 14, 6, 13, 5, 12, 4, 11, 3, 10, 2, 9, 1, 8, 15];

/// ProDOSセクターオーダー
pub const PRODOS_SECTOR_ORDER: [usize; 16] = [0, 8, 1, 9, 2, 10, 3, 11, 4, 12, 5, 13, 6, 14, 7, 15];

/// イメージファイル内のセクタの並び
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorOrder {
    Dos,
    ProDos,
}

impl SectorOrder {
    /// 物理セクタ → ファイル内セクタ
    pub fn table(self) -> &'static [usize; 16] {
        match self {
            SectorOrder::Dos => &DOS_SECTOR_ORDER,
            SectorOrder::ProDos => &PRODOS_SECTOR_ORDER,
        }
    }
}

/// トラック1本分のビット列を組み立てる
struct TrackWriter {
    data: [u8; TRACK_BYTES],
    bit: usize,
}

impl TrackWriter {
    fn new() -> Self {
        TrackWriter {
            data: [0; TRACK_BYTES],
            bit: 0,
        }
    }

    fn write_bit(&mut self, value: bool) {
        if value {
            self.data[self.bit >> 3] |= 0x80 >> (self.bit & 7);
        }
        self.bit += 1;
    }

    fn write_byte(&mut self, value: u8) {
        for shift in (0..8).rev() {
            self.write_bit((value >> shift) & 1 != 0);
        }
    }

    fn write_bytes(&mut self, values: &[u8]) {
        for &v in values {
            self.write_byte(v);
        }
    }

    /// 10ビット同期バイト（0xFF + 0 ビット2つ）
    fn write_sync(&mut self, count: usize) {
        for _ in 0..count {
            self.write_byte(0xFF);
            self.write_bit(false);
            self.write_bit(false);
        }
    }

    /// 4-and-4エンコード
    /// byte1 = 奇数ビット (D7,D5,D3,D1) + 0xAA
    /// byte2 = 偶数ビット (D6,D4,D2,D0) + 0xAA
    fn write_4and4(&mut self, value: u8) {
        self.write_byte((value >> 1) | 0xAA);
        self.write_byte(value | 0xAA);
    }
}

/// 下位2ビットを入れ替える（P5 PROM の LSR/ROL による復元順）
fn swap_low_bits(value: u8) -> u8 {
    ((value & 0x01) << 1) | ((value & 0x02) >> 1)
}

/// 6-and-2エンコーディング（343バイト）
pub(crate) fn encode_6and2(data: &[u8]) -> [u8; 343] {
    let mut shifted = [0u8; 342];

    // 補助バッファ: 各バイトの下位2ビットを86バイトに詰める
    for i in 0..86 {
        let mut val = swap_low_bits(data[i]);
        val |= swap_low_bits(data[i + 86]) << 2;
        if i + 172 < 256 {
            val |= swap_low_bits(data[i + 172]) << 4;
        }
        shifted[i] = val;
    }
    // メインデータ（上位6ビット）
    for i in 0..256 {
        shifted[86 + i] = data[i] >> 2;
    }

    // 隣接XORでエンコード、最後にチェックサム
    let mut result = [0u8; 343];
    let mut prev = 0u8;
    for (out, &val) in result.iter_mut().zip(shifted.iter()) {
        *out = WRITE_TABLE[((val ^ prev) & 0x3F) as usize];
        prev = val;
    }
    result[342] = WRITE_TABLE[(prev & 0x3F) as usize];
    result
}

fn encode_track(sectors: &[u8], track: u8, order: SectorOrder) -> TrackWriter {
    let mut writer = TrackWriter::new();
    writer.write_sync(16);

    for (sector, &file_sector) in order.table().iter().enumerate() {
        let sector = sector as u8;

        // アドレスフィールド
        writer.write_bytes(&[0xD5, 0xAA, 0x96]);
        writer.write_4and4(VOLUME);
        writer.write_4and4(track);
        writer.write_4and4(sector);
        writer.write_4and4(VOLUME ^ track ^ sector);
        writer.write_bytes(&[0xDE, 0xAA, 0xEB]);

        writer.write_sync(7);

        // データフィールド
        let offset = file_sector * BYTES_PER_SECTOR;
        writer.write_bytes(&[0xD5, 0xAA, 0xAD]);
        writer.write_bytes(&encode_6and2(&sectors[offset..offset + BYTES_PER_SECTOR]));
        writer.write_bytes(&[0xDE, 0xAA, 0xEB]);

        writer.write_sync(16);
    }
    writer
}

fn put_chunk_header(image: &mut [u8], offset: usize, id: &[u8; 4], size: u32) {
    image[offset..offset + 4].copy_from_slice(id);
    image[offset + 4..offset + 8].copy_from_slice(&size.to_le_bytes());
}

/// セクタイメージを WOZ2 に変換する
///
/// 入力が 143360 バイトでなければ空の Vec を返す。
pub fn convert(bytes: &[u8], order: SectorOrder) -> Vec<u8> {
    if bytes.len() != SECTOR_IMAGE_SIZE {
        return Vec::new();
    }

    let data_start = FIRST_TRACK_BLOCK * 512;
    let mut image = vec![0u8; data_start + TRACKS * TRACK_BYTES];
    image[..8].copy_from_slice(&WOZ2_MAGIC);

    // INFO
    put_chunk_header(&mut image, 12, b"INFO", 60);
    image[20] = 2; // version
    image[21] = 1; // 5.25"
    image[22] = 0; // write protected
    image[23] = 1; // synchronized
    image[24] = 1; // cleaned
    image[25..57].fill(b' ');
    image[25..25 + CREATOR.len()].copy_from_slice(CREATOR);
    image[57] = 1; // disk sides
    image[58] = 1; // 16-sector boot
    image[59] = 32; // optimal bit timing (4us)
    image[64..66].copy_from_slice(&(BLOCKS_PER_TRACK as u16).to_le_bytes());

    // TMAP（クォータートラック 4t-1, 4t, 4t+1 → t）
    put_chunk_header(&mut image, 80, b"TMAP", 160);
    image[88..248].fill(NO_TRACK);
    for track in 0..TRACKS {
        let quarter = 4 * track;
        let first = quarter.saturating_sub(1);
        for q in first..=quarter + 1 {
            image[88 + q] = track as u8;
        }
    }

    // TRKS
    let trks_size = 1280 + TRACKS * TRACK_BYTES;
    put_chunk_header(&mut image, 248, b"TRKS", trks_size as u32);
    for track in 0..TRACKS {
        let sectors = &bytes[track * BYTES_PER_TRACK..(track + 1) * BYTES_PER_TRACK];
        let writer = encode_track(sectors, track as u8, order);

        let record = 256 + 8 * track;
        let block = (FIRST_TRACK_BLOCK + BLOCKS_PER_TRACK * track) as u16;
        image[record..record + 2].copy_from_slice(&block.to_le_bytes());
        image[record + 2..record + 4].copy_from_slice(&(BLOCKS_PER_TRACK as u16).to_le_bytes());
        image[record + 4..record + 8].copy_from_slice(&(writer.bit as u32).to_le_bytes());

        let start = data_start + track * TRACK_BYTES;
        image[start..start + TRACK_BYTES].copy_from_slice(&writer.data);
    }

    woz::update_checksum(&mut image);
    image
}

/// 6-and-2 デコード（343バイト → 256バイト）。チェックサム不一致なら None
#[cfg(test)]
pub(crate) fn decode_6and2(encoded: &[u8]) -> Option<[u8; 256]> {
    let mut inverse = [0xFFu8; 256];
    for (i, &code) in WRITE_TABLE.iter().enumerate() {
        inverse[code as usize] = i as u8;
    }
    let mut shifted = [0u8; 342];
    let mut prev = 0u8;
    for (slot, &code) in shifted.iter_mut().zip(encoded.iter()) {
        let val = inverse[code as usize];
        if val == 0xFF {
            return None;
        }
        prev ^= val;
        *slot = prev;
    }
    if inverse[encoded[342] as usize] != prev {
        return None;
    }
    let mut data = [0u8; 256];
    for (i, byte) in data.iter_mut().enumerate() {
        let low = (shifted[i % 86] >> (2 * (i / 86))) & 0x03;
        *byte = (shifted[86 + i] << 2) | swap_low_bits(low);
    }
    Some(data)
}
