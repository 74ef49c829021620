//! WOZ ディスクイメージのコーデック
//!
//! WOZ1/WOZ2 のビットストリームコンテナを読み込み、ハーフトラックごとの
//! 開始位置（バイトオフセット）とビット数の表を作る。
//! DSK/DO/PO のセクタイメージは `dsk2woz` で WOZ2 に変換してから同じ経路を通す。
//! トラックのビット列そのものは再エンコードしない。

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dsk2woz::{self, SectorOrder};
use crate::error::{DiskError, DiskWarning};

/// ハーフトラックの数（0..80）
pub const HALF_TRACKS: usize = 80;
/// 空トラックとして扱う際のビット数
pub const EMPTY_TRACK_BITS: u32 = 51200;
/// TMAP に未割り当てを示す値
pub const NO_TRACK: u8 = 0xFF;

pub const WOZ2_MAGIC: [u8; 8] = [0x57, 0x4F, 0x5A, 0x32, 0xFF, 0x0A, 0x0D, 0x0A];
pub const WOZ1_MAGIC: [u8; 8] = [0x57, 0x4F, 0x5A, 0x31, 0xFF, 0x0A, 0x0D, 0x0A];

/// INFO チャンクの write protected フラグ
const INFO_WRITE_PROTECTED: usize = 22;
/// TMAP チャンクのデータ開始位置
const TMAP_DATA: usize = 88;
/// TRKS チャンク（WOZ2 の TRK レコード / WOZ1 のトラック本体）の開始位置
const TRKS_DATA: usize = 256;
/// WOZ1 の1トラックの大きさ
const WOZ1_TRACK_SIZE: usize = 6656;
/// WOZ1 トラック内の bytes_used/bit_count 位置
const WOZ1_BIT_COUNT: usize = 6648;

/// 読み込み元の形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskFormat {
    Woz2,
    Woz1,
    /// DOS 3.3 順のセクタイメージ（.dsk / .do）
    Dsk,
    /// ProDOS 順のセクタイメージ（.po）
    Po,
}

/// デコード済みのディスク
#[derive(Debug, Clone)]
pub struct DecodedDisk {
    /// ファイル名（セクタイメージから変換した場合は拡張子が .woz になる）
    pub file_name: String,
    pub format: DiskFormat,
    /// 常に WOZ コンテナ
    pub image: Vec<u8>,
    /// ハーフトラックの先頭バイト位置（0 = 空）
    pub track_start: [usize; HALF_TRACKS],
    pub track_nbits: [u32; HALF_TRACKS],
    pub write_protected: bool,
    pub warning: Option<DiskWarning>,
    /// セクタイメージから変換した（未保存の変更がある）
    pub converted: bool,
}

const CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { 0xEDB8_8320 ^ (crc >> 1) } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// CRC-32（反転多項式 0xEDB88320）
pub fn crc32(bytes: &[u8]) -> u32 {
    !bytes.iter().fold(!0u32, |crc, &b| {
        CRC_TABLE[((crc ^ b as u32) & 0xFF) as usize] ^ (crc >> 8)
    })
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

/// 形式を判定する（マジック → 拡張子の順）
pub fn detect(file_name: &str, bytes: &[u8]) -> Result<DiskFormat, DiskError> {
    if bytes.starts_with(&WOZ2_MAGIC) {
        return Ok(DiskFormat::Woz2);
    }
    if bytes.starts_with(&WOZ1_MAGIC) {
        return Ok(DiskFormat::Woz1);
    }
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("dsk") | Some("do") => Ok(DiskFormat::Dsk),
        Some("po") => Ok(DiskFormat::Po),
        _ => Err(DiskError::UnknownFormat(file_name.to_string())),
    }
}

/// ディスクイメージを読み込む
pub fn decode(file_name: &str, bytes: Vec<u8>) -> Result<DecodedDisk, DiskError> {
    let format = detect(file_name, &bytes)?;
    let (file_name, image, converted) = match format {
        DiskFormat::Woz2 | DiskFormat::Woz1 => (file_name.to_string(), bytes, false),
        DiskFormat::Dsk | DiskFormat::Po => {
            let order = if format == DiskFormat::Po {
                SectorOrder::ProDos
            } else {
                SectorOrder::Dos
            };
            let image = dsk2woz::convert(&bytes, order);
            if image.is_empty() {
                return Err(DiskError::BadSectorImageSize {
                    expected: dsk2woz::SECTOR_IMAGE_SIZE,
                    actual: bytes.len(),
                });
            }
            let woz_name = Path::new(file_name).with_extension("woz");
            (woz_name.to_string_lossy().into_owned(), image, true)
        }
    };

    if image.len() < TRKS_DATA {
        return Err(DiskError::Truncated {
            track: 0,
            needed: TRKS_DATA,
            actual: image.len(),
        });
    }

    let warning = if format == DiskFormat::Woz1 {
        None
    } else {
        verify_checksum(&image)
    };
    if let Some(w) = &warning {
        log::warn!("{}: {}", file_name, w);
    }

    let (track_start, track_nbits) = if format == DiskFormat::Woz1 {
        map_woz1(&image)?
    } else {
        map_woz2(&image)?
    };
    let write_protected = image[INFO_WRITE_PROTECTED] == 1;

    log::info!(
        "Loaded {} ({:?}, {} tracks{})",
        file_name,
        format,
        track_start.iter().filter(|&&s| s != 0).count(),
        if write_protected { ", write protected" } else { "" }
    );

    Ok(DecodedDisk {
        file_name,
        format,
        image,
        track_start,
        track_nbits,
        write_protected,
        warning,
        converted,
    })
}

/// 格納されている CRC を検証する。0 は常に受け入れる
pub fn verify_checksum(bytes: &[u8]) -> Option<DiskWarning> {
    if bytes.len() < 12 {
        return None;
    }
    let stored = u32_at(bytes, 8);
    if stored == 0 {
        return None;
    }
    let computed = crc32(&bytes[12..]);
    (stored != computed).then_some(DiskWarning::ChecksumMismatch { stored, computed })
}

/// CRC を計算し直して格納する
pub fn update_checksum(bytes: &mut [u8]) {
    if bytes.len() < 12 {
        return;
    }
    let crc = crc32(&bytes[12..]);
    bytes[8..12].copy_from_slice(&crc.to_le_bytes());
}

type TrackMap = ([usize; HALF_TRACKS], [u32; HALF_TRACKS]);

fn map_woz2(bytes: &[u8]) -> Result<TrackMap, DiskError> {
    let mut starts = [0usize; HALF_TRACKS];
    let mut nbits = [EMPTY_TRACK_BITS; HALF_TRACKS];
    for htrack in 0..HALF_TRACKS {
        let index = bytes[TMAP_DATA + htrack * 2];
        if index == NO_TRACK {
            continue;
        }
        let record = TRKS_DATA + 8 * index as usize;
        if record + 8 > bytes.len() {
            return Err(DiskError::Truncated {
                track: htrack,
                needed: record + 8,
                actual: bytes.len(),
            });
        }
        let start = 512 * u16_at(bytes, record) as usize;
        let bits = u32_at(bytes, record + 4);
        let needed = start + bits.div_ceil(8) as usize;
        if needed > bytes.len() {
            return Err(DiskError::Truncated {
                track: htrack,
                needed,
                actual: bytes.len(),
            });
        }
        starts[htrack] = start;
        nbits[htrack] = bits;
    }
    Ok((starts, nbits))
}

fn map_woz1(bytes: &[u8]) -> Result<TrackMap, DiskError> {
    let mut starts = [0usize; HALF_TRACKS];
    let mut nbits = [EMPTY_TRACK_BITS; HALF_TRACKS];
    for htrack in 0..HALF_TRACKS {
        let index = bytes[TMAP_DATA + htrack * 2];
        if index == NO_TRACK {
            continue;
        }
        let start = TRKS_DATA + WOZ1_TRACK_SIZE * index as usize;
        let needed = start + WOZ1_TRACK_SIZE;
        if needed > bytes.len() {
            return Err(DiskError::Truncated {
                track: htrack,
                needed,
                actual: bytes.len(),
            });
        }
        starts[htrack] = start;
        nbits[htrack] = u16_at(bytes, start + WOZ1_BIT_COUNT) as u32;
    }
    Ok((starts, nbits))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector_image() -> Vec<u8> {
        (0..dsk2woz::SECTOR_IMAGE_SIZE).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_detect_order() {
        let mut woz = WOZ2_MAGIC.to_vec();
        woz.resize(300, 0);
        assert_eq!(detect("game.dsk", &woz).unwrap(), DiskFormat::Woz2);
        assert_eq!(detect("GAME.DO", &[]).unwrap(), DiskFormat::Dsk);
        assert_eq!(detect("game.Po", &[]).unwrap(), DiskFormat::Po);
        assert!(matches!(detect("game.nib", &[]), Err(DiskError::UnknownFormat(_))));
    }

    #[test]
    fn test_checksum_accept_and_warn() {
        let decoded = decode("test.dsk", sector_image()).unwrap();
        assert!(decoded.warning.is_none());

        let mut corrupt = decoded.image.clone();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let reloaded = decode("test.woz", corrupt.clone()).unwrap();
        assert!(matches!(
            reloaded.warning,
            Some(DiskWarning::ChecksumMismatch { .. })
        ));

        // 格納値 0 は検証しない
        corrupt[8..12].fill(0);
        assert!(decode("test.woz", corrupt).unwrap().warning.is_none());
    }

    #[test]
    fn test_sector_image_is_renamed_and_marked() {
        let decoded = decode("disks/Master.DSK", sector_image()).unwrap();
        assert_eq!(decoded.file_name, "disks/Master.woz");
        assert!(decoded.converted);
        assert_eq!(decoded.format, DiskFormat::Dsk);
        assert!(!decoded.write_protected);
    }

    #[test]
    fn test_bad_sector_image_size() {
        let err = decode("short.dsk", vec![0; 1000]).unwrap_err();
        assert_eq!(
            err,
            DiskError::BadSectorImageSize {
                expected: dsk2woz::SECTOR_IMAGE_SIZE,
                actual: 1000
            }
        );
    }

    #[test]
    fn test_truncated_woz_is_rejected() {
        let image = decode("test.dsk", sector_image()).unwrap().image;
        let cut = image[..image.len() / 2].to_vec();
        assert!(matches!(decode("cut.woz", cut), Err(DiskError::Truncated { .. })));
    }

    #[test]
    fn test_woz1_track_map() {
        let mut image = WOZ1_MAGIC.to_vec();
        image.resize(TRKS_DATA + WOZ1_TRACK_SIZE, 0);
        image[TMAP_DATA..TMAP_DATA + 160].fill(NO_TRACK);
        image[TMAP_DATA] = 0;
        image[TRKS_DATA + WOZ1_BIT_COUNT..TRKS_DATA + WOZ1_BIT_COUNT + 2]
            .copy_from_slice(&50000u16.to_le_bytes());
        image[INFO_WRITE_PROTECTED] = 1;

        let decoded = decode("old.woz", image).unwrap();
        assert_eq!(decoded.track_start[0], TRKS_DATA);
        assert_eq!(decoded.track_nbits[0], 50000);
        assert_eq!(decoded.track_start[1], 0);
        assert_eq!(decoded.track_nbits[1], EMPTY_TRACK_BITS);
        assert!(decoded.write_protected);
    }
}
