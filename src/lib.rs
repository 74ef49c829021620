//! A2Core - Apple II emulation core
//!
//! - 6502 / 65C02 CPU とデバッガ（ブレークポイント、ステップ実行）
//! - メイン/補助RAM、ランゲージカード、ソフトスイッチ
//! - WOZ1/WOZ2 ディスクイメージ（DSK/PO は読み込み時に WOZ へ変換）
//! - ビット単位の Disk II コントローラ
//! - フレーム単位のスケジューラとタイムトラベル用スナップショット

pub mod config;
pub mod cpu;
pub mod debugger;
pub mod disk_log;
pub mod drive;
pub mod dsk2woz;
pub mod error;
pub mod machine;
pub mod memory;
pub mod savestate;
pub mod scheduler;
pub mod softswitch;
pub mod timetravel;
pub mod woz;
