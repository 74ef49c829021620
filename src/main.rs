//! A2Core - Apple II emulation core
//!
//! 6502/65C02、ソフトスイッチ、WOZ 対応 Disk II、タイムトラベルを備えた
//! Apple II エミュレーションコアのヘッドレス実行ツール。
//!
//! # 使用方法
//! ```text
//! a2core --rom apple2e.rom -1 dos33.woz --cycles 5000000 --save-state out.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use a2core::config::{self, Config};
use a2core::cpu::CpuType;
use a2core::disk_log;
use a2core::drive::DRIVE_COUNT;
use a2core::machine::Machine;
use a2core::savestate::SaveState;
use a2core::scheduler::{Command, Response, RunState, Scheduler, Speed, StatePublisher};
use clap::Parser;

/// A2Core - Apple II emulation core
#[derive(Parser, Debug)]
#[command(name = "a2core")]
#[command(version)]
#[command(about = "A2Core - Apple II emulation core (headless)", long_about = None)]
struct Args {
    /// ROMファイル
    #[arg(short, long)]
    rom: Option<String>,

    /// Disk II Boot ROM (256 bytes)
    #[arg(long)]
    disk_rom: Option<String>,

    /// ディスクイメージファイル（ドライブ1）
    #[arg(short = '1', long)]
    disk1: Option<String>,

    /// ディスクイメージファイル（ドライブ2）
    #[arg(short = '2', long)]
    disk2: Option<String>,

    /// CPU (6502, 65c02)
    #[arg(long)]
    cpu: Option<String>,

    /// 実行するサイクル数（省略時は停止するまで）
    #[arg(long)]
    cycles: Option<u64>,

    /// ウェイトなしで実行
    #[arg(long)]
    uncapped: bool,

    /// ブレークポイント（16進、複数指定可）
    #[arg(long = "break", value_parser = parse_hex_address)]
    breakpoints: Vec<u16>,

    /// ディスクログ: flow, state, event, bits, all（カンマ区切り）
    #[arg(long, default_value = "")]
    disk_log: String,

    /// 終了時にセーブステートを書き出す
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// 起動時にセーブステートを読み込む
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// 変更されたディスクを終了時に .woz として書き戻す
    #[arg(long)]
    write_back: bool,

    /// 設定ファイル
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_hex_address(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches('$').trim_start_matches("0x");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid address {}: {}", s, e))
}

fn parse_cpu(name: &str) -> Option<CpuType> {
    match name.to_ascii_lowercase().as_str() {
        "6502" => Some(CpuType::Cpu6502),
        "65c02" => Some(CpuType::Cpu65C02),
        _ => None,
    }
}

/// 起動時に挿入するディスク（引数 > 設定の最後のディスク）
///
/// セーブステートを復元した場合はドライブもステートのものを使う。
fn disk_sources(args: &Args, config: &Config, restored: bool) -> [Option<String>; DRIVE_COUNT] {
    let requested = [args.disk1.clone(), args.disk2.clone()];
    if restored {
        for (drive, path) in requested.iter().enumerate() {
            if let Some(path) = path {
                log::warn!("Drive {} comes from the save state; ignoring {}", drive + 1, path);
            }
        }
        return [None, None];
    }
    let mut sources = requested;
    for (drive, source) in sources.iter_mut().enumerate() {
        if source.is_none() {
            *source = config.last_disk(drive).map(str::to_string);
        }
    }
    sources
}

/// 外部Disk II Boot ROMを探してロード
fn load_disk_rom(machine: &mut Machine, path: Option<&str>) {
    if let Some(path) = path {
        match fs::read(path) {
            Ok(data) => match machine.load_disk_rom(&data) {
                Ok(()) => log::info!("Loaded Disk II Boot ROM: {}", path),
                Err(e) => eprintln!("Failed to load Disk II Boot ROM: {}", e),
            },
            Err(e) => eprintln!("Failed to read Disk II Boot ROM {}: {}", path, e),
        }
        return;
    }
    if machine.has_disk_rom() {
        return;
    }
    for path in ["roms/disk2.rom", "disk2.rom", "roms/DISK2.rom"] {
        if let Ok(data) = fs::read(path) {
            if machine.load_disk_rom(&data).is_ok() {
                log::info!("Loaded Disk II Boot ROM: {}", path);
                return;
            }
        }
    }
    eprintln!("Note: Disk II Boot ROM not found; slot 6 will read the internal ROM");
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    match disk_log::parse_levels(&args.disk_log) {
        Ok(level) => disk_log::set_log_level(level),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    }

    let config_path = args.config.clone().unwrap_or_else(config::get_config_path);
    let mut config = Config::load_or_default(&config_path);

    let cpu_type = match args.cpu.as_deref() {
        Some(name) => parse_cpu(name).unwrap_or_else(|| {
            eprintln!("Unknown CPU: {}. Using {:?}", name, config.cpu);
            config.cpu
        }),
        None => config.cpu,
    };

    let Some(rom_path) = args.rom.clone().or_else(|| config.rom_path.clone()) else {
        eprintln!("No ROM specified (use --rom or rom_path in the config file)");
        std::process::exit(1);
    };
    let rom_data = match fs::read(&rom_path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Failed to load ROM {}: {}", rom_path, e);
            std::process::exit(1);
        }
    };

    println!("A2Core v{} ({:?})", env!("CARGO_PKG_VERSION"), cpu_type);

    let mut machine = Machine::new(cpu_type);
    machine.load_rom(&rom_data);
    let disk_rom_path = args.disk_rom.clone().or_else(|| config.disk_rom_path.clone());
    load_disk_rom(&mut machine, disk_rom_path.as_deref());

    let publisher = StatePublisher::new();
    let mut scheduler = Scheduler::new(machine, publisher.clone());
    scheduler.set_speed(if args.uncapped { Speed::Uncapped } else { config.speed });
    scheduler.set_snapshot_interval(config.snapshot_interval_frames);

    // セーブステートから再開
    let restored = match &args.load_state {
        Some(path) => match SaveState::load_from(path) {
            Ok(state) => match scheduler.machine.restore_state(&state) {
                Ok(()) => {
                    log::info!("Restored state from {:?}", path);
                    true
                }
                Err(e) => {
                    eprintln!("Failed to restore {:?}: {}", path, e);
                    false
                }
            },
            Err(e) => {
                eprintln!("Failed to read {:?}: {}", path, e);
                false
            }
        },
        None => false,
    };

    // ディスクをロード
    let mut disk_paths: [Option<String>; DRIVE_COUNT] = [None, None];
    for (drive, path) in disk_sources(&args, &config, restored).into_iter().enumerate() {
        let Some(path) = path else {
            continue;
        };
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("Failed to read disk {} {}: {}", drive + 1, path, e);
                continue;
            }
        };
        let name = Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        match scheduler.handle(Command::LoadDisk { drive, name, data }) {
            Some(Response::Failed(e)) => eprintln!("Failed to load disk {}: {}", drive + 1, e),
            _ => {
                log::info!("Loaded disk {}: {}", drive + 1, path);
                config.set_last_disk(drive, &path);
                disk_paths[drive] = Some(path);
            }
        }
    }

    for address in &args.breakpoints {
        scheduler.handle(Command::SetBreakpoint(*address));
    }

    // 復元できなければコールドブート
    if restored {
        scheduler.set_state(RunState::Paused);
        scheduler.handle(Command::Run);
    } else {
        scheduler.handle(Command::Boot);
    }

    let (tx, rx) = mpsc::channel();
    let (resp_tx, resp_rx) = mpsc::channel();
    let worker = thread::spawn(move || scheduler.run(rx, resp_tx));

    let start = Instant::now();
    let start_cycles = publisher.latest().cycle_count;
    let mut last_report = Instant::now();
    loop {
        thread::sleep(Duration::from_millis(10));
        let state = publisher.latest();
        if let Some(target) = args.cycles {
            if state.cycle_count.saturating_sub(start_cycles) >= target {
                break;
            }
        }
        if state.run_state == RunState::Paused {
            println!("Stopped at ${:04X}", state.registers.pc);
            break;
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            log::info!(
                "PC=${:04X} cycles={} speed={:.2}",
                state.registers.pc,
                state.cycle_count,
                state.speed
            );
            last_report = Instant::now();
        }
    }

    if tx.send(Command::Pause).is_err() {
        log::warn!("Scheduler exited early");
    }

    if let Some(path) = &args.save_state {
        if tx.send(Command::GetSaveState).is_ok() {
            match resp_rx.recv() {
                Ok(Response::SaveState(state)) => match state.save_to(path) {
                    Ok(()) => println!("Saved state to {:?}", path),
                    Err(e) => eprintln!("Failed to save state: {}", e),
                },
                Ok(other) => eprintln!("Unexpected response: {:?}", other),
                Err(e) => eprintln!("No save state received: {}", e),
            }
        }
    }

    if args.write_back {
        let drives = publisher.latest().drives.clone();
        for (drive, status) in drives.iter().enumerate() {
            let (Some(original), true) = (&disk_paths[drive], status.dirty) else {
                continue;
            };
            if tx.send(Command::SaveDisk(drive)).is_err() {
                break;
            }
            match resp_rx.recv() {
                Ok(Response::DiskImage { file_name, data, .. }) => {
                    let target = Path::new(original).with_file_name(&file_name);
                    match fs::write(&target, data) {
                        Ok(()) => {
                            println!("Wrote disk {} to {:?}", drive + 1, target);
                            config.set_last_disk(drive, &target.to_string_lossy());
                        }
                        Err(e) => eprintln!("Failed to write {:?}: {}", target, e),
                    }
                }
                Ok(Response::Failed(e)) => eprintln!("Failed to save disk {}: {}", drive + 1, e),
                Ok(other) => eprintln!("Unexpected response: {:?}", other),
                Err(e) => eprintln!("No disk image received: {}", e),
            }
        }
    }

    drop(tx);
    if worker.join().is_err() {
        eprintln!("Scheduler thread panicked");
    }

    let state = publisher.latest();
    let elapsed = start.elapsed();
    let cycles = state.cycle_count.saturating_sub(start_cycles);
    let mhz = cycles as f64 / elapsed.as_secs_f64() / 1_000_000.0;
    println!("Executed {} cycles in {:?} ({:.2} MHz effective)", cycles, elapsed, mhz);
    println!("Final PC: ${:04X}", state.registers.pc);

    if let Err(e) = config.save_to(&config_path) {
        log::warn!("Failed to save config: {}", e);
    }
}
