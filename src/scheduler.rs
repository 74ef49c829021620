//! 実行スケジューラ
//!
//! 約 16.69ms ごとに 1 フレーム（17030 サイクル）を実行し、
//! 2 フレームに 1 回入力をポーリングして `MachineState` を公開する。
//! UI 側からの操作はすべて `Command` として `handle` に渡す。

use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cpu::{flags, MemoryBus, Registers, OPCODE_JSR};
use crate::debugger::Breakpoint;
use crate::drive::{DriveEvent, DriveStatus, DRIVE_COUNT};
use crate::machine::{Machine, Step};
use crate::savestate::SaveState;
use crate::softswitch::Switch;
use crate::timetravel::SnapshotRing;

/// 1フレームのサイクル数（262ライン × 65サイクル）
pub const CYCLES_PER_FRAME: u32 = 17_030;
/// 通常速度のフレーム間隔（17030 / 1020.488 kHz）
pub const NORMAL_REFRESH: Duration = Duration::from_nanos(16_688_100);

/// 実行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Idle,
    NeedBoot,
    NeedReset,
    Running,
    Paused,
}

/// 速度モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    #[default]
    Normal,
    /// ウェイトなし
    Uncapped,
}

impl Speed {
    pub fn refresh(self) -> Duration {
        match self {
            Speed::Normal => NORMAL_REFRESH,
            Speed::Uncapped => Duration::ZERO,
        }
    }
}

/// 書き換え可能なレジスタ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Pc,
    A,
    X,
    Y,
    Sp,
    /// ステータスの1ビット（`cpu::flags` のマスク）
    Flag(u8),
}

/// UI からの操作
#[derive(Debug, Clone)]
pub enum Command {
    Boot,
    Reset,
    Run,
    Pause,
    StepInto,
    StepOver,
    StepOut,
    RunToAddress(u16),
    SetBreakpoint(u16),
    ClearBreakpoint(u16),
    ToggleBreakpoint(u16),
    /// 逆アセンブル表示の先頭（-2..=0xFFFF のみ受け付ける）
    SetDisassemblyAddress(i32),
    SetSpeed(Speed),
    LoadDisk {
        drive: usize,
        name: String,
        data: Vec<u8>,
    },
    EjectDisk(usize),
    SaveDisk(usize),
    RequestSnapshot,
    GetSaveState,
    RestoreState(Box<SaveState>),
    TimeTravelBackward,
    TimeTravelForward,
    TimeTravelIndex(usize),
    /// 一時停止中のみ有効
    SetRegister(Register, u16),
    KeyPress(u8),
    Button {
        index: usize,
        pressed: bool,
    },
    SetBinaryBlock {
        address: u16,
        data: Vec<u8>,
    },
}

/// データを返すコマンドの応答
#[derive(Debug, Clone)]
pub enum Response {
    SaveState(Box<SaveState>),
    DiskImage {
        drive: usize,
        file_name: String,
        data: Vec<u8>,
    },
    Failed(String),
}

/// UI へ公開するマシンの状態
#[derive(Debug, Clone, Default, Serialize)]
pub struct MachineState {
    pub run_state: RunState,
    /// 実測速度（1.0 = 実機）
    pub speed: f64,
    pub speed_mode: Speed,
    pub cycle_count: u64,
    pub registers: Registers,
    pub breakpoints: Vec<Breakpoint>,
    pub disassembly_address: i32,
    pub can_go_backward: bool,
    pub can_go_forward: bool,
    pub temp_index: usize,
    pub drives: Vec<DriveStatus>,
    /// 前回の公開以降のドライブイベント（ドライブ音用）
    pub drive_events: Vec<DriveEvent>,
    pub text: bool,
    pub hires: bool,
    pub page2: bool,
    pub mixed: bool,
    pub col80: bool,
    pub alt_charset: bool,
    pub button0: bool,
    pub button1: bool,
}

/// 公開状態の受け渡し
///
/// 書き込み側は毎回新しい `Arc` に差し替え、読み出し側は `Arc` を複製して持つ。
#[derive(Clone, Default)]
pub struct StatePublisher {
    inner: Arc<RwLock<Arc<MachineState>>>,
}

impl StatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, state: MachineState) {
        let state = Arc::new(state);
        match self.inner.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    pub fn latest(&self) -> Arc<MachineState> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

/// 入力デバイスの状態（PB0-PB2）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub buttons: [bool; 3],
}

/// ゲームパッドなどの入力源。2フレームに1回ポーリングされる
pub trait InputSource: Send {
    /// 変化がなければ None
    fn poll(&mut self) -> Option<InputState>;
}

pub struct Scheduler {
    pub machine: Machine,
    ring: SnapshotRing,
    state: RunState,
    speed_mode: Speed,
    refresh: Duration,
    prev_time: Instant,
    start_time: Instant,
    refresh_count: u64,
    speed: f64,
    snapshot_requested: bool,
    disassembly_address: i32,
    buttons: [bool; 3],
    pending_events: Vec<DriveEvent>,
    publisher: StatePublisher,
    input: Option<Box<dyn InputSource>>,
}

impl Scheduler {
    pub fn new(machine: Machine, publisher: StatePublisher) -> Self {
        let now = Instant::now();
        Scheduler {
            machine,
            ring: SnapshotRing::default(),
            state: RunState::Idle,
            speed_mode: Speed::Normal,
            refresh: NORMAL_REFRESH,
            prev_time: now,
            start_time: now,
            refresh_count: 0,
            speed: 0.0,
            snapshot_requested: false,
            disassembly_address: -1,
            buttons: [false; 3],
            pending_events: Vec::new(),
            publisher,
            input: None,
        }
    }

    pub fn set_input(&mut self, input: Box<dyn InputSource>) {
        self.input = Some(input);
    }

    /// 自動スナップショットの間隔（フレーム数、0 で無効）
    pub fn set_snapshot_interval(&mut self, frames: u32) {
        self.ring.interval = frames;
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn ring(&self) -> &SnapshotRing {
        &self.ring
    }

    pub fn set_speed(&mut self, speed: Speed) {
        self.speed_mode = speed;
        self.refresh = speed.refresh();
        self.reset_refresh_counter(Instant::now());
    }

    fn reset_refresh_counter(&mut self, now: Instant) {
        self.refresh_count = 0;
        self.prev_time = now;
        self.start_time = now;
    }

    /// 実行状態を変更する。一時停止/再開はドライブにも伝える
    pub fn set_state(&mut self, state: RunState) {
        if state == RunState::Running && self.state == RunState::Paused {
            self.machine.resume();
        }
        self.state = state;
        if matches!(state, RunState::Paused | RunState::Running) {
            self.machine.disk.pause(state == RunState::Running);
        }
        self.reset_refresh_counter(Instant::now());
        self.publish();
    }

    /// 1フレームを実行する。実行した場合は true
    pub fn tick(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.prev_time) < self.refresh {
            return false;
        }
        self.prev_time = now;
        match self.state {
            RunState::Idle | RunState::Paused => return false,
            RunState::NeedBoot => {
                self.boot();
                self.set_state(RunState::Running);
            }
            RunState::NeedReset => {
                self.reset();
                self.set_state(RunState::Running);
            }
            RunState::Running => {}
        }

        let mut cycle_total = 0u32;
        let frame_done = loop {
            match self.machine.process_instruction(false) {
                Step::Halted => {
                    self.set_state(RunState::Paused);
                    break false;
                }
                Step::Cycles(cycles) => {
                    cycle_total += cycles;
                    if cycle_total >= CYCLES_PER_FRAME {
                        break true;
                    }
                }
            }
        };

        self.refresh_count += 1;
        let elapsed_ms = now.saturating_duration_since(self.start_time).as_secs_f64() * 1000.0;
        if elapsed_ms > 0.0 {
            self.speed = (self.refresh_count as f64 * 1703.0 / elapsed_ms).round() / 100.0;
        }
        if self.refresh_count % 2 == 1 {
            self.poll_input();
            self.publish();
        }

        // 途中で止まったフレームは間隔に数えない
        let interval_due = frame_done && self.ring.tick_frame();
        if std::mem::take(&mut self.snapshot_requested) || interval_due {
            self.ring.push(self.machine.save_state());
        }
        true
    }

    fn boot(&mut self) {
        self.machine.boot();
        self.apply_buttons();
    }

    fn reset(&mut self) {
        self.machine.reset();
        self.apply_buttons();
    }

    fn apply_buttons(&mut self) {
        for (i, &pressed) in self.buttons.iter().enumerate() {
            self.machine.memory.set_button(i, pressed);
        }
    }

    fn poll_input(&mut self) {
        if let Some(input) = self.input.as_mut().and_then(|source| source.poll()) {
            self.buttons = input.buttons;
            self.apply_buttons();
        }
    }

    /// 停止状態からのステップはブートしてから行う
    fn boot_if_idle(&mut self) {
        if self.state == RunState::Idle {
            self.boot();
            self.state = RunState::Paused;
        }
    }

    pub fn step_into(&mut self) {
        self.boot_if_idle();
        self.machine.process_instruction(true);
        self.set_state(RunState::Paused);
    }

    /// JSR ならサブルーチンに入ってからステップアウト、それ以外は1命令
    pub fn step_over(&mut self) {
        self.boot_if_idle();
        let pc = self.machine.cpu.regs.pc;
        if self.machine.read(pc) == OPCODE_JSR {
            self.machine.process_instruction(true);
            self.step_out();
        } else {
            self.step_into();
        }
    }

    pub fn step_out(&mut self) {
        self.boot_if_idle();
        let sp = self.machine.cpu.regs.sp;
        self.machine.debugger.arm_step_out(sp);
        self.set_state(RunState::Running);
    }

    pub fn time_travel_backward(&mut self) {
        self.set_state(RunState::Paused);
        let current = self.machine.save_state();
        if let Some(state) = self.ring.step_backward(current) {
            if let Err(e) = self.machine.restore_state(state) {
                log::warn!("Time travel restore failed: {}", e);
            }
        }
        self.publish();
    }

    pub fn time_travel_forward(&mut self) {
        self.set_state(RunState::Paused);
        if let Some(state) = self.ring.step_forward() {
            if let Err(e) = self.machine.restore_state(state) {
                log::warn!("Time travel restore failed: {}", e);
            }
        }
        self.publish();
    }

    fn time_travel_index(&mut self, index: usize) {
        self.set_state(RunState::Paused);
        if let Some(state) = self.ring.jump_to(index) {
            if let Err(e) = self.machine.restore_state(state) {
                log::warn!("Time travel restore failed: {}", e);
            }
        }
        self.publish();
    }

    fn set_register(&mut self, register: Register, value: u16) {
        if self.state != RunState::Paused {
            log::debug!("Ignoring register change while {:?}", self.state);
            return;
        }
        let regs = &mut self.machine.cpu.regs;
        match register {
            Register::Pc => regs.pc = value,
            Register::A => regs.a = value as u8,
            Register::X => regs.x = value as u8,
            Register::Y => regs.y = value as u8,
            Register::Sp => regs.sp = value as u8,
            Register::Flag(mask) => regs.set_flag(mask, value != 0),
        }
        regs.set_flag(flags::UNUSED, true);
        self.publish();
    }

    /// コマンドを処理する。データを返すものは `Some(Response)`
    pub fn handle(&mut self, command: Command) -> Option<Response> {
        match command {
            Command::Boot => self.set_state(RunState::NeedBoot),
            Command::Reset => self.set_state(RunState::NeedReset),
            Command::Run => {
                let next = if self.state == RunState::Idle {
                    RunState::NeedBoot
                } else {
                    RunState::Running
                };
                self.set_state(next);
            }
            Command::Pause => {
                if self.state != RunState::Idle {
                    self.set_state(RunState::Paused);
                }
            }
            Command::StepInto => self.step_into(),
            Command::StepOver => self.step_over(),
            Command::StepOut => self.step_out(),
            Command::RunToAddress(address) => {
                self.machine.debugger.run_to(address);
                self.handle(Command::Run);
            }
            Command::SetBreakpoint(address) => {
                self.machine.debugger.add_breakpoint(address);
                self.publish();
            }
            Command::ClearBreakpoint(address) => {
                self.machine.debugger.remove_breakpoint(address);
                self.publish();
            }
            Command::ToggleBreakpoint(address) => {
                self.machine.debugger.toggle_breakpoint(address);
                self.publish();
            }
            Command::SetDisassemblyAddress(address) => {
                if (-2..=0xFFFF).contains(&address) {
                    self.disassembly_address = address;
                    self.publish();
                }
            }
            Command::SetSpeed(speed) => self.set_speed(speed),
            Command::LoadDisk { drive, name, data } => {
                if let Err(e) = self.machine.disk.insert(drive, &name, data) {
                    log::warn!("Failed to load {}: {}", name, e);
                    return Some(Response::Failed(e.to_string()));
                }
                self.publish();
            }
            Command::EjectDisk(drive) => {
                if let Err(e) = self.machine.disk.eject(drive) {
                    return Some(Response::Failed(e.to_string()));
                }
                self.publish();
            }
            Command::SaveDisk(drive) => {
                let response = match self.machine.disk.save(drive) {
                    Some((file_name, data)) => Response::DiskImage {
                        drive,
                        file_name,
                        data,
                    },
                    None => Response::Failed(format!("No disk in drive {}", drive + 1)),
                };
                self.publish();
                return Some(response);
            }
            Command::RequestSnapshot => self.snapshot_requested = true,
            Command::GetSaveState => {
                return Some(Response::SaveState(Box::new(self.machine.save_state())));
            }
            Command::RestoreState(state) => {
                if let Err(e) = self.machine.restore_state(&state) {
                    log::warn!("Failed to restore state: {}", e);
                    return Some(Response::Failed(e.to_string()));
                }
                self.publish();
            }
            Command::TimeTravelBackward => self.time_travel_backward(),
            Command::TimeTravelForward => self.time_travel_forward(),
            Command::TimeTravelIndex(index) => self.time_travel_index(index),
            Command::SetRegister(register, value) => self.set_register(register, value),
            Command::KeyPress(key) => self.machine.memory.set_key(key),
            Command::Button { index, pressed } => {
                if let Some(button) = self.buttons.get_mut(index) {
                    *button = pressed;
                    self.machine.memory.set_button(index, pressed);
                }
            }
            Command::SetBinaryBlock { address, data } => {
                self.machine.memory.set_binary_block(address, &data);
            }
        }
        None
    }

    /// 現在の状態を組み立てる（溜まったドライブイベントを含む）
    pub fn snapshot_state(&mut self) -> MachineState {
        self.pending_events.extend(self.machine.disk.take_events());
        let sw = &self.machine.memory.switches;
        MachineState {
            run_state: self.state,
            speed: self.speed,
            speed_mode: self.speed_mode,
            cycle_count: self.machine.cycle_count,
            registers: self.machine.cpu.regs.clone(),
            breakpoints: self.machine.debugger.breakpoints().cloned().collect(),
            disassembly_address: self.disassembly_address,
            can_go_backward: self.ring.can_go_back(),
            can_go_forward: self.ring.can_go_forward(),
            temp_index: self.ring.temp_index(),
            drives: (0..DRIVE_COUNT)
                .filter_map(|d| self.machine.disk.status(d))
                .collect(),
            drive_events: std::mem::take(&mut self.pending_events),
            text: sw.is_set(Switch::Text),
            hires: sw.is_set(Switch::Hires),
            page2: sw.is_set(Switch::Page2),
            mixed: sw.is_set(Switch::Mixed),
            col80: sw.is_set(Switch::Col80),
            alt_charset: sw.is_set(Switch::AltCharSet),
            button0: sw.is_set(Switch::Pb0),
            button1: sw.is_set(Switch::Pb1),
        }
    }

    pub fn publish(&mut self) {
        let state = self.snapshot_state();
        self.publisher.publish(state);
    }

    /// コマンドを受け取りながら実行を続ける（送信側が切断されたら終了）
    pub fn run(&mut self, commands: Receiver<Command>, responses: Sender<Response>) {
        log::info!("Scheduler started");
        loop {
            loop {
                match commands.try_recv() {
                    Ok(command) => {
                        if let Some(response) = self.handle(command) {
                            if responses.send(response).is_err() {
                                log::debug!("Response receiver dropped");
                            }
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        log::info!("Scheduler stopped");
                        return;
                    }
                }
            }
            if !self.tick(Instant::now()) {
                let idle = matches!(self.state, RunState::Idle | RunState::Paused);
                thread::sleep(Duration::from_millis(if idle { 20 } else { 1 }));
            }
        }
    }
}
