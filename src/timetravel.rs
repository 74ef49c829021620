//! タイムトラベル用スナップショットリング
//!
//! セーブステートを最大 60 個保持する。
//! `save_index` は最後に書き込んだスロット、`temp_index` は現在表示中のスロット。
//! 過去に戻っている間に新しいスナップショットを書くと、読み出し位置も先頭へ戻る。

use crate::savestate::SaveState;

/// 保持するスナップショット数
pub const RING_CAPACITY: usize = 60;

pub struct SnapshotRing {
    slots: Vec<Option<SaveState>>,
    save_index: usize,
    temp_index: usize,
    /// 自動スナップショットの間隔（フレーム数、0 で無効）
    pub interval: u32,
    frame_counter: u32,
}

impl Default for SnapshotRing {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SnapshotRing {
    pub fn new(interval: u32) -> Self {
        SnapshotRing {
            slots: vec![None; RING_CAPACITY],
            save_index: 0,
            temp_index: 0,
            interval,
            frame_counter: 0,
        }
    }

    /// フレーム完了の通知。自動スナップショットを取るべきなら true
    pub fn tick_frame(&mut self) -> bool {
        if self.interval == 0 {
            return false;
        }
        self.frame_counter += 1;
        if self.frame_counter >= self.interval {
            self.frame_counter = 0;
            true
        } else {
            false
        }
    }

    /// 書き込み位置を進めて保存し、読み出し位置を合わせる
    pub fn push(&mut self, state: SaveState) {
        self.save_index = (self.save_index + 1) % RING_CAPACITY;
        self.temp_index = self.save_index;
        self.slots[self.save_index] = Some(state);
    }

    fn previous(&self) -> usize {
        (self.temp_index + RING_CAPACITY - 1) % RING_CAPACITY
    }

    fn next(&self) -> usize {
        (self.temp_index + 1) % RING_CAPACITY
    }

    /// 1つ前のスナップショットへ
    ///
    /// 最新位置から初めて戻るときは `current` を最新スロットに記録し、
    /// あとで `step_forward` で戻って来られるようにする。
    pub fn step_backward(&mut self, current: SaveState) -> Option<&SaveState> {
        if self.temp_index == self.save_index {
            self.slots[self.save_index] = Some(current);
        }
        if !self.can_go_back() {
            log::debug!("Time travel: no older snapshot");
            return None;
        }
        self.temp_index = self.previous();
        self.slots[self.temp_index].as_ref()
    }

    /// 1つ後のスナップショットへ
    pub fn step_forward(&mut self) -> Option<&SaveState> {
        if !self.can_go_forward() {
            log::debug!("Time travel: already at the newest snapshot");
            return None;
        }
        self.temp_index = self.next();
        self.slots[self.temp_index].as_ref()
    }

    pub fn can_go_back(&self) -> bool {
        let prev = self.previous();
        prev != self.save_index && self.slots[prev].is_some()
    }

    pub fn can_go_forward(&self) -> bool {
        self.temp_index != self.save_index && self.slots[self.next()].is_some()
    }

    /// 指定スロットへ直接移動（空スロットは無視）
    pub fn jump_to(&mut self, index: usize) -> Option<&SaveState> {
        if !self.slots.get(index).is_some_and(Option::is_some) {
            log::debug!("Time travel: slot {} is empty", index);
            return None;
        }
        self.temp_index = index;
        self.slots[index].as_ref()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.save_index = 0;
        self.temp_index = 0;
        self.frame_counter = 0;
    }

    pub fn temp_index(&self) -> usize {
        self.temp_index
    }

    pub fn save_index(&self) -> usize {
        self.save_index
    }

    /// 保存済みスナップショット数
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}
