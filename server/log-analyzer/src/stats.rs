//! Sliding-window rate counters: totals, windowed rates, and peaks per label.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Increments within this span of a slot's first increment share the slot.
const SLOT_GRANULARITY: Duration = Duration::from_millis(1);

/// Coalesced increments. A slot stays in the window until its newest
/// increment leaves it, so no increment is dropped early; the oldest ones in
/// a slot may be counted for up to `SLOT_GRANULARITY` past the window.
#[derive(Debug, Clone, Copy)]
struct Slot {
  first: Instant,
  last: Instant,
  count: u64,
}

/// Per-label counter. `total` only grows; `peak` only grows.
#[derive(Debug, Clone)]
pub struct RateCounter {
  window: Duration,
  /// Oldest first.
  slots: VecDeque<Slot>,
  total: u64,
  peak: u64,
}

impl RateCounter {
  pub fn new(window: Duration) -> Self {
    Self {
      window,
      slots: VecDeque::new(),
      total: 0,
      peak: 0,
    }
  }

  /// Record one event at `now`.
  pub fn incr_at(&mut self, now: Instant) {
    self.total += 1;
    self.prune(now);
    if let Some(slot) = self.slots.back_mut() {
      if now.saturating_duration_since(slot.first) < SLOT_GRANULARITY {
        slot.last = slot.last.max(now);
        slot.count += 1;
        return;
      }
    }
    self.slots.push_back(Slot {
      first: now,
      last: now,
      count: 1,
    });
  }

  /// Increments whose slot's newest increment falls within `[now - window, now]`.
  pub fn rate_at(&self, now: Instant) -> u64 {
    match now.checked_sub(self.window) {
      Some(cutoff) => self
        .slots
        .iter()
        .rev()
        .take_while(|slot| slot.last >= cutoff)
        .map(|slot| slot.count)
        .sum(),
      None => self.slots.iter().map(|slot| slot.count).sum(),
    }
  }

  /// Fold the current rate into `peak`. Returns the rate observed.
  pub fn snapshot_at(&mut self, now: Instant) -> u64 {
    self.prune(now);
    let rate = self.rate_at(now);
    self.peak = self.peak.max(rate);
    rate
  }

  pub fn total(&self) -> u64 {
    self.total
  }

  pub fn peak(&self) -> u64 {
    self.peak
  }

  fn prune(&mut self, now: Instant) {
    let Some(cutoff) = now.checked_sub(self.window) else {
      return;
    };
    while let Some(slot) = self.slots.front() {
      if slot.last >= cutoff {
        break;
      }
      self.slots.pop_front();
    }
  }
}

/// Label -> counter. Entries appear on first observation.
#[derive(Debug, Clone)]
pub struct CounterSet {
  window: Duration,
  counters: HashMap<String, RateCounter>,
}

impl CounterSet {
  pub fn new(window: Duration) -> Self {
    Self {
      window,
      counters: HashMap::new(),
    }
  }

  pub fn incr_at(&mut self, label: &str, now: Instant) {
    if let Some(counter) = self.counters.get_mut(label) {
      counter.incr_at(now);
      return;
    }
    let mut counter = RateCounter::new(self.window);
    counter.incr_at(now);
    self.counters.insert(label.to_string(), counter);
  }

  pub fn snapshot_at(&mut self, now: Instant) {
    for counter in self.counters.values_mut() {
      counter.snapshot_at(now);
    }
  }

  pub fn get(&self, label: &str) -> Option<&RateCounter> {
    self.counters.get(label)
  }

  /// Zero for labels never observed.
  pub fn rate_at(&self, label: &str, now: Instant) -> u64 {
    self.get(label).map_or(0, |c| c.rate_at(now))
  }

  pub fn total(&self, label: &str) -> u64 {
    self.get(label).map_or(0, RateCounter::total)
  }

  /// Sum of every label's total.
  pub fn grand_total(&self) -> u64 {
    self.counters.values().map(RateCounter::total).sum()
  }

  pub fn len(&self) -> usize {
    self.counters.len()
  }

  pub fn is_empty(&self) -> bool {
    self.counters.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &RateCounter)> {
    self.counters.iter().map(|(k, v)| (k.as_str(), v))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const W: Duration = Duration::from_secs(1);

  #[test]
  fn burst_in_one_instant_counts_fully() {
    let t0 = Instant::now();
    let mut c = RateCounter::new(W);
    for _ in 0..7 {
      c.incr_at(t0);
    }
    assert_eq!(c.rate_at(t0), 7);
    assert_eq!(c.total(), 7);
  }

  #[test]
  fn rate_drops_to_zero_after_window() {
    let t0 = Instant::now();
    let mut c = RateCounter::new(W);
    for _ in 0..4 {
      c.incr_at(t0);
    }
    let later = t0 + W + Duration::from_millis(1);
    assert_eq!(c.rate_at(later), 0);
    assert_eq!(c.total(), 4, "total never decreases");
  }

  #[test]
  fn window_is_inclusive_of_its_start() {
    let t0 = Instant::now();
    let mut c = RateCounter::new(W);
    c.incr_at(t0);
    assert_eq!(c.rate_at(t0 + W), 1);
  }

  #[test]
  fn only_recent_events_count() {
    let t0 = Instant::now();
    let mut c = RateCounter::new(W);
    c.incr_at(t0);
    c.incr_at(t0 + Duration::from_millis(600));
    c.incr_at(t0 + Duration::from_millis(1200));
    assert_eq!(c.rate_at(t0 + Duration::from_millis(1300)), 2);
    assert_eq!(c.total(), 3);
  }

  #[test]
  fn coalesced_increments_never_expire_early() {
    let t0 = Instant::now();
    let mut c = RateCounter::new(W);
    c.incr_at(t0);
    c.incr_at(t0 + Duration::from_micros(900));

    // The later increment is still inside the window, so its slot is counted.
    let edge = t0 + W + Duration::from_micros(500);
    assert!(c.rate_at(edge) >= 1);
    assert_eq!(c.rate_at(edge), 2, "slot expires with its newest increment");

    let past = t0 + W + Duration::from_micros(901);
    assert_eq!(c.rate_at(past), 0);
  }

  #[test]
  fn peak_tracks_max_of_snapshots() {
    let t0 = Instant::now();
    let mut c = RateCounter::new(W);
    for _ in 0..5 {
      c.incr_at(t0);
    }
    assert_eq!(c.snapshot_at(t0), 5);
    assert_eq!(c.peak(), 5);

    // Quiet period does not lower the peak.
    let quiet = t0 + Duration::from_secs(3);
    assert_eq!(c.snapshot_at(quiet), 0);
    assert_eq!(c.peak(), 5);

    // A smaller burst leaves it alone; a larger one raises it.
    c.incr_at(quiet);
    c.snapshot_at(quiet);
    assert_eq!(c.peak(), 5);
    for _ in 0..9 {
      c.incr_at(quiet);
    }
    c.snapshot_at(quiet);
    assert_eq!(c.peak(), 10);
  }

  #[test]
  fn slots_are_bounded_by_window() {
    let t0 = Instant::now();
    let mut c = RateCounter::new(W);
    for ms in 0..5_000u64 {
      c.incr_at(t0 + Duration::from_millis(ms));
    }
    assert!(c.slots.len() <= 1_001, "slots: {}", c.slots.len());
    assert_eq!(c.total(), 5_000);
  }

  #[test]
  fn counter_set_creates_labels_lazily() {
    let t0 = Instant::now();
    let mut set = CounterSet::new(W);
    assert!(set.is_empty());
    assert_eq!(set.rate_at("ERROR", t0), 0);

    set.incr_at("ERROR", t0);
    set.incr_at("ERROR", t0);
    set.incr_at("INFO", t0);

    assert_eq!(set.len(), 2);
    assert_eq!(set.total("ERROR"), 2);
    assert_eq!(set.rate_at("ERROR", t0), 2);
    assert_eq!(set.total("INFO"), 1);
    assert_eq!(set.grand_total(), 3);
  }

  #[test]
  fn counter_set_snapshot_updates_every_peak() {
    let t0 = Instant::now();
    let mut set = CounterSet::new(W);
    set.incr_at("a", t0);
    set.incr_at("b", t0);
    set.incr_at("b", t0);
    set.snapshot_at(t0);
    assert_eq!(set.get("a").unwrap().peak(), 1);
    assert_eq!(set.get("b").unwrap().peak(), 2);
  }
}
