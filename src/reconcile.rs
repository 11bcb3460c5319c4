//! Optimistic bead counter state.
//!
//! The number shown to the user is the last server-confirmed total plus
//! whatever is on its way to the server plus whatever has been clicked since.
//! At most one batch is in flight; clicks made while it travels accumulate in
//! `pending` and go out in the next batch. A failed batch is folded back
//! into `pending` so no click is ever lost.

use crate::models::CounterTotals;
use crate::progress::BEADS_PER_ROUND;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increment,
    Decrement,
}

impl Direction {
    fn delta(self) -> i64 {
        match self {
            Direction::Increment => 1,
            Direction::Decrement => -1,
        }
    }
}

/// A net delta handed to the server in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub id: u64,
    pub delta: i64,
}

impl Batch {
    /// The endpoint and bead count this batch maps to.
    pub fn request(&self) -> (Direction, u64) {
        let count = self.delta.unsigned_abs();
        if self.delta >= 0 {
            (Direction::Increment, count)
        } else {
            (Direction::Decrement, count)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickOutcome {
    pub accepted: bool,
    pub display: u64,
    pub round_completed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    confirmed: Option<u64>,
    pending: i64,
    in_flight: Option<Batch>,
    totals: Option<CounterTotals>,
    next_batch: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display(&self) -> u64 {
        let base = self.confirmed.unwrap_or(0) as i64;
        let in_flight = self.in_flight.map_or(0, |batch| batch.delta);
        (base + in_flight + self.pending).max(0) as u64
    }

    pub fn confirmed(&self) -> Option<u64> {
        self.confirmed
    }

    pub fn pending(&self) -> i64 {
        self.pending
    }

    pub fn in_flight(&self) -> Option<Batch> {
        self.in_flight
    }

    pub fn totals(&self) -> Option<CounterTotals> {
        self.totals
    }

    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.in_flight.is_none()
    }

    /// Records one click. A decrement is refused when the shown total is
    /// already zero.
    pub fn apply(&mut self, direction: Direction) -> ClickOutcome {
        let before = self.display();
        if direction == Direction::Decrement && before == 0 {
            return ClickOutcome {
                accepted: false,
                display: 0,
                round_completed: false,
            };
        }

        self.pending += direction.delta();
        let display = self.display();
        ClickOutcome {
            accepted: true,
            display,
            round_completed: direction == Direction::Increment
                && display > 0
                && display % BEADS_PER_ROUND == 0,
        }
    }

    /// Takes a server figure from a plain fetch. Ignored while a batch is in
    /// flight because the batch answer will be newer.
    pub fn load(&mut self, today_beads: u64) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.confirmed = Some(today_beads);
        true
    }

    pub fn take_batch(&mut self) -> Option<Batch> {
        if self.in_flight.is_some() || self.pending == 0 {
            return None;
        }
        self.next_batch += 1;
        let batch = Batch {
            id: self.next_batch,
            delta: std::mem::take(&mut self.pending),
        };
        self.in_flight = Some(batch);
        Some(batch)
    }

    pub fn confirm(&mut self, batch_id: u64, totals: CounterTotals) -> bool {
        match self.in_flight {
            Some(batch) if batch.id == batch_id => {
                self.in_flight = None;
                self.confirmed = Some(totals.today_beads);
                self.totals = Some(totals);
                true
            }
            _ => false,
        }
    }

    pub fn reject(&mut self, batch_id: u64) -> bool {
        match self.in_flight {
            Some(batch) if batch.id == batch_id => {
                self.in_flight = None;
                self.pending += batch.delta;
                true
            }
            _ => false,
        }
    }
}
