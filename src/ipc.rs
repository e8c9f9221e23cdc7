use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex as RawMutex, signal::Signal};
use embassy_time::{with_deadline, Instant};

use crate::config::MOTOR_NB;

type Slot = Signal<RawMutex, u16>;

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: Slot = Signal::new();

/* ───── Position mailbox ────────────────────────────────────────────── */

/// One reply slot per motor. The servo bus fills a slot when a position
/// reply for that motor arrives; the refresh path awaits the slots.
///
/// Delivery may happen from inside `request_position` itself (synchronous
/// drivers) or later from another task.
pub struct PositionMailbox {
    ids: [u8; MOTOR_NB],
    slots: [Slot; MOTOR_NB],
}

impl PositionMailbox {
    pub const fn new(ids: [u8; MOTOR_NB]) -> Self {
        Self {
            ids,
            slots: [EMPTY_SLOT; MOTOR_NB],
        }
    }

    pub fn ids(&self) -> &[u8; MOTOR_NB] {
        &self.ids
    }

    fn index_of(&self, id: u8) -> Option<usize> {
        self.ids.iter().position(|&m| m == id)
    }

    /// Stores a reply for motor `id`. Returns `false` for ids this mailbox
    /// does not know; a second reply before the slot is taken replaces the first.
    pub fn deliver(&self, id: u8, raw: u16) -> bool {
        match self.index_of(id) {
            Some(i) => {
                self.slots[i].signal(raw);
                true
            }
            None => false,
        }
    }

    /// Empties every slot. Called at the start of each refresh cycle.
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.reset();
        }
    }

    pub fn try_take(&self, index: usize) -> Option<u16> {
        self.slots.get(index).and_then(|s| s.try_take())
    }

    /// Waits for motor `index`'s reply until `deadline`.
    pub async fn wait_until(&self, index: usize, deadline: Instant) -> Option<u16> {
        let slot = self.slots.get(index)?;
        if let Some(v) = slot.try_take() {
            return Some(v);
        }
        with_deadline(deadline, slot.wait()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MOTOR_IDS;
    use embassy_futures::block_on;
    use embassy_time::Duration;

    #[test]
    fn delivery_routes_by_id() {
        let mb = PositionMailbox::new([10, 11, 12, 13, 14, 15, 16, 17, 18, 19]);
        assert!(mb.deliver(12, 512));
        assert!(!mb.deliver(3, 1));
        assert_eq!(mb.try_take(2), Some(512));
        assert_eq!(mb.try_take(2), None);
        assert_eq!(mb.try_take(99), None);
    }

    #[test]
    fn reset_drops_stale_replies() {
        let mb = PositionMailbox::new(MOTOR_IDS);
        mb.deliver(0, 100);
        mb.reset();
        assert_eq!(mb.try_take(0), None);
    }

    #[test]
    fn wait_returns_delivered_value_or_gives_up() {
        block_on(async {
            let mb = PositionMailbox::new(MOTOR_IDS);
            mb.deliver(4, 700);
            let deadline = Instant::now() + Duration::from_millis(5);
            assert_eq!(mb.wait_until(4, deadline).await, Some(700));

            let start = Instant::now();
            let deadline = start + Duration::from_millis(5);
            assert_eq!(mb.wait_until(5, deadline).await, None);
            assert!(start.elapsed() >= Duration::from_millis(5));
        });
    }
}
