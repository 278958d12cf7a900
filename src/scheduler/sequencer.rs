//! Content sequencer
//!
//! Picks the next draft item of a schedule's container. The schedule's
//! `current_position` is a cursor over item positions (not an index), so
//! gaps in the numbering are fine.

use std::sync::Arc;

use tracing::{debug, info};

use crate::constants::SEQUENCE_ORIGIN;
use crate::domain::models::{ContentItem, ItemStatus, Schedule};
use crate::domain::{Store, StoreError};
use crate::services::clock::Clock;

#[derive(Debug, Clone)]
pub enum Selection {
    /// Next item to publish; the pointer now sits on its position
    Item(ContentItem),
    /// Nothing to hand out right now, try again on a later tick
    Idle,
    /// No drafts left and no repeat: the schedule is done
    Exhausted,
}

pub struct Sequencer {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Sequencer {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn next(&self, schedule: &Schedule) -> Result<Selection, StoreError> {
        let items = self.store.container_items(schedule.container_id).await?;

        if let Some(item) = select_draft(&items, schedule.current_position) {
            if item.position <= schedule.current_position {
                debug!(
                    schedule_id = schedule.id,
                    pointer = schedule.current_position,
                    position = item.position,
                    "Sequence pointer drifted past remaining drafts, restarting from lowest draft"
                );
            }
            self.store
                .set_schedule_position(schedule.id, item.position)
                .await?;
            return Ok(Selection::Item(item.clone()));
        }

        if !schedule.repeat_cycle {
            return Ok(Selection::Exhausted);
        }

        // Restart the cycle, but never underneath an in-flight publish
        let Some(first) = items.first() else {
            return Ok(Selection::Idle);
        };
        if items.iter().any(|i| i.status == ItemStatus::Queued) {
            debug!(
                schedule_id = schedule.id,
                "Cycle complete but items still in flight, waiting"
            );
            return Ok(Selection::Idle);
        }

        let reset = self
            .store
            .reset_container_items(schedule.container_id, self.clock.now())
            .await?;
        self.store
            .set_schedule_position(schedule.id, SEQUENCE_ORIGIN)
            .await?;
        info!(
            schedule_id = schedule.id,
            container_id = schedule.container_id,
            reset,
            "Repeat cycle restarted"
        );

        let mut first = first.clone();
        first.status = ItemStatus::Draft;
        first.error_message = None;
        first.failure_kind = None;
        first.claim_id = None;
        self.store
            .set_schedule_position(schedule.id, first.position)
            .await?;
        Ok(Selection::Item(first))
    }
}

/// Lowest draft past the pointer, or failing that the lowest draft anywhere.
/// The second step repairs a pointer that drifted ahead of unpublished items
/// (out-of-order completions, manual edits, a dispatch that was rolled back).
/// `items` must be ordered by position.
pub fn select_draft(items: &[ContentItem], pointer: i32) -> Option<&ContentItem> {
    let mut drafts = items.iter().filter(|i| i.status == ItemStatus::Draft);
    drafts
        .clone()
        .find(|i| i.position > pointer)
        .or_else(|| drafts.next())
}
