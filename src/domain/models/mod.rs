//! Domain models

mod account;
mod content;
mod schedule;

pub use account::{Account, ImportedAccount};
pub use content::{ContentItem, ItemStatus, StorySticker};
pub use schedule::{Schedule, ScheduleStatus};
