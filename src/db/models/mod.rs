pub mod session;

pub use session::{FocusFeedback, SessionPayload, SessionRecord, SyncedMark};
