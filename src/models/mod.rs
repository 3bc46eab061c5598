pub mod document;
pub mod result;
pub mod status;

pub use document::{Accessory, Envelope, Icon, MessageDocument};
pub use result::{ResultEntry, RunSummary};
pub use status::{ColorCode, TestStatus};
