pub mod entry;
pub mod fee;
pub mod member;
pub mod record;
pub mod result;

pub use entry::PaymentEntry;
pub use fee::FeeSchedule;
pub use member::{CoupleGroup, DirectorySnapshot, Member, MemberType};
pub use record::{DepositRow, NewPaymentRecord, PaymentRecord, RecordStatus, UploadBatch};
pub use result::{BulkConfirmOutcome, BulkFailure, ConfirmOutcome, IngestOutcome, IngestSummary};
