pub mod allocator;
pub mod matcher;
pub mod reconciler;
pub mod validator;

pub use allocator::suggest_months;
pub use matcher::{match_depositor, MatchOutcome, MatchType};
pub use reconciler::ReconcileService;
pub use validator::{detect_member_type, validate_amount, AmountCheck, RateHint};
