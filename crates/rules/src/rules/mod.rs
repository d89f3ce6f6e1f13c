//! Concrete rules for Normative-Type records.

mod alarm;
pub mod calc;
mod control;
mod forward_link;
mod read_only;
mod timestamp;
mod value_alarm;

pub use self::alarm::AlarmRule;
pub use self::calc::{CalcError, CalcExpr, CalcRule};
pub use self::control::{below_min_step, clip, ControlRule, ControlSettings};
pub use self::forward_link::ForwardLinkRule;
pub use self::read_only::ReadOnlyRule;
pub use self::timestamp::TimestampRule;
pub use self::value_alarm::{Threshold, ValueAlarmRule};
