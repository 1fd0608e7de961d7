pub mod error;
pub mod field_value;
pub mod ids;
pub mod interval;
pub mod version;

pub use error::CoreError;
pub use field_value::FieldValue;
pub use ids::*;
pub use interval::{Interval, MovePlan, Shift, Translate};
pub use version::{Version, VersionClock};
