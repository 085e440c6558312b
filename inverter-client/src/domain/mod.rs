mod measurement;
mod status;

pub use measurement::{Measurement, StatusFields};
pub use status::RawStatus;
