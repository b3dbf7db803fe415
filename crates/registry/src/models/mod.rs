mod checksum;
mod object;

pub use self::checksum::Checksum;
pub(crate) use self::checksum::ChecksumRow;
pub use self::object::{ExistingKeys, StoredObject};
pub(crate) use self::object::{DifferenceRow, ObjectRow};
