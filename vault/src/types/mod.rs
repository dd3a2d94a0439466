mod value;

pub(crate) use value::render_number;
pub use value::{KeyType, Slot, Value};
