pub mod error;
pub mod types;
pub mod value;

pub use error::{OrmError, Result};
pub use types::{EntityId, EntityKey, ObjectIdentity};
pub use value::{FieldMap, ToValue, Value};
