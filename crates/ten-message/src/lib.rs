pub mod location;
pub mod message;
pub mod path;
pub mod value;

pub use location::{Location, LOCALHOST};
pub use message::{BufGuard, ExcludedFields, Msg, MsgKind, MsgRef, StatusCode};
pub use path::{Path, PathDirection, PathError, PathTable, ResolvedResult, ResultConversion, ResultConversionRef};
pub use value::{get_property, set_property, PropertyMap, PropertyPath, PropertyValue};
