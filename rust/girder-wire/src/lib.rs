//! Wire encoding shared by the stable containers.
//!
//! The format is deliberately dumb: fixed-layout values are their native
//! bytes, strings and maps are length-prefixed, the variant carries one tag
//! byte. It is not versioned and not cross-host portable — producers and
//! consumers live on the same host, possibly in modules built by different
//! toolchains, which is exactly what the fixed layout buys.

pub mod buffer;
pub mod cursor;
pub mod error;
pub mod nested_map;
pub mod traits;
pub mod value;

pub use buffer::Buffer;
pub use cursor::Cursor;
pub use error::WireError;
pub use nested_map::NestedMap;
pub use traits::Wire;
pub use value::Value;
