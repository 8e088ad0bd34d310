//! Block and object-id allocation (spec §4.3, §4.4).

pub mod bitmap;
pub mod bitops;
pub mod oid;

pub use bitmap::Bitmap;
pub use oid::OidAllocator;
