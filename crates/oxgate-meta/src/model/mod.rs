//! Typed metadata rows and their cell codecs.

pub mod bucket;
pub mod gc;
pub mod multipart;
pub mod object;
pub mod types;
