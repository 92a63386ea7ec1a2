//! Transport back-ends: each maps the generic [`crate::device::Device`]
//! onto a concrete physical link.

pub mod cpc;
pub mod serial;
pub mod usb;
