//! Common support code for the MegaBoy emulator: bit helpers, framebuffer
//! pixel operations, little-endian stream I/O, and wall-clock helpers.

pub mod encoding;
pub mod num;
pub mod pixels;
pub mod timeutils;
