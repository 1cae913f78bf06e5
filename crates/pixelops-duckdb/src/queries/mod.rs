pub mod conversions;
pub mod diagnostics;
pub mod events;
pub mod pixels;
