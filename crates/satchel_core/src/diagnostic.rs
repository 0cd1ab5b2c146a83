pub use self::code_frame::*;
pub use self::diagnostic::*;

mod code_frame;
mod diagnostic;
