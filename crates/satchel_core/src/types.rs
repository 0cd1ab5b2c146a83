pub use self::asset::*;
pub use self::dependency::*;
pub use self::file_type::*;
pub use self::options::*;

mod asset;
mod dependency;
mod file_type;
mod options;
