pub use self::bundle_loaders::*;
pub use self::installer::*;
pub use self::packagers::*;
pub use self::registry::*;
pub use self::resolver::*;
pub use self::transformers::*;

mod bundle_loaders;
mod installer;
mod packagers;
mod registry;
mod resolver;
mod transformers;
