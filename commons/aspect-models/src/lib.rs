pub mod enums;
pub mod proposal;
pub mod snapshot;
pub mod spec;
pub mod stamp;
pub mod urn;

pub use enums::*;
pub use proposal::*;
pub use snapshot::*;
pub use spec::*;
pub use stamp::*;
pub use urn::*;
