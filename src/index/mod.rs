pub mod forward;
pub mod inverted;
pub mod bloom;
pub mod recordid;
