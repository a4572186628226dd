pub mod consts;
pub mod context;
pub mod error;
pub mod image;
pub mod io;
pub mod order;
pub mod sequence;
pub mod stack;
pub mod stats;
