mod tool;

pub use tool::*;
