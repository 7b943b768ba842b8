pub mod builders;
pub mod scenarios;

#[allow(unused_imports)]
pub use builders::*;
