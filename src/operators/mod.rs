//! Built-in operators.

mod array_piper;

pub use array_piper::OpArrayPiper;
