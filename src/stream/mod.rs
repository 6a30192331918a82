//! Model stream consumption and governance

pub mod governor;

pub use governor::StreamGovernor;
