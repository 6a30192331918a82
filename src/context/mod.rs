//! Context budgeting and allocation
//!
//! Gauges the available prompt context for a turn and distributes it between
//! the current input, conversation history, message examples, and retrieved
//! context.

pub mod allocator;
pub mod budget;
pub mod token_counter;

pub use allocator::{Allocation, ContentAllocator};
pub use budget::{BudgetCalculator, ContextBudget};
pub use token_counter::{default_counter, ApproximateTokenCounter, TiktokenCounter, TokenCounter};
