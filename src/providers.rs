pub mod selector;

pub use selector::{SelectorProvider, SelectorRules};
