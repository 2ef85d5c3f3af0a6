//! Terminal output and prompts.

pub mod output;
pub mod prompts;

pub use output::{error, header, info, kv, page_footer, success, table_header, table_row, warning};
