mod cli_parser;

pub use cli_parser::*;
