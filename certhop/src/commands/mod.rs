pub mod create_key;
pub mod generate;
pub mod serve;
