pub mod andon;
pub mod health;
pub mod metrics;
pub mod print_history;
pub mod sequences;
