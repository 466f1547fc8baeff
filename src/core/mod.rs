pub mod catalog;
pub mod config;
pub mod history;
pub mod io;
pub mod layout;
pub mod random;
pub mod state;
