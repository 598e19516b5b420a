pub mod history;
pub mod price;
pub mod prune;
pub mod setup;
pub mod ui;
