pub mod activity;
pub mod data;
pub mod definition;
pub mod error;
pub mod expr;
pub mod instance;
pub mod model;
pub mod runtime;
