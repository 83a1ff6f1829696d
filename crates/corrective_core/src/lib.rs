pub mod db;
pub mod domain;
pub mod downtime;
pub mod duplicates;
pub mod error;
pub mod notify;
pub mod priority;
pub mod qa;
pub mod recurrence;
pub mod settings;
pub mod similarity;
pub mod solutions;
pub mod store;
