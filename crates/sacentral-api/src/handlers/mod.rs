pub mod codes;
pub mod health;
pub mod tasks;
pub mod workflows;
