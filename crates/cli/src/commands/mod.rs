pub mod health;
pub mod pools;
