pub mod migrate;
pub mod outbox;
pub mod submit;
