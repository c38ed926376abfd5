pub mod check;
pub mod deadline;
pub mod init;
pub mod outbox;
pub mod policy;
pub mod rule;
pub mod ticket;
pub mod user;
pub mod violations;
