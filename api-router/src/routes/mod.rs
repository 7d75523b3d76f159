pub mod chat;
pub mod inbox;
pub mod liveness;
pub mod memories;
pub mod readiness;
pub mod search;
