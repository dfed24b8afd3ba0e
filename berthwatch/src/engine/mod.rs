pub mod alerts;
pub mod decision;
pub mod dedup;
pub mod dispatcher;
pub mod identity;
pub mod publisher;
pub mod selector;
