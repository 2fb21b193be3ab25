pub mod association;
pub mod bin_resolver;
pub mod cancel;
pub mod cli;
pub mod context;
pub mod entity;
pub mod identity;
pub mod invoker;
pub mod listing;
pub mod logging;
pub mod normalize;
pub mod orchestrator;
pub mod progress;
pub mod selector;
pub mod settings;
pub mod targets;
pub mod transfer;
