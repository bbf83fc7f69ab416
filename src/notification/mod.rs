pub mod content;
pub mod notifier;
pub mod service;
