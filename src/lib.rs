pub mod alarm;
pub mod boot;
pub mod clock;
pub mod config;
pub mod countdown;
pub mod error;
pub mod event;
pub mod notification;
pub mod reminder;
pub mod runtime;

#[cfg(test)]
mod test_support;
