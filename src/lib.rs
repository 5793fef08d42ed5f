//! Incremental harvesting of reviews from an infinite-scroll page driven
//! through a remote browser session.

pub mod accessor;
pub mod config;
pub mod error;
pub mod extract;
pub mod harvest;
pub mod logging;
pub mod monitor;
pub mod page;
pub mod progress;
pub mod registry;
pub mod run;
pub mod session;
pub mod sink;
pub mod webdriver;
