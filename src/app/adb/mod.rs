pub mod command;
pub mod dumpsys;
pub mod files;
pub mod locator;
pub mod logcat;
pub mod mirror;
pub mod output;
pub mod packages;
pub mod parse;
pub mod polling;
pub mod runner;
