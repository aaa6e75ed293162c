//! Per-source-type handlers; each accepts the typed locator plus options
//! and returns the created assets.

mod discovery;
mod file;
mod rss;
mod search;
mod web;
