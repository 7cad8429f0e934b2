//! Shardkeep - versioned world persistence for a shard server
//!
//! Every stateful object writes a version tag and its fields to a binary
//! stream; loading reads the tag and upgrades older formats forward to the
//! current shape. The world file ties the objects together with a type table
//! and an index, and cross-object references are resolved in a second pass.

/// World save configuration
pub mod config;
/// Stream format, layouts, world state and the world file
pub mod persistence;
/// Persistent content types
pub mod content;
