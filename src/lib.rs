//! PNP ingest: receives Piano Network Protocol packets from the key boards, keeps one
//! continuous, gap-filled sample stream per board in ping-pong cache files, and forwards
//! key strikes and releases as note events.

pub mod config;
pub mod error;
pub mod ingest;
pub mod protocol;
pub mod storage;
pub mod utils;
