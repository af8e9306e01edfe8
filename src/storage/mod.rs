// Storage: gap-fill policy + ping-pong cache files per board stream.
pub mod gap_fill;
pub mod ping_pong;
pub mod reader;
