pub mod source_allowlist;

pub use source_allowlist::SourceAllowlistLayer;
