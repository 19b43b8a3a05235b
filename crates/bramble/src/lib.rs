pub mod builder;
pub mod cache;
pub mod config;
pub mod defaults;
pub mod document;
pub mod error;
pub mod files;
pub mod hooks;
pub mod metadata;
pub mod paginate;
pub mod parsing;
pub mod path_guard;
pub mod permalink;
pub mod reader;
pub mod render;
pub mod report;
pub mod site;
pub mod theme;
pub mod watch;
pub mod writer;

pub use builder::*;
pub use cache::*;
pub use config::*;
pub use defaults::*;
pub use document::*;
pub use error::*;
pub use files::*;
pub use hooks::*;
pub use metadata::*;
pub use paginate::*;
pub use permalink::Permalink;
pub use render::*;
pub use report::*;
pub use site::*;
pub use theme::*;
pub use watch::*;
pub use writer::clean_output_dir;
