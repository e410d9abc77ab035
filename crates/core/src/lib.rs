pub mod archive;
pub mod config;
pub mod discover;
pub mod document;
pub mod entities;
pub mod error;
pub mod images;
pub mod inline;
pub mod links;
pub mod minify;
pub mod pipeline;
pub mod progress;
pub mod security;
pub mod transform;
pub mod webletter;

pub mod prelude {
    pub use crate::config::PackConfig;
    pub use crate::document::*;
    pub use crate::error::*;
    pub use crate::pipeline::{package, process_archive, InputKind, PackOptions, ProcessReport};
}
