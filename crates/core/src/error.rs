/// Top-level error type. Every fatal pipeline failure ends up here.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source document error: {0}")]
    Source(#[from] SourceError),

    #[error("CSS inlining error: {0}")]
    Inline(#[from] InlineError),

    #[error("Minification error: {0}")]
    Minify(#[from] MinifyError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({detail})")]
    InvalidValue {
        key: String,
        value: String,
        detail: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("HTML file is empty: {0}")]
    Empty(String),

    #[error("Unsupported input file: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Failed to decode {path}: {detail}")]
    Decode { path: String, detail: String },

    #[error("Failed to encode {path}: {detail}")]
    Encode { path: String, detail: String },

    #[error("Failed to rasterize {path}: {detail}")]
    Rasterize { path: String, detail: String },

    #[error("Image task for {path} did not complete: {detail}")]
    Task { path: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum InlineError {
    #[error("Inlining engine failed: {0}")]
    Engine(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MinifyError {
    #[error("Minified output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Failed to rewrite HTML: {0}")]
    Rewrite(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("ZIP failure for {path}: {detail}")]
    Zip { path: String, detail: String },

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Webletter token is missing")]
    MissingToken,

    #[error("Webletter endpoint is missing")]
    MissingEndpoint,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Webletter endpoint returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Webletter response has no id")]
    MissingId,

    #[error("Invalid webletter state file {path}: {detail}")]
    State { path: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("Path traversal detected in archive entry: {path}")]
    PathTraversal { path: String },

    #[error("Archive contains {count} files, exceeding limit of {limit}")]
    TooManyFiles { count: u64, limit: u64 },

    #[error("Entry {name} decompresses {ratio}x, exceeding limit of {limit}x")]
    ZipBomb { name: String, ratio: u64, limit: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Inline(#[from] InlineError),
}
