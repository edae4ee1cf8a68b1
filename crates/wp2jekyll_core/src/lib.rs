pub mod config;
pub mod convert;
pub mod discussions;
pub mod exceptions;
pub mod frontmatter;
pub mod github;
pub mod html;
pub mod media;
pub mod migrate;
pub mod normalize;
pub mod runtime;
pub mod wordpress;
