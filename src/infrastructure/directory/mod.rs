//! 用户目录与房源目录适配器

mod http_directory;
mod static_directory;

pub use http_directory::HttpDirectory;
pub use static_directory::StaticDirectory;
