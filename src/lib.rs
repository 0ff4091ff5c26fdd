//! HTTP service that downloads YouTube media through `yt-dlp` and returns
//! the resulting file to the caller.

pub mod config;
pub mod convert;
pub mod error;
pub mod routes;
pub mod state;
pub mod workspace;
pub mod ytdlp;

pub use config::Config;
pub use routes::build_router;
pub use state::AppState;
