pub mod handlers;
mod path_utils;

pub use handlers::{handle_file_request, ResolvedAsset, Resolver};
pub use path_utils::normalize_request_path;
