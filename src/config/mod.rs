pub mod env;
pub mod loader;
pub mod types;

pub use loader::{load_config, strip_jsonc_comments};
pub use types::{CallConfig, MockConfig, MockSettings, PbmockConfig};
