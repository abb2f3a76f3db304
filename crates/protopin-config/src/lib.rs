//! Discovery and parsing of `protopin.toml` files.
//!
//! A target file is governed by the configs found walking up from its
//! directory. The nearest governing config owns the target; the whole chain
//! contributes tool declarations with nearer files taking precedence. Tidy
//! pins floating versions by rewriting the file in place.

pub mod error;
pub mod loader;
pub mod locator;
pub mod rewrite;
pub mod types;

pub use error::{ConfigError, Result};
pub use loader::{load_config, load_config_items, parse_config, template};
pub use locator::{list_config_paths, resolve_owner, ConfigChain, Locator};
pub use rewrite::{render_pins, rewrite_versions, Pin};
pub use types::{CompileSettings, Config, ConfigItem, PostAction, CONFIG_FILE_NAME};
