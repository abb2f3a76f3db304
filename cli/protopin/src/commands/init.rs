//! `protopin init`: write a starter config.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use protopin_config::{template, CONFIG_FILE_NAME};

pub fn run(dir: &Path) -> Result<()> {
    let path = create_config(dir)?;
    println!("Created {}", path.display());
    println!("Run `protopin tidy` to pin and install the declared tools.");
    Ok(())
}

pub(crate) fn create_config(dir: &Path) -> Result<PathBuf> {
    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    fs::write(&path, template()).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
