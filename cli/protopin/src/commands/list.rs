//! `protopin list`: installed toolchains and their states.

use anyhow::Result;

use protopin_store::{InstallationRecord, ToolchainStore};

use crate::settings::Settings;

pub fn run(settings: &Settings, verify: bool) -> Result<()> {
    let store = settings.store()?;
    let records = records(&store, verify)?;
    if records.is_empty() {
        println!("no toolchains installed in {}", store.root().display());
        return Ok(());
    }
    for record in &records {
        println!("{}", format_record(record));
    }
    Ok(())
}

/// Every entry; `verify` re-digests each tree.
pub(crate) fn records(store: &ToolchainStore, verify: bool) -> Result<Vec<InstallationRecord>> {
    let records = store.list()?;
    if !verify {
        return Ok(records);
    }
    Ok(records
        .iter()
        .map(|record| store.inspect(&record.key, true))
        .collect())
}

fn format_record(record: &InstallationRecord) -> String {
    format!(
        "{:<48} {:<10} {}",
        record.key.to_string(),
        record.state.to_string(),
        record.path.display()
    )
}
