//! Source adapter listing for `fxi sources`.

use anyhow::Result;

use crate::config::Config;
use crate::models::Source;
use crate::source::{adapter_for, SourceAdapter};

pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<14} {:<10} DETAIL", "SOURCE", "KIND");
    for source in Source::ALL {
        let adapter = adapter_for(source, config)?;
        let kind = if source.is_forex() { "forex" } else { "commodity" };
        println!("{:<14} {:<10} {}", source, kind, adapter.description());
    }

    let resource_dir = &config.sources.sbi.resource_dir;
    if resource_dir.exists() {
        println!();
        println!(
            "SBI historical PDFs: {} (present)",
            resource_dir.display()
        );
    } else {
        println!();
        println!(
            "SBI historical PDFs: {} (missing — backfill limited to the live document)",
            resource_dir.display()
        );
    }
    Ok(())
}
