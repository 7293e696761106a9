use crate::output::print_json;
use airlock_core::{paths, pipeline::Pipeline};
use anyhow::Context;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let created = Pipeline::init(root)
        .with_context(|| format!("failed to initialize airlock in {}", root.display()))?;

    if json {
        print_json(&serde_json::json!({
            "root": root.display().to_string(),
            "config_created": created,
        }))?;
        return Ok(());
    }

    println!("Initializing airlock in: {}", root.display());
    if created {
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }
    println!(
        "Add one reference baseline per state under {}/<STATE>.yaml",
        paths::REFERENCE_DIR
    );
    Ok(())
}
