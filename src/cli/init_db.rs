use anyhow::Result;

use crate::config::Config;
use crate::store::Store;

pub fn run(config: &Config) -> Result<()> {
    let path = config.database_path();
    Store::open(&path, &config.database)?;
    println!("✅ Schema ready at {}", path.display());
    Ok(())
}
