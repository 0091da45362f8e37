//! Level command implementation.

use super::CliError;
use docmerge_core::assign_level;
use serde::Serialize;

/// Level of one key.
#[derive(Debug, Serialize)]
pub struct KeyLevel {
    /// The merge key.
    pub key: String,
    /// Its assigned level.
    pub level: u8,
}

/// Runs the level command.
pub fn run(keys: &[String], format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let levels: Vec<KeyLevel> = keys
        .iter()
        .map(|key| KeyLevel {
            key: key.clone(),
            level: assign_level(key),
        })
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&levels)?);
        }
        "text" => {
            let width = levels.iter().map(|l| l.key.len()).max().unwrap_or(0);
            for entry in &levels {
                println!("{:<width$}  {}", entry.key, entry.level);
            }
        }
        other => return Err(CliError::UnknownFormat(other.to_string()).into()),
    }
    Ok(())
}
