use anyhow::Result;
use mimic_core::{DiscordSource, MessageSource};

use crate::ui;

pub async fn run(guild: String, json: bool) -> Result<()> {
    let token = super::token()?;
    let source = DiscordSource::new(token, guild)?;

    let spinner = ui::spinner("Enumerating channels");
    let channels = match source.list_channels().await {
        Ok(channels) => {
            spinner.finish_and_clear();
            channels
        }
        Err(e) => {
            spinner.abandon_with_message("Failed");
            return Err(e);
        }
    };

    if json {
        let payload = serde_json::json!({
            "total": channels.len(),
            "channels": channels
                .iter()
                .map(|c| serde_json::json!({
                    "id": c.id,
                    "name": c.name,
                    "readable": c.readable,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for channel in &channels {
        if channel.readable {
            ui::success(&format!("#{} ({})", channel.name, channel.id));
        } else {
            ui::error(&format!("#{} ({}) - no read access", channel.name, channel.id));
        }
    }
    ui::info(&format!("{} text channels", channels.len()));

    Ok(())
}
