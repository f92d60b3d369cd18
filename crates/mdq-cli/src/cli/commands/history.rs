//! `mdq history list|clear|remove <url>` – the record of completed downloads.

use anyhow::Result;
use mdq_core::store::StateDb;

use crate::cli::HistoryAction;

pub async fn run_history(action: HistoryAction) -> Result<()> {
    let db = StateDb::open_default().await?;
    match action {
        HistoryAction::List => {
            let entries = db.history_list().await?;
            if entries.is_empty() {
                println!("History is empty.");
            }
            for e in entries {
                println!("{:<15} {}", e.completed_at, e.url);
            }
        }
        HistoryAction::Clear => {
            let n = db.history_clear().await?;
            println!("Removed {n} history entr{}", if n == 1 { "y" } else { "ies" });
        }
        HistoryAction::Remove { url } => {
            if db.history_remove(&url).await? {
                println!("Removed {url} from history");
            } else {
                println!("{url} is not in the history");
            }
        }
    }
    db.close().await;
    Ok(())
}
