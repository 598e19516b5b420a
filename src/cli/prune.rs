use super::ui;
use crate::core::market::MarketService;
use anyhow::Result;

pub async fn run(service: &MarketService, keep_days: u32) -> Result<()> {
    let removed = service.prune(keep_days).await?;
    println!(
        "{}",
        ui::style_text(
            &format!("Removed {removed} snapshot(s) older than {keep_days} days"),
            ui::StyleType::Label
        )
    );
    Ok(())
}
