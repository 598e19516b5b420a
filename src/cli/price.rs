use super::ui;
use crate::core::analytics::{PriceSummary, per_gram};
use crate::core::config::AppConfig;
use crate::core::error::SourceError;
use crate::core::market::{MarketService, MarketSnapshot, Provenance};
use crate::core::selector::SourceTier;
use anyhow::Result;
use comfy_table::Cell;

pub async fn run(service: &MarketService, refresh: bool) -> Result<()> {
    let spinner = ui::new_spinner("Fetching gold price...");
    let result = if refresh {
        service.refresh_snapshot().await
    } else {
        service.snapshot().await
    };
    spinner.finish_and_clear();

    match result {
        Ok(snapshot) => {
            display_snapshot(&snapshot, service.config());
            Ok(())
        }
        Err(SourceError::SourceExhausted { failures }) => {
            println!(
                "{}",
                ui::style_text("Gold price unavailable: every source failed", ui::StyleType::Error)
            );
            for failure in &failures {
                println!("  {}", ui::style_text(&failure.to_string(), ui::StyleType::Subtle));
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn display_snapshot(snapshot: &MarketSnapshot, config: &AppConfig) {
    let base = &config.base_currency;
    let quote = &config.quote_currency;
    let record = &snapshot.record;

    println!(
        "\n{} {}",
        ui::style_text("Gold price", ui::StyleType::Title),
        ui::style_text(&record.date.to_string(), ui::StyleType::Subtle)
    );

    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Measure"), ui::header_cell("Value")]);
    table.add_row(vec![
        Cell::new(format!("Benchmark ({base}/oz)")),
        ui::amount_cell(record.asset_price_base_ccy, 2),
    ]);
    table.add_row(vec![
        Cell::new(format!("Rate ({quote} per {base})")),
        ui::amount_cell(record.fx_rate, 4),
    ]);
    table.add_row(vec![
        Cell::new(format!("Benchmark ({quote}/oz)")),
        ui::amount_cell(record.asset_price_quote_ccy, 2),
    ]);
    table.add_row(vec![
        Cell::new(format!("Local ({quote}/oz)")),
        ui::amount_cell(record.local_price_quote_ccy, 2),
    ]);
    table.add_row(vec![
        Cell::new(format!("Local ({quote}/g)")),
        ui::amount_cell(per_gram(record.local_price_quote_ccy), 2),
    ]);
    table.add_row(vec![
        Cell::new("Premium"),
        ui::amount_cell(record.premium_multiplier, 4),
    ]);

    if let Some(summary) = PriceSummary::from_series(&snapshot.recent) {
        add_summary_rows(&mut table, &summary, base);
    }
    println!("{table}");

    for note in provenance_notes(&snapshot.provenance) {
        println!("{note}");
    }
}

fn add_summary_rows(table: &mut comfy_table::Table, summary: &PriceSummary, base: &str) {
    table.add_row(vec![
        Cell::new(format!("Previous close ({base}/oz)")),
        ui::format_optional_cell(summary.previous, |p| format!("{:.2}", p.round_dp(2))),
    ]);
    table.add_row(vec![Cell::new("Change"), ui::change_cell(summary.change_pct)]);
    table.add_row(vec![
        Cell::new(format!("Recent high / low ({base}/oz)")),
        Cell::new(format!(
            "{:.2} / {:.2}",
            summary.high.round_dp(2),
            summary.low.round_dp(2)
        ))
        .set_alignment(comfy_table::CellAlignment::Right),
    ]);
    table.add_row(vec![
        Cell::new("Recent range"),
        ui::format_optional_cell(summary.range_pct, |r| format!("{:.2}%", r.round_dp(2))),
    ]);
}

/// One line per notable fact about where the numbers came from.
fn provenance_notes(provenance: &Provenance) -> Vec<String> {
    match provenance {
        Provenance::Stored => vec![ui::style_text(
            "Served from today's stored snapshot",
            ui::StyleType::Subtle,
        )],
        Provenance::Live {
            price_symbol,
            tier,
            skipped,
            rate_symbol,
            rate_is_fallback,
            from_cache,
        } => {
            let mut notes = vec![ui::style_text(
                &format!(
                    "Price from {price_symbol} ({tier}), rate from {}",
                    rate_symbol.as_deref().unwrap_or("configuration")
                ),
                ui::StyleType::Subtle,
            )];
            if *tier == SourceTier::Backup {
                notes.push(ui::style_text(
                    &format!("Primary sources unavailable, using backup ({skipped} skipped)"),
                    ui::StyleType::Warning,
                ));
            }
            if *rate_is_fallback {
                notes.push(ui::style_text(
                    "Rate sources unavailable, using the configured fallback rate",
                    ui::StyleType::Warning,
                ));
            }
            if *from_cache {
                notes.push(ui::style_text("Price served from cache", ui::StyleType::Subtle));
            }
            notes
        }
    }
}
