use super::ui;
use crate::core::analytics::per_gram;
use crate::core::history::HistoryReport;
use crate::core::market::MarketService;
use anyhow::Result;
use comfy_table::Cell;

pub async fn run(service: &MarketService, days: Option<u32>) -> Result<()> {
    let days = days.unwrap_or(service.config().history.default_days);

    let spinner = ui::new_spinner(&format!("Building {days}-day history..."));
    let cached = service.history(days).await;
    spinner.finish_and_clear();

    if cached.is_cached_failure() {
        println!(
            "{}",
            ui::style_text(
                &format!("Replaying failure cached at {}", cached.computed_at),
                ui::StyleType::Warning
            )
        );
    }
    let report = cached.into_result()?;
    display_report(&report, service);
    Ok(())
}

fn display_report(report: &HistoryReport, service: &MarketService) {
    let config = service.config();
    let base = &config.base_currency;
    let quote = &config.quote_currency;

    println!(
        "\n{} {}",
        ui::style_text(
            &format!("{} x {}", report.asset_symbol, report.rate_symbol),
            ui::StyleType::Title
        ),
        ui::style_text(
            &format!("{} to {}", report.start, report.end),
            ui::StyleType::Subtle
        )
    );

    if report.series.is_empty() {
        println!("No date has both a price and a rate in this window.");
    } else {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Date"),
            ui::header_cell(&format!("{base}/oz")),
            ui::header_cell("Rate"),
            ui::header_cell(&format!("{quote}/oz")),
            ui::header_cell(&format!("Local {quote}/oz")),
            ui::header_cell(&format!("Local {quote}/g")),
        ]);
        for record in report.series.records() {
            table.add_row(vec![
                Cell::new(record.date.to_string()),
                ui::amount_cell(record.asset_price_base_ccy, 2),
                ui::amount_cell(record.fx_rate, 4),
                ui::amount_cell(record.asset_price_quote_ccy, 2),
                ui::amount_cell(record.local_price_quote_ccy, 2),
                ui::amount_cell(per_gram(record.local_price_quote_ccy), 2),
            ]);
        }
        println!("{table}");
    }

    if !report.diagnostics.is_empty() {
        ui::print_separator();
        println!(
            "{}",
            ui::style_text(
                &format!("{} date(s) skipped:", report.diagnostics.len()),
                ui::StyleType::Warning
            )
        );
        for diagnostic in &report.diagnostics {
            println!("  {}", ui::style_text(&diagnostic.to_string(), ui::StyleType::Subtle));
        }
    }
}
