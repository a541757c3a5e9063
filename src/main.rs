use chrono::Utc;
use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use opdash::error_display::user_message_from_report;
use opdash::export::{write_csv, ExportOptions};
use opdash::filter::FilterStatement;
use opdash::loader::LoaderPhase;
use opdash::logging::init_logging;
use opdash::store::parse_timezone;
use opdash::tabs::survey_cursor_key;
use opdash::{
    AppConfig, Args, CapabilityResolver, ConfigManager, DashboardSession, DateRange, Filters,
    Permissions, RecordStore, RenderableTable, RetryingStore, SnapshotStore, SortDirection,
    Stores, Tab, TabContent,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn handle_early_exit_flags(args: &Args) -> Result<Option<()>> {
    if args.generate_config {
        match ConfigManager::new(opdash::APP_NAME) {
            Ok(config_manager) => match config_manager.write_default_config(args.force) {
                Ok(path) => {
                    println!("Configuration file written to: {}", path.display());
                    return Ok(Some(()));
                }
                Err(e) => {
                    eprintln!("Error writing configuration file: {}", e);
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("Error initializing config manager: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(None)
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load(opdash::APP_NAME)?,
    };
    if let Some(page_size) = args.page_size {
        config.display.page_size = page_size;
    }
    if args.debug {
        config.debug.enabled = true;
    }
    config.validate()?;
    Ok(config)
}

fn date_range(args: &Args) -> Result<Option<DateRange>> {
    match (&args.start_date, &args.end_date) {
        (Some(start), Some(end)) => Ok(Some(DateRange::parse(start, end)?)),
        (None, None) => Ok(None),
        _ => Err(eyre!("--start-date and --end-date must be given together")),
    }
}

/// Apply sort and filters, print the page and export it when asked.
fn present(mut table: RenderableTable, args: &Args, filters: &[FilterStatement]) -> Result<()> {
    if let Some(column) = &args.sort {
        if !table.columns().contains(column) {
            return Err(eyre!("Cannot sort by '{}': no such column", column));
        }
        let direction = if args.descending {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        };
        table.sort_by(column.clone(), direction);
    }
    if !filters.is_empty() {
        table.set_filters(filters.to_vec());
    }
    print!("{}", table);

    if let Some(path) = &args.export {
        let options = ExportOptions {
            compression: args.compression,
            ..ExportOptions::default()
        };
        let rows = write_csv(&table, path, &options)?;
        eprintln!("Exported {} rows to {}", rows, path.display());
    }
    Ok(())
}

fn run(args: &Args, config: &AppConfig) -> Result<()> {
    let snapshot_path = args
        .snapshot
        .as_ref()
        .ok_or_else(|| eyre!("A snapshot path is required"))?;
    let date_range = date_range(args)?;
    parse_timezone(&args.timezone)?;
    let filters = args
        .filter
        .iter()
        .map(|f| FilterStatement::parse(f))
        .collect::<Result<Vec<_>>>()?;

    let snapshot_store = SnapshotStore::from_path(snapshot_path)?;
    let snapshot = snapshot_store.snapshot().clone();
    let store: Arc<dyn RecordStore> =
        Arc::new(RetryingStore::new(snapshot_store, config.retry.clone()));
    let resolver: Arc<dyn CapabilityResolver> =
        Arc::new(Permissions::new(config.permissions.clone()));

    let excluded: BTreeSet<String> = args.exclude_users.iter().cloned().collect();
    let trips = store.query_trip_statistics(date_range.as_ref(), &args.timezone, &excluded)?;

    let mut session = DashboardSession::new(Arc::clone(&store), resolver, config);
    session.set_stores(Stores::from_snapshot(&snapshot, trips, excluded));
    session.set_filters(Filters {
        date_range,
        timezone: args.timezone.clone(),
        key_list: args.keys.clone(),
    });

    if args.overview {
        let overview = session.overview(Utc::now())?;
        println!("{}", overview);
    }

    let tab: Tab = args.tab.into();
    let cursor_key = match (&args.survey, tab) {
        (Some(survey), Tab::Demographics) => survey_cursor_key(survey),
        _ => tab.cursor_key().to_string(),
    };
    session.set_page(&cursor_key, args.page);
    session.select_tab(tab);
    if tab == Tab::Uuids && session.wait_for_loader() == LoaderPhase::Failed {
        if let Some(message) = session.state().loader_error() {
            eprintln!("Error loading user statistics: {}", message);
        }
    }

    println!("== {} ==", tab);
    match session.render() {
        None => println!("No data."),
        Some(TabContent::Placeholder(placeholder)) => println!("{}", placeholder),
        Some(TabContent::Table(table)) => present(table, args, &filters)?,
        Some(TabContent::SubTabs(sub_tabs)) => {
            if args.export.is_some() && args.survey.is_none() {
                return Err(eyre!(
                    "Several surveys are available; pick one with --survey to export it"
                ));
            }
            let mut shown = 0;
            for sub_tab in sub_tabs {
                if args.survey.as_ref().is_some_and(|s| *s != sub_tab.label) {
                    continue;
                }
                println!("-- {} --", sub_tab.label);
                present(sub_tab.table, args, &filters)?;
                shown += 1;
            }
            if shown == 0 {
                if let Some(survey) = &args.survey {
                    return Err(eyre!("No survey named '{}'", survey));
                }
            }
        }
    }
    if let Some(message) = session.last_error() {
        eprintln!("Warning: {}", message);
    }

    if config.debug.enabled && config.debug.show_performance {
        for timing in session.take_timings() {
            eprintln!(
                "{:>10.3} ms  {}",
                timing.elapsed.as_secs_f64() * 1000.0,
                timing.label
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::install()?;
    if let Some(()) = handle_early_exit_flags(&args)? {
        return Ok(());
    }

    let config = load_config(&args)?;
    init_logging(config.debug.enabled);

    if let Err(e) = run(&args, &config) {
        eprintln!("Error: {}", user_message_from_report(&e));
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_range_needs_both_ends() {
        let args = Args::try_parse_from(["opdash", "s.json", "--start-date", "2024-01-01"]).unwrap();
        assert!(date_range(&args).is_err());
        let args = Args::try_parse_from([
            "opdash",
            "s.json",
            "--start-date",
            "2024-01-01",
            "--end-date",
            "2024-01-02",
        ])
        .unwrap();
        assert!(date_range(&args).unwrap().is_some());
    }

    #[test]
    fn test_page_size_override_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[display]\npage_size = 20\n").unwrap();
        let path_str = path.to_str().unwrap();

        let args = Args::try_parse_from(["opdash", "s.json", "--config", path_str]).unwrap();
        assert_eq!(load_config(&args).unwrap().display.page_size, 20);

        let args =
            Args::try_parse_from(["opdash", "s.json", "--config", path_str, "--page-size", "0"])
                .unwrap();
        assert!(load_config(&args).is_err());
    }
}
