//! Store inspection entry point.
//!
//! # Responsibility
//! - Open the store described by an optional TOML config path.
//! - Print deterministic record counts for quick sanity checks.

use log::info;
use portal_core::{
    open_shared, AlertRepository, DatabaseAlertRepository, DatabaseExpressionRepository,
    ExpressionRepository, PortalConfig,
};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => PortalConfig::load(path)?,
        None => PortalConfig::default(),
    };
    portal_core::init_logging_from_config(&config.logging)?;

    let conn = open_shared(&config.database)?;
    let alerts = DatabaseAlertRepository::from_config(conn.clone(), &config.alert_repository)?;
    let expressions =
        DatabaseExpressionRepository::from_config(conn, &config.expression_repository)?;
    alerts.open()?;
    expressions.open()?;

    println!("portal_core version={}", portal_core::core_version());
    println!(
        "database={}",
        config.database.path.as_deref().unwrap_or(":memory:")
    );
    println!("alerts={}", alerts.count()?);
    println!("expressions={}", expressions.count()?);
    info!("event=cli_inspect module=cli status=ok");

    expressions.close()?;
    alerts.close()?;
    Ok(())
}
