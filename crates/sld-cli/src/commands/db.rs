//! `sld db` handlers.

use anyhow::Result;

pub async fn status() -> Result<()> {
    let pool = sld_db::connect_from_env().await?;
    let s = sld_db::status(&pool).await?;
    println!(
        "db_ok={} has_orders_table={} pending_orders={}",
        s.ok, s.has_orders_table, s.pending_orders
    );
    Ok(())
}

pub async fn migrate(yes: bool) -> Result<()> {
    let pool = sld_db::connect_from_env().await?;

    // Refuse to migrate under live orders unless the operator acknowledges.
    let s = sld_db::status(&pool).await?;
    if s.pending_orders > 0 && !yes {
        anyhow::bail!(
            "REFUSING MIGRATE: detected {} pending order(s). Re-run with: `sld db migrate --yes`",
            s.pending_orders
        );
    }

    sld_db::migrate(&pool).await?;
    println!("migrations_applied=true");
    Ok(())
}
