/// Migrating twice must be idempotent and leave the orders table in place.
///
/// DB-backed test, skipped if SLD_DATABASE_URL is not set.
#[tokio::test]
async fn migrate_twice_then_status_reports_orders_table() -> anyhow::Result<()> {
    let url = match std::env::var(sld_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: SLD_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    sld_db::migrate(&pool).await?;
    sld_db::migrate(&pool).await?;

    let st = sld_db::status(&pool).await?;
    assert!(st.ok);
    assert!(st.has_orders_table);
    Ok(())
}
